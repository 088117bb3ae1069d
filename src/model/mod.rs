//! Corpus and result types.

pub mod types;
