//! Search layer facade.
//!
//! - **[`vector_index`]**: PSVI flat inner-product index (mmap load, SIMD scan).
//! - **[`embedding_matrix`]**: raw normalized vectors as NPY.
//! - **[`metadata`]**: row-ordered paper table (MessagePack).
//! - **[`artifacts`]**: artifact directory layout and manifest.
//! - **[`builder`]**: corpus → embedded, persisted artifact set.
//! - **[`store`]**: loaded, read-only index + metadata.
//! - **[`filters`]**: year and keyword post-filters.
//! - **[`query`]**: the query engine.
//! - **[`embedder`]**: Embedder trait (hash and ML implementations).
//! - **[`embedder_registry`]**: embedder registry for model selection.
//! - **[`hash_embedder`]**: FNV-1a feature hashing embedder (deterministic fallback).
//! - **[`fastembed_embedder`]**: FastEmbed-backed ML embedder (MiniLM, BGE).
//! - **[`reranker`]**: Reranker trait and the no-op reranker.
//! - **[`reranker_registry`]**: reranker registry with no-op degradation.
//! - **[`fastembed_reranker`]**: FastEmbed-backed cross-encoder reranker.
//! - **[`model_manager`]**: availability detection and engine wiring (no downloads).
//! - **[`canonicalize`]**: text shaping shared by ingestion, filters and queries.

pub mod artifacts;
pub mod builder;
pub mod canonicalize;
pub mod embedder;
pub mod embedder_registry;
pub mod embedding_matrix;
pub mod fastembed_embedder;
pub mod fastembed_reranker;
pub mod filters;
pub mod hash_embedder;
pub mod metadata;
pub mod model_manager;
pub mod query;
pub mod reranker;
pub mod reranker_registry;
pub mod store;
pub mod vector_index;
