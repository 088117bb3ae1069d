//! Terminal and JSON rendering of search results.

use std::io::Write;

use anyhow::{Context, Result};
use colored::Colorize;
use serde::Serialize;

use crate::model::types::SearchHit;

const TITLE_WIDTH: usize = 72;
const AUTHORS_WIDTH: usize = 48;
const ABSTRACT_WIDTH: usize = 240;

/// Results for one query, as emitted by `search --json` and `batch --json`.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput<'a> {
    pub query: &'a str,
    pub count: usize,
    pub hits: &'a [SearchHit],
}

impl<'a> QueryOutput<'a> {
    pub fn new(query: &'a str, hits: &'a [SearchHit]) -> Self {
        Self {
            query,
            count: hits.len(),
            hits,
        }
    }
}

pub fn write_json<W: Write, T: Serialize>(mut out: W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, value).context("serialize results")?;
    writeln!(out)?;
    Ok(())
}

/// Human-readable listing, one block per hit.
pub fn write_hits<W: Write>(mut out: W, query: &str, hits: &[SearchHit]) -> Result<()> {
    if hits.is_empty() {
        writeln!(out, "{} {}", "No results for".dimmed(), query.bold())?;
        return Ok(());
    }
    writeln!(out, "{} result(s) for {}", hits.len(), query.bold())?;
    for hit in hits {
        writeln!(out)?;
        let year = hit
            .year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "n.d.".to_string());
        writeln!(
            out,
            "{:>3}. {} ({})",
            hit.rank,
            truncate(&hit.title, TITLE_WIDTH).bold(),
            year.cyan()
        )?;
        if !hit.authors.is_empty() {
            writeln!(out, "     {}", truncate(&hit.authors, AUTHORS_WIDTH).dimmed())?;
        }
        let mut scores = format!("score {:.4}", hit.score);
        if let Some(rerank) = hit.rerank_score {
            scores.push_str(&format!("  rerank {rerank:.4}"));
        }
        writeln!(out, "     {}", scores.green())?;
        if let Some(link) = &hit.pdf_link {
            writeln!(out, "     {}", link.blue().underline())?;
        }
        if !hit.abstract_text.is_empty() {
            writeln!(out, "     {}", truncate(&hit.abstract_text, ABSTRACT_WIDTH))?;
        }
    }
    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}
