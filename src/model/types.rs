//! Paper records and search results.

use serde::{Deserialize, Serialize};

use crate::search::canonicalize::{document_text, keyword_haystack, rerank_passage};

/// One paper in the corpus.
///
/// `id` is the join key between the embedding matrix and the metadata table;
/// `text` is what gets embedded and is not shown to users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: u64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: String,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub pdf_link: Option<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
}

impl Paper {
    /// Build a paper whose embedding text is derived from title and abstract.
    pub fn new(id: u64, title: impl Into<String>, abstract_text: impl Into<String>) -> Self {
        let title = title.into();
        let abstract_text = abstract_text.into();
        Self {
            id,
            text: document_text(&title, &abstract_text),
            title,
            authors: String::new(),
            year: None,
            pdf_link: None,
            abstract_text,
        }
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_authors(mut self, authors: impl Into<String>) -> Self {
        self.authors = authors.into();
        self
    }

    pub fn with_pdf_link(mut self, link: impl Into<String>) -> Self {
        self.pdf_link = Some(link.into());
        self
    }

    pub fn keyword_haystack(&self) -> String {
        keyword_haystack(&self.title, &self.abstract_text)
    }

    pub fn rerank_passage(&self) -> String {
        rerank_passage(&self.title, &self.abstract_text)
    }
}

/// One ranked search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// 1-based position in the final ordering.
    pub rank: usize,
    /// Row in the embedding matrix / metadata table.
    pub row: usize,
    pub id: u64,
    pub title: String,
    pub authors: String,
    pub year: Option<i32>,
    pub pdf_link: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Cosine similarity between query and paper, in [-1, 1].
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rerank_score: Option<f32>,
}

impl SearchHit {
    pub fn from_paper(paper: &Paper, row: usize, score: f32) -> Self {
        Self {
            rank: 0,
            row,
            id: paper.id,
            title: paper.title.clone(),
            authors: paper.authors.clone(),
            year: paper.year,
            pdf_link: paper.pdf_link.clone(),
            abstract_text: paper.abstract_text.clone(),
            score,
            rerank_score: None,
        }
    }

    /// Score that determines ordering: rerank score when present.
    pub fn effective_score(&self) -> f32 {
        self.rerank_score.unwrap_or(self.score)
    }

    pub fn keyword_haystack(&self) -> String {
        keyword_haystack(&self.title, &self.abstract_text)
    }

    pub fn rerank_passage(&self) -> String {
        rerank_passage(&self.title, &self.abstract_text)
    }
}
