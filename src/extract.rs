//! Query text from uploaded documents.
//!
//! Extraction never panics and never returns an error type: a document that
//! cannot be read yields [`Extracted::Failed`] with a reason the caller can show.
//! Successful text is already shaped into a query (NFC, collapsed whitespace,
//! capped length).

use std::path::Path;

use tracing::warn;

use crate::search::canonicalize::query_from_extracted_text;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extracted {
    Text(String),
    Failed { reason: String },
}

impl Extracted {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(t),
            Self::Failed { .. } => None,
        }
    }
}

/// Extract query text from a document on disk.
///
/// `.txt` and `.md` files are read directly; `.pdf` requires the `pdf` feature.
pub fn extract_query_text(path: &Path) -> Extracted {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let raw = match ext.as_deref() {
        Some("txt") | Some("md") | Some("markdown") | None => read_plain(path),
        Some("pdf") => read_pdf(path),
        Some(other) => Err(format!("unsupported document type '.{other}'")),
    };

    match raw {
        Ok(raw) => {
            let query = query_from_extracted_text(&raw);
            if query.is_empty() {
                Extracted::failed(format!("no text found in {}", path.display()))
            } else {
                Extracted::Text(query)
            }
        }
        Err(reason) => {
            warn!(path = %path.display(), %reason, "document text extraction failed");
            Extracted::Failed { reason }
        }
    }
}

fn read_plain(path: &Path) -> Result<String, String> {
    let bytes = std::fs::read(path).map_err(|e| format!("read {}: {e}", path.display()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(feature = "pdf")]
fn read_pdf(path: &Path) -> Result<String, String> {
    // pdf-extract can panic on malformed files; keep that inside this boundary.
    let owned = path.to_path_buf();
    match std::panic::catch_unwind(move || pdf_extract::extract_text(&owned)) {
        Ok(Ok(text)) => Ok(text),
        Ok(Err(e)) => Err(format!("parse PDF {}: {e}", path.display())),
        Err(_) => Err(format!("PDF parser crashed on {}", path.display())),
    }
}

#[cfg(not(feature = "pdf"))]
fn read_pdf(path: &Path) -> Result<String, String> {
    Err(format!(
        "cannot read {}: PDF support is not compiled in (enable the `pdf` feature)",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn text_file_is_normalized() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abstract.txt");
        std::fs::write(&path, "  Graph   neural\n\nnetworks  ").unwrap();
        assert_eq!(
            extract_query_text(&path),
            Extracted::Text("Graph neural networks".into())
        );
    }

    #[test]
    fn missing_file_fails_with_reason() {
        let dir = tempdir().unwrap();
        let result = extract_query_text(&dir.path().join("missing.txt"));
        assert!(matches!(result, Extracted::Failed { ref reason } if reason.contains("missing.txt")));
        assert!(result.text().is_none());
    }

    #[test]
    fn empty_document_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blank.md");
        std::fs::write(&path, " \n\t ").unwrap();
        assert!(matches!(extract_query_text(&path), Extracted::Failed { .. }));
    }

    #[test]
    fn unsupported_extension_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("slides.pptx");
        std::fs::write(&path, b"PK").unwrap();
        let result = extract_query_text(&path);
        assert!(matches!(result, Extracted::Failed { ref reason } if reason.contains(".pptx")));
    }

    #[cfg(not(feature = "pdf"))]
    #[test]
    fn pdf_without_feature_fails_cleanly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("paper.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let result = extract_query_text(&path);
        assert!(matches!(result, Extracted::Failed { ref reason } if reason.contains("pdf")));
    }
}
