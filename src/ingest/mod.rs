//! Corpus ingestion: raw paper metadata → normalized JSONL corpus.
//!
//! Accepts CSV, TSV, a JSON array of objects, or JSONL. Recognized columns are
//! `id`, `title`, `abstract`, `authors`, `year` and `pdf_link`; anything else is
//! ignored. Values are cleaned the same way regardless of the input format:
//!
//! - missing title / abstract / authors become empty strings
//! - `year` accepts integers, integral floats (`2019.0`) and numeric strings;
//!   anything else is treated as unknown
//! - an empty `pdf_link` is absent
//! - a missing `id` is the row position
//! - `text` is `title + " \n " + abstract`

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::types::Paper;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported input format for {} (expected .csv, .tsv, .json or .jsonl)", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("row {row}: invalid id '{value}'")]
    InvalidId { row: usize, value: String },
    #[error("row {row}: expected a JSON object")]
    NotAnObject { row: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Tsv,
    Json,
    Jsonl,
}

impl InputFormat {
    pub fn from_path(path: &Path) -> Result<Self, IngestError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("csv") => Ok(Self::Csv),
            Some("tsv") | Some("tab") => Ok(Self::Tsv),
            Some("json") => Ok(Self::Json),
            Some("jsonl") | Some("ndjson") => Ok(Self::Jsonl),
            _ => Err(IngestError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Outcome of a preprocess run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IngestReport {
    pub rows: usize,
    pub with_year: usize,
    pub with_pdf_link: usize,
    pub output: PathBuf,
}

/// Read `input`, normalize every row, and write a JSONL corpus to `output`.
pub fn preprocess(input: &Path, output: &Path) -> Result<IngestReport> {
    let papers = read_papers(input)?;
    write_corpus(output, &papers)?;
    let report = IngestReport {
        rows: papers.len(),
        with_year: papers.iter().filter(|p| p.year.is_some()).count(),
        with_pdf_link: papers.iter().filter(|p| p.pdf_link.is_some()).count(),
        output: output.to_path_buf(),
    };
    info!(
        rows = report.rows,
        input = %input.display(),
        output = %output.display(),
        "corpus preprocessed"
    );
    Ok(report)
}

/// Read and normalize raw metadata in any supported format.
pub fn read_papers(input: &Path) -> Result<Vec<Paper>> {
    let format = InputFormat::from_path(input)?;
    let records = read_records(input, format)?;
    debug!(rows = records.len(), ?format, "raw records read");
    records
        .iter()
        .enumerate()
        .map(|(row, record)| normalize_record(row, record).map_err(anyhow::Error::from))
        .collect()
}

fn read_records(input: &Path, format: InputFormat) -> Result<Vec<Map<String, Value>>> {
    let file = File::open(input).with_context(|| format!("open {}", input.display()))?;
    match format {
        InputFormat::Csv => read_delimited(file, b','),
        InputFormat::Tsv => read_delimited(file, b'\t'),
        InputFormat::Json => {
            let rows: Vec<Value> = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parse JSON array in {}", input.display()))?;
            rows.into_iter()
                .enumerate()
                .map(|(row, v)| match v {
                    Value::Object(map) => Ok(map),
                    _ => Err(anyhow::Error::from(IngestError::NotAnObject { row })),
                })
                .collect()
        }
        InputFormat::Jsonl => {
            let mut rows = Vec::new();
            for (line_no, line) in BufReader::new(file).lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(&line)
                    .with_context(|| format!("parse line {} of {}", line_no + 1, input.display()))?;
                match value {
                    Value::Object(map) => rows.push(map),
                    _ => return Err(IngestError::NotAnObject { row: rows.len() }.into()),
                }
            }
            Ok(rows)
        }
    }
}

fn read_delimited(file: File, delimiter: u8) -> Result<Vec<Map<String, Value>>> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(file);
    let headers: Vec<String> = reader
        .headers()
        .context("read header row")?
        .iter()
        .map(|h| h.trim().to_ascii_lowercase())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.context("read delimited row")?;
        let map = headers
            .iter()
            .zip(record.iter())
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(h, v)| (h.clone(), Value::String(v.to_string())))
            .collect();
        rows.push(map);
    }
    Ok(rows)
}

/// Turn one raw record into a [`Paper`]. `row` is the 0-based position.
pub fn normalize_record(row: usize, record: &Map<String, Value>) -> Result<Paper, IngestError> {
    let id = match record.get("id") {
        None | Some(Value::Null) => row as u64,
        Some(value) => parse_id(value).ok_or_else(|| IngestError::InvalidId {
            row,
            value: value.to_string(),
        })?,
    };

    let mut paper = Paper::new(
        id,
        string_field(record.get("title")),
        string_field(record.get("abstract")),
    );
    paper.authors = string_field(record.get("authors"));
    paper.year = record.get("year").and_then(parse_year);
    paper.pdf_link = Some(string_field(record.get("pdf_link")))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    Ok(paper)
}

fn string_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| string_field(Some(v)))
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        Some(other) => other.to_string(),
    }
}

fn parse_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| integral_f64(n.as_f64()?).and_then(|v| u64::try_from(v).ok())),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| integral_f64(s.parse().ok()?).and_then(|v| u64::try_from(v).ok()))
        }
        _ => None,
    }
}

/// Lenient year parsing: `2019`, `2019.0`, `"2019"`, `" 2019.0 "`.
pub fn parse_year(value: &Value) -> Option<i32> {
    let as_i64 = match value {
        Value::Number(n) => n.as_i64().or_else(|| integral_f64(n.as_f64()?)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| integral_f64(s.parse().ok()?))
        }
        _ => None,
    }?;
    i32::try_from(as_i64).ok()
}

fn integral_f64(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

pub fn write_corpus(output: &Path, papers: &[Paper]) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let file = File::create(output).with_context(|| format!("create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    for paper in papers {
        serde_json::to_writer(&mut writer, paper)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn obj(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn year_parsing_is_lenient() {
        assert_eq!(parse_year(&json!(2019)), Some(2019));
        assert_eq!(parse_year(&json!(2019.0)), Some(2019));
        assert_eq!(parse_year(&json!(" 2019.0 ")), Some(2019));
        assert_eq!(parse_year(&json!("2020")), Some(2020));
        assert_eq!(parse_year(&json!(2019.5)), None);
        assert_eq!(parse_year(&json!("unknown")), None);
        assert_eq!(parse_year(&json!(null)), None);
    }

    #[test]
    fn missing_fields_become_empty() {
        let paper = normalize_record(4, &obj(json!({"title": "Only a title"}))).unwrap();
        assert_eq!(paper.id, 4);
        assert_eq!(paper.abstract_text, "");
        assert_eq!(paper.authors, "");
        assert_eq!(paper.text, "Only a title \n ");
        assert_eq!(paper.pdf_link, None);
    }

    #[test]
    fn explicit_id_wins_and_bad_id_fails() {
        let paper = normalize_record(0, &obj(json!({"id": "17", "title": "x"}))).unwrap();
        assert_eq!(paper.id, 17);
        let paper = normalize_record(0, &obj(json!({"id": 9.0}))).unwrap();
        assert_eq!(paper.id, 9);
        assert!(matches!(
            normalize_record(3, &obj(json!({"id": "abc"}))),
            Err(IngestError::InvalidId { row: 3, .. })
        ));
    }

    #[test]
    fn empty_pdf_link_is_absent_and_author_lists_join() {
        let paper = normalize_record(
            0,
            &obj(json!({"pdf_link": "  ", "authors": ["Ada", "Grace"]})),
        )
        .unwrap();
        assert_eq!(paper.pdf_link, None);
        assert_eq!(paper.authors, "Ada, Grace");
    }

    #[test]
    fn csv_preprocess_writes_jsonl() -> Result<()> {
        let dir = tempdir()?;
        let input = dir.path().join("papers.csv");
        std::fs::write(
            &input,
            "title,abstract,authors,year,pdf_link\n\
             \"Deep RL\",\"Atari games, from pixels\",Mnih,2013.0,\n\
             Graphs,,,not-a-year,https://example.org/g.pdf\n",
        )?;
        let output = dir.path().join("out/corpus.jsonl");
        let report = preprocess(&input, &output)?;
        assert_eq!(report.rows, 2);
        assert_eq!(report.with_year, 1);
        assert_eq!(report.with_pdf_link, 1);

        let papers = read_papers(&output)?;
        assert_eq!(papers, read_papers(&input)?);
        assert_eq!(papers[0].id, 0);
        assert_eq!(papers[0].year, Some(2013));
        assert_eq!(papers[0].abstract_text, "Atari games, from pixels");
        assert_eq!(papers[1].id, 1);
        assert_eq!(papers[1].year, None);
        assert_eq!(papers[1].text, "Graphs \n ");
        Ok(())
    }

    #[test]
    fn tsv_and_json_inputs_are_supported() -> Result<()> {
        let dir = tempdir()?;
        let tsv = dir.path().join("papers.tsv");
        std::fs::write(&tsv, "id\ttitle\tyear\n5\tA, with comma\t2001\n")?;
        let papers = read_papers(&tsv)?;
        assert_eq!(papers[0].id, 5);
        assert_eq!(papers[0].title, "A, with comma");

        let json_path = dir.path().join("papers.json");
        std::fs::write(&json_path, r#"[{"title": "J", "year": 1999}]"#)?;
        assert_eq!(read_papers(&json_path)?[0].year, Some(1999));
        Ok(())
    }

    #[test]
    fn raw_jsonl_derives_text_and_ids() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("raw.jsonl");
        std::fs::write(
            &path,
            "{\"id\": \"12\", \"title\": \"Graph attention\", \"abstract\": \"Attention on graphs.\"}\n\
             \n\
             {\"title\": \"No id\", \"abstract\": \"Second row.\", \"year\": \"2020\"}\n",
        )?;
        let papers = read_papers(&path)?;
        assert_eq!(papers.len(), 2);
        assert_eq!(papers[0].id, 12);
        assert_eq!(papers[0].text, "Graph attention \n Attention on graphs.");
        assert_eq!(papers[1].id, 1);
        assert_eq!(papers[1].year, Some(2020));
        assert!(!papers[1].text.trim().is_empty());
        Ok(())
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = InputFormat::from_path(Path::new("papers.parquet")).unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat(_)));
    }
}
