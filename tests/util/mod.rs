use std::path::{Path, PathBuf};
use std::sync::Arc;

use paper_search::model::types::Paper;
use paper_search::search::builder::IndexBuilder;
use paper_search::search::hash_embedder::HashEmbedder;
use paper_search::search::store::IndexStore;
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Sets an environment variable and restores the previous value on drop.
/// Tests using it must be `#[serial]`.
#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

#[allow(dead_code)]
pub struct TempFixtureDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TempFixtureDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).expect("write fixture");
        path
    }
}

const TOPICS: &[(&str, &str)] = &[
    ("graph neural networks", "message passing over molecular graphs"),
    ("vision transformers", "patch embeddings for image classification"),
    ("reinforcement learning", "policy gradients for robotic control"),
    ("protein folding", "structure prediction from amino acid sequences"),
    ("speech recognition", "end to end acoustic models with attention"),
    ("federated learning", "privacy preserving training across devices"),
];

/// Deterministic paper corpus generator.
#[derive(Debug, Clone)]
pub struct PaperFixtureBuilder {
    count: usize,
    first_year: i32,
    missing_year_every: Option<usize>,
}

#[allow(dead_code)]
impl PaperFixtureBuilder {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            first_year: 2010,
            missing_year_every: None,
        }
    }

    pub fn first_year(mut self, year: i32) -> Self {
        self.first_year = year;
        self
    }

    /// Leave `year` unset on every n-th paper.
    pub fn missing_year_every(mut self, n: usize) -> Self {
        self.missing_year_every = Some(n.max(1));
        self
    }

    pub fn build(&self) -> Vec<Paper> {
        (0..self.count)
            .map(|i| {
                let (topic, detail) = TOPICS[i % TOPICS.len()];
                let mut paper = Paper::new(
                    (i as u64) * 10 + 1,
                    format!("On {topic}: study {i}"),
                    format!("We investigate {detail}. Variant {i} improves results."),
                )
                .with_authors(format!("Author {}, Author {}", i, i + 1));
                let skip_year = self.missing_year_every.is_some_and(|n| i % n == 0);
                if !skip_year {
                    paper.year = Some(self.first_year + (i % 15) as i32);
                }
                paper
            })
            .collect()
    }
}

/// The three-paper corpus used across pipeline tests.
#[allow(dead_code)]
pub fn three_papers() -> Vec<Paper> {
    vec![
        Paper::new(0, "Graph attention networks", "Attention over graph neighborhoods.")
            .with_year(2018),
        Paper::new(1, "Graph transformers", "Transformers for graph structured data.")
            .with_year(2021),
        Paper::new(2, "Scalable graph learning", "Sampling methods for large graphs.")
            .with_year(2023),
    ]
}

/// Build an in-memory store over `papers` with the hash embedder.
#[allow(dead_code)]
pub fn hash_store(papers: Vec<Paper>, dimension: usize) -> (Arc<IndexStore>, Arc<HashEmbedder>) {
    let embedder = Arc::new(HashEmbedder::new(dimension));
    let built = IndexBuilder::new(embedder.clone())
        .build_in_memory(papers)
        .expect("build index");
    let store = IndexStore::from_parts(built.index, built.metadata).expect("store");
    (Arc::new(store), embedder)
}

#[allow(dead_code)]
pub fn write_jsonl(path: &Path, papers: &[Paper]) {
    paper_search::ingest::write_corpus(path, papers).expect("write corpus");
}
