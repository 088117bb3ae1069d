pub mod config;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod output;
pub mod search;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing::warn;

use crate::config::Config;
use crate::extract::{Extracted, extract_query_text};
use crate::model::types::SearchHit;
use crate::search::builder::{BuildOptions, IndexBuilder};
use crate::search::embedder_registry::EmbedderRegistry;
use crate::search::filters::{KeywordFilter, YearRange};
use crate::search::model_manager::{detect_availability, load_engine, resolve_build_embedder};
use crate::search::query::{QueryEngine, SearchRequest};
use crate::search::reranker_registry::RerankerRegistry;

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "paper-search",
    version,
    about = "Semantic search over research paper metadata"
)]
pub struct Cli {
    /// Data directory holding models/ and index/ (defaults to platform data dir)
    #[arg(long, global = true, env = "PAPER_SEARCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Config file (defaults to <config_dir>/config.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Normalize CSV/TSV/JSON/JSONL metadata into a JSONL corpus
    Preprocess {
        input: PathBuf,
        output: PathBuf,
    },
    /// Embed a corpus and build the index artifacts
    Index {
        /// Corpus file (JSONL from `preprocess`, or raw CSV/TSV/JSON)
        #[arg(long)]
        corpus: PathBuf,

        /// Embedder name (see `models`); defaults to the best installed
        #[arg(long)]
        embedder: Option<String>,

        /// Vector storage precision in the index (f32 or f16)
        #[arg(long)]
        quantization: Option<String>,

        /// Texts per embedding batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Print the build report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search the index with free text or a document
    Search {
        /// Query text
        #[arg(required_unless_present = "from_file")]
        query: Option<String>,

        /// Use text extracted from this document as the query
        #[arg(long, conflicts_with = "query")]
        from_file: Option<PathBuf>,

        #[command(flatten)]
        opts: QueryOpts,
    },
    /// Run many queries concurrently, one per line of a file
    Batch {
        /// File with one query per line
        #[arg(long)]
        queries: PathBuf,

        #[command(flatten)]
        opts: QueryOpts,
    },
    /// List embedders and rerankers and whether their files are installed
    Models {
        #[arg(long)]
        json: bool,
    },
    /// Show index and model availability
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

#[derive(clap::Args, Debug, Clone)]
pub struct QueryOpts {
    /// Number of neighbors retrieved before filtering
    #[arg(long, short = 'k')]
    pub top_k: Option<usize>,

    /// Publication year window, e.g. 2020..2024 (papers without a year pass)
    #[arg(long, allow_hyphen_values = true)]
    pub years: Option<YearRange>,

    /// Comma-separated keywords that must all appear in title or abstract
    #[arg(long)]
    pub keywords: Option<String>,

    /// Skip cross-encoder reranking
    #[arg(long)]
    pub no_rerank: bool,

    /// Emit JSON instead of a listing
    #[arg(long)]
    pub json: bool,
}

impl QueryOpts {
    fn request(&self, query: impl Into<String>, config: &Config) -> SearchRequest {
        let mut request = SearchRequest::new(query)
            .top_k(self.top_k.unwrap_or(config.top_k))
            .rerank(config.rerank && !self.no_rerank);
        request.years = self.years;
        if let Some(list) = &self.keywords {
            request.keywords = KeywordFilter::parse_list(list);
        }
        request
    }
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(cli.verbose, cli.log_file.as_deref())?;
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }

    match cli.command {
        Commands::Preprocess { input, output } => run_preprocess(&input, &output),
        Commands::Index {
            corpus,
            embedder,
            quantization,
            batch_size,
            json,
        } => {
            if embedder.is_some() {
                config.embedder = embedder;
            }
            if let Some(q) = quantization {
                config.quantization = q;
            }
            if let Some(b) = batch_size {
                config.batch_size = b;
            }
            config.validate()?;
            run_index(&config, &corpus, json)
        }
        Commands::Search {
            query,
            from_file,
            opts,
        } => run_search(&config, query, from_file, &opts),
        Commands::Batch { queries, opts } => run_batch(&config, &queries, &opts).await,
        Commands::Models { json } => run_models(&config, json),
        Commands::Status { json } => run_status(&config, json),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "paper-search", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn run_preprocess(input: &Path, output: &Path) -> Result<()> {
    let report = ingest::preprocess(input, output)?;
    println!(
        "wrote {} papers to {} ({} with year, {} with pdf link)",
        report.rows,
        report.output.display(),
        report.with_year,
        report.with_pdf_link
    );
    Ok(())
}

fn run_index(config: &Config, corpus: &Path, json: bool) -> Result<()> {
    let papers = ingest::read_papers(corpus)?;
    let embedder = resolve_build_embedder(config)?;
    let options = BuildOptions {
        quantization: config.quantization()?,
        batch_size: config.batch_size,
        show_progress: !json,
    };
    let report = IndexBuilder::new(embedder)
        .with_options(options)
        .build(papers, &config.artifact_paths())?;

    if json {
        output::write_json(std::io::stdout().lock(), &report)?;
    } else {
        println!(
            "indexed {} papers with {} ({}-d, {}) into {}",
            report.count,
            report.embedder_id,
            report.dimension,
            report.quantization,
            report.artifact_dir.display()
        );
    }
    Ok(())
}

fn run_search(
    config: &Config,
    query: Option<String>,
    from_file: Option<PathBuf>,
    opts: &QueryOpts,
) -> Result<()> {
    let query = match (query, from_file) {
        (Some(q), _) => q,
        (None, Some(path)) => match extract_query_text(&path) {
            Extracted::Text(text) => text,
            Extracted::Failed { reason } => bail!("could not use {} as a query: {reason}", path.display()),
        },
        (None, None) => bail!("a query or --from-file is required"),
    };

    let engine = load_engine(config)?;
    let hits = engine.search(&opts.request(query.as_str(), config))?;
    if opts.json {
        output::write_json(std::io::stdout().lock(), &output::QueryOutput::new(&query, &hits))
    } else {
        output::write_hits(std::io::stdout().lock(), &query, &hits)
    }
}

#[derive(Debug, Serialize)]
struct BatchEntry {
    query: String,
    count: usize,
    hits: Vec<SearchHit>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn run_batch(config: &Config, queries_path: &Path, opts: &QueryOpts) -> Result<()> {
    let raw = std::fs::read_to_string(queries_path)
        .with_context(|| format!("read queries from {}", queries_path.display()))?;
    let queries: Vec<String> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let engine: Arc<QueryEngine> = Arc::new(load_engine(config)?);
    let mut handles = Vec::with_capacity(queries.len());
    for query in queries {
        let engine = Arc::clone(&engine);
        let request = opts.request(query.as_str(), config);
        handles.push(tokio::task::spawn_blocking(move || {
            let result = engine.search(&request);
            (query, result)
        }));
    }

    let mut entries = Vec::with_capacity(handles.len());
    for handle in handles {
        let (query, result) = handle.await.context("batch query task panicked")?;
        let entry = match result {
            Ok(hits) => BatchEntry {
                query,
                count: hits.len(),
                hits,
                error: None,
            },
            Err(err) => {
                warn!(%query, error = %err, "batch query failed");
                BatchEntry {
                    query,
                    count: 0,
                    hits: Vec::new(),
                    error: Some(err.to_string()),
                }
            }
        };
        entries.push(entry);
    }

    if opts.json {
        return output::write_json(std::io::stdout().lock(), &entries);
    }
    let mut out = std::io::stdout().lock();
    for entry in &entries {
        match &entry.error {
            Some(err) => writeln!(out, "{} {}: {err}", "error".red().bold(), entry.query)?,
            None => output::write_hits(&mut out, &entry.query, &entry.hits)?,
        }
        writeln!(out)?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ModelRow {
    kind: &'static str,
    name: &'static str,
    id: &'static str,
    available: bool,
    description: &'static str,
}

fn run_models(config: &Config, json: bool) -> Result<()> {
    let embedders = EmbedderRegistry::new(&config.data_dir);
    let rerankers = RerankerRegistry::new(&config.data_dir);
    let mut rows: Vec<ModelRow> = embedders
        .all()
        .iter()
        .map(|e| ModelRow {
            kind: "embedder",
            name: e.name,
            id: e.id,
            available: e.is_available(&config.data_dir),
            description: e.description,
        })
        .collect();
    rows.extend(rerankers.all().iter().map(|r| ModelRow {
        kind: "reranker",
        name: r.name,
        id: r.id,
        available: r.is_available(&config.data_dir),
        description: r.description,
    }));

    if json {
        return output::write_json(std::io::stdout().lock(), &rows);
    }
    for row in rows {
        let badge = if row.available {
            "installed".green()
        } else {
            "missing".yellow()
        };
        println!(
            "{:<9} {:<20} {:<28} {:<10} {}",
            row.kind,
            row.name.bold(),
            row.id,
            badge,
            row.description.dimmed()
        );
    }
    Ok(())
}

fn run_status(config: &Config, json: bool) -> Result<()> {
    let availability = detect_availability(config);
    let paths = config.artifact_paths();
    if json {
        let value = serde_json::json!({
            "data_dir": config.data_dir,
            "index_dir": paths.dir(),
            "status": availability.status_label(),
            "summary": availability.summary(),
            "can_search": availability.can_search(),
            "rerank": config.rerank,
            "reranker": config.reranker,
        });
        return output::write_json(std::io::stdout().lock(), &value);
    }
    println!("data dir:  {}", config.data_dir.display());
    println!("index dir: {}", paths.dir().display());
    let label = if availability.can_search() {
        availability.status_label().green()
    } else {
        availability.status_label().red()
    };
    println!("status:    {} {}", label, availability.summary());
    Ok(())
}
