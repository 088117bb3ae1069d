//! Layered configuration: defaults → TOML file → environment → CLI flags.
//!
//! The config file lives at `<config_dir>/config.toml` (platform directories
//! from `directories`) unless `--config` points elsewhere. Environment
//! variables use the `PAPER_SEARCH_` prefix and are read through `dotenvy`, so a
//! `.env` file in the working directory also applies.
//!
//! ```toml
//! data_dir = "/srv/papers"
//! embedder = "minilm"
//! reranker = "ms-marco"
//! top_k = 20
//! rerank = true
//! quantization = "f16"
//! batch_size = 128
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::search::artifacts::ArtifactPaths;
use crate::search::builder::DEFAULT_BATCH_SIZE;
use crate::search::query::DEFAULT_TOP_K;
use crate::search::reranker_registry::DEFAULT_RERANKER;
use crate::search::vector_index::Quantization;

pub const ENV_DATA_DIR: &str = "PAPER_SEARCH_DATA_DIR";
pub const ENV_EMBEDDER: &str = "PAPER_SEARCH_EMBEDDER";
pub const ENV_RERANKER: &str = "PAPER_SEARCH_RERANKER";
pub const ENV_TOP_K: &str = "PAPER_SEARCH_TOP_K";
pub const ENV_RERANK: &str = "PAPER_SEARCH_RERANK";
pub const ENV_QUANTIZATION: &str = "PAPER_SEARCH_QUANTIZATION";
pub const ENV_BATCH_SIZE: &str = "PAPER_SEARCH_BATCH_SIZE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Artifact directory; `<data_dir>/index` when unset.
    pub index_dir: Option<PathBuf>,
    /// Embedder name for builds. Unset picks the best installed model and
    /// falls back to the hash embedder.
    pub embedder: Option<String>,
    pub reranker: String,
    pub top_k: usize,
    pub rerank: bool,
    pub quantization: String,
    pub batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index_dir: None,
            embedder: None,
            reranker: DEFAULT_RERANKER.to_string(),
            top_k: DEFAULT_TOP_K,
            rerank: true,
            quantization: Quantization::F32.as_str().to_string(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Config {
    /// Defaults, then the config file (explicit path or the platform default
    /// if present), then environment variables.
    pub fn load(explicit_file: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match explicit_file {
            Some(path) => Self::from_file(path)?,
            None => match default_config_file().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env_with(|key| dotenvy::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Overlay values from `lookup` (normally the process environment).
    pub fn apply_env_with<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get(ENV_EMBEDDER) {
            self.embedder = Some(v.trim().to_string());
        }
        if let Some(v) = get(ENV_RERANKER) {
            self.reranker = v.trim().to_string();
        }
        if let Some(v) = get(ENV_TOP_K) {
            self.top_k = parse_usize(ENV_TOP_K, &v)?;
        }
        if let Some(v) = get(ENV_RERANK) {
            self.rerank = parse_bool(ENV_RERANK, &v)?;
        }
        if let Some(v) = get(ENV_QUANTIZATION) {
            self.quantization = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = get(ENV_BATCH_SIZE) {
            self.batch_size = parse_usize(ENV_BATCH_SIZE, &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.quantization()?;
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "batch_size",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    pub fn quantization(&self) -> ConfigResult<Quantization> {
        self.quantization
            .parse()
            .map_err(|e: anyhow::Error| ConfigError::Invalid {
                key: "quantization",
                value: self.quantization.clone(),
                reason: e.to_string(),
            })
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        match &self.index_dir {
            Some(dir) => ArtifactPaths::new(dir),
            None => ArtifactPaths::in_data_dir(&self.data_dir),
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("org", "paper-search", "paper-search")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".paper-search"))
}

pub fn default_config_file() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "paper-search", "paper-search")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn parse_usize(key: &'static str, value: &str) -> ConfigResult<usize> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: "expected a non-negative integer".into(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected true/false".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.top_k, 10);
        assert!(config.rerank);
        assert_eq!(config.reranker, "ms-marco");
        assert_eq!(config.quantization().unwrap(), Quantization::F32);
        assert!(config.embedder.is_none());
        assert!(config.artifact_paths().dir().ends_with("index"));
    }

    #[test]
    fn toml_overrides_defaults_and_keeps_the_rest() {
        let config = Config::from_toml_str("top_k = 25\nquantization = \"f16\"\n").unwrap();
        assert_eq!(config.top_k, 25);
        assert_eq!(config.quantization().unwrap(), Quantization::F16);
        assert!(config.rerank);
    }

    #[test]
    fn toml_rejects_unknown_keys() {
        assert!(Config::from_toml_str("topk = 3").is_err());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config::from_toml_str("top_k = 25\nrerank = true").unwrap();
        config
            .apply_env_with(env(&[
                (ENV_TOP_K, "3"),
                (ENV_RERANK, "off"),
                (ENV_EMBEDDER, "hash"),
                (ENV_DATA_DIR, "/tmp/papers"),
            ]))
            .unwrap();
        assert_eq!(config.top_k, 3);
        assert!(!config.rerank);
        assert_eq!(config.embedder.as_deref(), Some("hash"));
        assert_eq!(config.artifact_paths().dir(), Path::new("/tmp/papers/index"));
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env_with(env(&[(ENV_TOP_K, "  ")])).unwrap();
        assert_eq!(config.top_k, DEFAULT_TOP_K);
    }

    #[test]
    fn invalid_env_values_are_reported() {
        let mut config = Config::default();
        let err = config.apply_env_with(env(&[(ENV_TOP_K, "many")])).unwrap_err();
        assert!(err.to_string().contains(ENV_TOP_K));

        let err = config.apply_env_with(env(&[(ENV_RERANK, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_RERANK, .. }));
    }

    #[test]
    fn invalid_quantization_fails_validation() {
        let config = Config {
            quantization: "int4".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = Config::load(Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
