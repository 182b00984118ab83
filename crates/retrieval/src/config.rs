use crate::error::{Result, RetrievalError};
use finrag_vector_store::paths::default_data_dir;
use finrag_vector_store::{EmbeddingConfig, EmbeddingMode, RemoteConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.7;

/// Which vector index backs the service.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Flat,
    Remote,
}

impl BackendKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Remote => "remote",
        }
    }
}

impl FromStr for BackendKind {
    type Err = RetrievalError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "flat" | "local" | "faiss" => Ok(Self::Flat),
            "remote" | "pinecone" => Ok(Self::Remote),
            other => Err(RetrievalError::ConfigError(format!(
                "Unsupported vector store backend '{other}' (expected 'flat' or 'remote')"
            ))),
        }
    }
}

/// What a persistence failure after a completed in-memory add means for the caller.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Durability {
    /// Log the failure and keep the in-memory mutation; the add still succeeds.
    #[default]
    BestEffort,
    /// Roll the in-memory index and store back and report failure.
    Strict,
}

impl FromStr for Durability {
    type Err = RetrievalError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "best_effort" => Ok(Self::BestEffort),
            "strict" => Ok(Self::Strict),
            other => Err(RetrievalError::ConfigError(format!(
                "Unsupported durability '{other}' (expected 'best_effort' or 'strict')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrievalConfig {
    pub data_dir: PathBuf,
    pub backend: BackendKind,
    /// Top scores at or below this report confidence 0.
    pub confidence_threshold: f32,
    pub durability: Durability,
    pub embedding: EmbeddingConfig,
    pub remote: RemoteConfig,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backend: BackendKind::Flat,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            durability: Durability::BestEffort,
            embedding: EmbeddingConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl RetrievalConfig {
    /// Defaults, overlaid with the TOML file at `path` when one is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path).map_err(|err| {
            RetrievalError::ConfigError(format!("Failed to read {}: {err}", path.display()))
        })?;
        let config = Self::from_toml_str(&raw)
            .map_err(|err| RetrievalError::ConfigError(format!("{}: {err}", path.display())))?;
        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse without validating; later layers may still fix what the file leaves out.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| RetrievalError::ConfigError(format!("TOML parse error: {err}")))
    }

    /// Apply `FINRAG_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply `FINRAG_*` overrides from `lookup`; blank values are ignored.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get("FINRAG_DATA_DIR") {
            self.data_dir = PathBuf::from(value);
        }
        if let Some(value) = get("FINRAG_VECTOR_STORE") {
            self.backend = value.parse()?;
        }
        if let Some(value) = get("FINRAG_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = parse_threshold(&value)?;
        }
        if let Some(value) = get("FINRAG_DURABILITY") {
            self.durability = value.parse()?;
        }
        if let Some(value) = get("FINRAG_EMBEDDING_MODE") {
            self.embedding.mode = value
                .parse::<EmbeddingMode>()
                .map_err(|err| RetrievalError::ConfigError(err.to_string()))?;
        }
        if let Some(value) = get("FINRAG_EMBEDDING_MODEL") {
            self.embedding.model_id = value;
        }
        if let Some(value) = get("FINRAG_MODEL_DIR") {
            self.embedding.model_dir = PathBuf::from(value);
        }
        if let Some(value) = get("FINRAG_REMOTE_URL") {
            self.remote.base_url = Some(value);
        }
        if let Some(value) = get("FINRAG_REMOTE_API_KEY") {
            self.remote.api_key = Some(value);
        }
        if let Some(value) = get("FINRAG_REMOTE_INDEX") {
            self.remote.index_name = value;
        }
        Ok(())
    }

    /// Check the fully layered config before anything is opened.
    pub fn validate(&self) -> Result<()> {
        check_threshold(self.confidence_threshold)?;
        if self.embedding.dimension == 0 {
            return Err(RetrievalError::ConfigError(
                "embedding.dimension must be positive".to_string(),
            ));
        }
        if self.backend == BackendKind::Remote && self.remote.base_url.is_none() {
            return Err(RetrievalError::ConfigError(
                "remote backend selected but remote.base_url is not set".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn parse_threshold(raw: &str) -> Result<f32> {
    let value = raw.trim().parse::<f32>().map_err(|err| {
        RetrievalError::ConfigError(format!("Invalid confidence threshold '{raw}': {err}"))
    })?;
    check_threshold(value)?;
    Ok(value)
}

pub(crate) fn check_threshold(value: f32) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(RetrievalError::ConfigError(format!(
            "confidence_threshold must be within [0, 1], got {value}"
        )))
    }
}
