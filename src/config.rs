//! Configuration parsing and validation.
//!
//! The RAG core is configured via a TOML file (default: `config/rag.toml`).
//! The config defines the metadata-store path, the object-store backend,
//! chunking parameters, one or more named embedding providers, retrieval
//! tuning, the answer-synthesis provider, the workflow adapter's polling and
//! deadline knobs, and the HTTP bind address.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub object_store: ObjectStoreConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Named embedding providers. An asset records which one of these it used;
    /// mixing providers within one asset is forbidden (§4.2).
    #[serde(rename = "embedding", default)]
    pub embedding_providers: Vec<EmbeddingProviderConfig>,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStoreConfig {
    pub backend: ObjectStoreBackend,
    #[serde(default)]
    pub local: Option<LocalObjectStoreConfig>,
    #[serde(default)]
    pub s3: Option<S3ObjectStoreConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreBackend {
    Local,
    S3,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocalObjectStoreConfig {
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3ObjectStoreConfig {
    pub bucket: String,
    #[serde(default = "default_s3_region")]
    pub region: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_s3_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_min_tokens")]
    pub min_tokens: usize,
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f64,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            min_tokens: default_min_tokens(),
            target_tokens: default_target_tokens(),
            max_tokens: default_max_tokens(),
            overlap_ratio: default_overlap_ratio(),
        }
    }
}

fn default_min_tokens() -> usize {
    64
}
fn default_target_tokens() -> usize {
    384
}
fn default_max_tokens() -> usize {
    512
}
fn default_overlap_ratio() -> f64 {
    0.15
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,
    #[serde(default = "default_top_k_point")]
    pub default_top_k_point: i64,
    #[serde(default = "default_top_k_comprehensive")]
    pub default_top_k_comprehensive: i64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            default_top_k_point: default_top_k_point(),
            default_top_k_comprehensive: default_top_k_comprehensive(),
        }
    }
}

fn default_threshold() -> f32 {
    0.25
}
fn default_top_k_point() -> i64 {
    5
}
fn default_top_k_comprehensive() -> i64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingProviderConfig {
    /// Provider id recorded on every asset/chunk that uses it (§3).
    pub id: String,
    #[serde(default = "default_embedding_kind")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_embedding_kind() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default = "default_synthesis_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_synthesis_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            provider: default_synthesis_provider(),
            model: None,
            base_url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_synthesis_timeout_secs(),
        }
    }
}

fn default_synthesis_provider() -> String {
    "disabled".to_string()
}
fn default_synthesis_timeout_secs() -> u64 {
    60
}

impl SynthesisConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkflowConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_status_timeout_secs")]
    pub status_timeout_secs: u64,
    #[serde(default = "default_instance_deadline_secs")]
    pub instance_deadline_secs: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            status_timeout_secs: default_status_timeout_secs(),
            instance_deadline_secs: default_instance_deadline_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}
fn default_status_timeout_secs() -> u64 {
    60
}
fn default_instance_deadline_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

impl EmbeddingProviderConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    pub fn embedding_provider(&self, id: &str) -> Option<&EmbeddingProviderConfig> {
        self.embedding_providers.iter().find(|p| p.id == id)
    }

    pub fn default_embedding_provider(&self) -> Option<&EmbeddingProviderConfig> {
        self.embedding_providers.first()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.min_tokens == 0 {
        anyhow::bail!("chunking.min_tokens must be > 0");
    }
    if config.chunking.target_tokens < config.chunking.min_tokens {
        anyhow::bail!("chunking.target_tokens must be >= chunking.min_tokens");
    }
    if config.chunking.max_tokens < config.chunking.target_tokens {
        anyhow::bail!("chunking.max_tokens must be >= chunking.target_tokens");
    }
    if !(0.0..1.0).contains(&config.chunking.overlap_ratio) {
        anyhow::bail!("chunking.overlap_ratio must be in [0.0, 1.0)");
    }

    if !(0.0..=1.0).contains(&config.retrieval.default_threshold) {
        anyhow::bail!("retrieval.default_threshold must be in [0.0, 1.0]");
    }
    if config.retrieval.default_top_k_point < 1 {
        anyhow::bail!("retrieval.default_top_k_point must be >= 1");
    }

    match config.object_store.backend {
        ObjectStoreBackend::Local if config.object_store.local.is_none() => {
            anyhow::bail!("object_store.local must be set when backend = \"local\"");
        }
        ObjectStoreBackend::S3 if config.object_store.s3.is_none() => {
            anyhow::bail!("object_store.s3 must be set when backend = \"s3\"");
        }
        _ => {}
    }

    let mut seen_ids = std::collections::HashSet::new();
    for provider in &config.embedding_providers {
        if !seen_ids.insert(provider.id.as_str()) {
            anyhow::bail!("duplicate embedding provider id: '{}'", provider.id);
        }
        if provider.is_enabled() && provider.dims == 0 {
            anyhow::bail!("embedding '{}': dims must be > 0", provider.id);
        }
        match provider.provider.as_str() {
            "disabled" | "openai" | "ollama" | "local" => {}
            other => anyhow::bail!(
                "embedding '{}': unknown provider kind '{}'",
                provider.id,
                other
            ),
        }
    }

    match config.synthesis.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!("synthesis: unknown provider kind '{}'", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> &'static str {
        r#"
        [database]
        path = "./rag.db"

        [object_store]
        backend = "local"
        [object_store.local]
        root = "./blobs"

        [chunking]

        [[embedding]]
        id = "default"
        provider = "disabled"
        dims = 1

        [server]
        bind = "0.0.0.0:8080"
        "#
    }

    #[test]
    fn parses_minimal_config() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert!(validate(&config).is_ok());
        assert_eq!(config.chunking.target_tokens, 384);
        assert_eq!(config.retrieval.default_threshold, 0.25);
    }

    #[test]
    fn rejects_s3_backend_without_section() {
        let toml_str = minimal_toml().replace(
            "[object_store]\n        backend = \"local\"\n        [object_store.local]\n        root = \"./blobs\"",
            "[object_store]\n        backend = \"s3\"",
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_duplicate_embedding_ids() {
        let toml_str = format!(
            "{}\n\n[[embedding]]\nid = \"default\"\nprovider = \"disabled\"\ndims = 1\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }
}
