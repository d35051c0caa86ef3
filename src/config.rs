//! # CLI configuration
//!
//! Everything the binary needs beyond [`deepflow::EngineConfig`]: which
//! Ollama models to register with the router, and at which tier.
//!
//! ```text
//! DEEPFLOW_MODELS=llama3.2@1,qwen2.5:14b@2
//! OLLAMA_API_BASE_URL=http://localhost:11434
//! DEEPFLOW_TEMPERATURE=0.3
//! DEEPFLOW_CONFIG=./deepflow.yaml
//! ```

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// One `name@tier` entry of `DEEPFLOW_MODELS`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub tier: u8,
}

impl FromStr for ModelSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, tier) = match s.rsplit_once('@') {
            Some((name, tier)) => (
                name.trim(),
                tier.trim()
                    .parse::<u8>()
                    .with_context(|| format!("model '{}' has an invalid tier '{}'", name, tier))?,
            ),
            None => (s, 1),
        };
        if name.is_empty() {
            anyhow::bail!("model entry '{}' has no name", s);
        }
        if tier == 0 {
            anyhow::bail!("model '{}' must be tier 1 or above", name);
        }
        Ok(Self {
            name: name.to_string(),
            tier,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Models registered as router backends
    pub models: Vec<ModelSpec>,

    /// Ollama server URL
    pub ollama_host: String,

    /// Sampling temperature for every registered model
    pub temperature: f64,

    /// Optional engine config file; `DEEPFLOW_*` variables still apply on top
    pub engine_config: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            models: vec![ModelSpec {
                name: "llama3.2".to_string(),
                tier: 1,
            }],
            ollama_host: "http://localhost:11434".to_string(),
            temperature: 0.3,
            engine_config: None,
        }
    }
}

/// Parse a comma-separated `name@tier` list
pub fn parse_models(raw: &str) -> Result<Vec<ModelSpec>> {
    raw.split(',')
        .filter(|s| !s.trim().is_empty())
        .map(ModelSpec::from_str)
        .collect()
}

impl CliConfig {
    /// Defaults overridden by the environment (call after `dotenvy`)
    pub fn from_env() -> Result<Self> {
        let mut config = CliConfig::default();

        if let Ok(val) = env::var("DEEPFLOW_MODELS") {
            config.models = parse_models(&val).context("DEEPFLOW_MODELS must look like 'llama3.2@1,qwen2.5@2'")?;
        }

        if let Ok(val) = env::var("OLLAMA_API_BASE_URL") {
            config.ollama_host = val;
        }

        if let Ok(val) = env::var("DEEPFLOW_TEMPERATURE") {
            config.temperature = val
                .parse()
                .context("DEEPFLOW_TEMPERATURE must be a valid floating-point number (e.g., 0.3)")?;
        }

        if let Ok(val) = env::var("DEEPFLOW_CONFIG") {
            config.engine_config = Some(PathBuf::from(val));
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            anyhow::bail!("Temperature must be between 0.0 and 2.0, got: {}", self.temperature);
        }

        if self.models.is_empty() {
            anyhow::bail!("DEEPFLOW_MODELS names no models");
        }

        if !self.ollama_host.starts_with("http://") && !self.ollama_host.starts_with("https://") {
            anyhow::bail!("OLLAMA_API_BASE_URL must be an http(s) URL, got: {}", self.ollama_host);
        }

        Ok(())
    }

    /// Engine config from the optional file, then `DEEPFLOW_*` overrides
    pub fn engine(&self) -> Result<deepflow::EngineConfig> {
        let base = match &self.engine_config {
            Some(path) => deepflow::EngineConfig::from_yaml_file(path)
                .with_context(|| format!("failed to read engine config {}", path.display()))?,
            None => deepflow::EngineConfig::default(),
        };
        base.merge_env().context("invalid DEEPFLOW_* environment")
    }
}
