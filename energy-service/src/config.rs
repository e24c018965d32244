use std::fs;

use anyhow::{bail, Context};
use energy_client::analytics::AnalysisConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub uri: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_true")]
    pub create_if_missing: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Wipe the table before loading, so the store mirrors the input file.
    #[serde(default = "default_true")]
    pub replace_existing: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_retries: 3,
            retry_backoff_ms: 200,
            replace_existing: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    pub api: Option<ApiConfig>,
    #[serde(default)]
    pub loader: LoaderConfig,
    pub metrics: Option<MetricsConfig>,
}

fn default_max_connections() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        use std::env;

        let path = env::var("ENERGY_CONFIG").unwrap_or_else(|_| "energy-config.toml".to_string());
        let contents = fs::read_to_string(&path).with_context(|| format!("failed to read config file '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("invalid config file '{path}'"))
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if let Err(msg) = self.analysis.validate() {
            bail!("analysis: {msg}");
        }
        if self.loader.batch_size == 0 {
            bail!("loader: batch_size must be greater than zero");
        }
        if self.database.max_connections == 0 {
            bail!("database: max_connections must be greater than zero");
        }
        Ok(())
    }
}
