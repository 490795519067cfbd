use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the workflow engine
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PartylineConfig {
    /// Correlated request-reply settings
    pub correlation: CorrelationConfig,
    /// Durable checkpoint store settings
    pub store: StoreConfig,
    /// Observability settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorrelationConfig {
    /// How long a workflow waits for a correlated reply before erroring
    pub timeout_ms: u64,
}

impl CorrelationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Directory for the file-backed store (one JSON document per key)
    pub directory: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Emit structured JSON logs instead of human-readable output
    pub json_logs: bool,
    /// Log level when RUST_LOG is unset
    pub log_level: String,
}

impl Default for PartylineConfig {
    fn default() -> Self {
        Self {
            correlation: CorrelationConfig { timeout_ms: 2000 },
            store: StoreConfig {
                directory: ".partyline/workflows".to_string(),
            },
            observability: ObservabilityConfig {
                json_logs: true,
                log_level: "info".to_string(),
            },
        }
    }
}

impl PartylineConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (partyline.toml)
    /// 3. Environment variables (prefixed with PARTYLINE_)
    pub fn load() -> Result<Self> {
        let defaults = Self::default();

        let mut builder = Config::builder()
            .set_default("correlation.timeout_ms", defaults.correlation.timeout_ms)?
            .set_default("store.directory", defaults.store.directory.clone())?
            .set_default("observability.json_logs", defaults.observability.json_logs)?
            .set_default(
                "observability.log_level",
                defaults.observability.log_level.clone(),
            )?;

        if Path::new("partyline.toml").exists() {
            builder = builder.add_source(File::with_name("partyline"));
        }

        builder = builder.add_source(
            Environment::with_prefix("PARTYLINE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<PartylineConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = PartylineConfig::load_env_file();
        PartylineConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static PartylineConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))
}

/// Initialize configuration (called at startup)
pub fn init_config() -> Result<()> {
    let _config = config()?;
    tracing::info!("Configuration loaded successfully");
    Ok(())
}
