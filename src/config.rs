use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Main configuration structure for portfolio-workflow
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PortfolioWorkflowConfig {
    /// Where workflows, operations and tokens are stored
    pub storage: StorageConfig,
    /// Production / mock switches
    pub mode: ModeConfig,
    /// Progress refresher settings
    pub progress: ProgressConfig,
    /// Token generation settings
    pub tokens: TokenConfig,
    /// Conversion rates for the currency command
    pub currency: CurrencyConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    Http,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory holding the JSON collections
    pub data_dir: PathBuf,
    /// REST backend root, required for the http backend
    pub api_base_url: Option<String>,
    /// Outgoing request budget for the http backend
    pub requests_per_second: u32,
    /// How long reads by id are cached
    pub cache_ttl_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::File,
            data_dir: PathBuf::from(".portfolio-workflow"),
            api_base_url: None,
            requests_per_second: 10,
            cache_ttl_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ModeConfig {
    /// Production deployments never read or write local fallback data
    pub production_mode: bool,
    /// Allow the local fallback when the backend is unreachable
    pub allow_mocks: bool,
}

impl Default for ModeConfig {
    fn default() -> Self {
        Self {
            production_mode: false,
            allow_mocks: true,
        }
    }
}

impl ModeConfig {
    pub fn fallback_allowed(&self) -> bool {
        self.allow_mocks && !self.production_mode
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Tick of the progress refresher
    pub refresh_interval_seconds: u64,
    /// Assumed duration of a step without its own estimate
    pub default_step_duration_hours: u32,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 30,
            default_step_duration_hours: 7 * 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Length of generated tokens
    pub length: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self { length: 8 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CurrencyConfig {
    /// Currency every rate is quoted against
    pub base: String,
    /// Units of each currency per one unit of the base currency
    pub rates: BTreeMap<String, f64>,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        let rates = [("XOF", 655.957), ("USD", 1.08), ("GBP", 0.85)]
            .into_iter()
            .map(|(code, rate)| (code.to_string(), rate))
            .collect();
        Self {
            base: "EUR".to_string(),
            rates,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default log filter when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human readable logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl PortfolioWorkflowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (portfolio-workflow.toml, or `path` when given)
    /// 3. Environment variables (prefixed with PORTFOLIO_WORKFLOW__)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Missing keys fall back to the serde defaults above
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path));
            }
            None if Path::new("portfolio-workflow.toml").exists() => {
                builder = builder.add_source(File::with_name("portfolio-workflow"));
            }
            None => {}
        }

        builder = builder.add_source(
            Environment::with_prefix("PORTFOLIO_WORKFLOW")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        Ok(config.try_deserialize()?)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn default_step_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.progress.default_step_duration_hours))
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.progress.refresh_interval_seconds.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = PortfolioWorkflowConfig::default();
        assert_eq!(config.progress.refresh_interval_seconds, 30);
        assert_eq!(config.default_step_duration(), chrono::Duration::days(7));
        assert_eq!(config.tokens.length, 8);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(config.mode.fallback_allowed());
    }

    #[test]
    fn test_production_mode_disables_fallback() {
        let mode = ModeConfig {
            production_mode: true,
            allow_mocks: true,
        };
        assert!(!mode.fallback_allowed());
    }

    #[test]
    fn test_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("portfolio-workflow.toml");

        let mut config = PortfolioWorkflowConfig::default();
        config.storage.backend = StorageBackend::Memory;
        config.tokens.length = 12;
        config.save_to_file(&path).unwrap();

        let loaded = PortfolioWorkflowConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.storage.backend, StorageBackend::Memory);
        assert_eq!(loaded.tokens.length, 12);
        assert_eq!(loaded.currency.base, "EUR");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("partial.toml");
        std::fs::write(&path, "[progress]\nrefresh_interval_seconds = 5\n").unwrap();

        let loaded = PortfolioWorkflowConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.progress.refresh_interval_seconds, 5);
        assert_eq!(loaded.progress.default_step_duration_hours, 168);
    }
}
