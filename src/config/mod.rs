//! Engine configuration.

mod file_config;

pub use file_config::{EngineFileConfig, FileConfig};

use std::path::PathBuf;

use anyhow::Result;

/// Settings consumed by the engine itself.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Seconds between reconciliation sweeps. The per-task admission
    /// intervals live on the tasks themselves.
    pub sweep_interval_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 300,
        }
    }
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Ledger database file.
    pub db_path: PathBuf,
    pub engine: EngineSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("seedmill.db"),
            engine: EngineSettings::default(),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from an optional TOML file config. File values
    /// override defaults where present.
    pub fn resolve(file_config: Option<FileConfig>) -> Result<Self> {
        let mut config = Self::default();
        let Some(file_config) = file_config else {
            return Ok(config);
        };
        if let Some(db_path) = file_config.db_path {
            config.db_path = db_path;
        }
        if let Some(engine) = file_config.engine {
            if let Some(sweep) = engine.sweep_interval_secs {
                config.engine.sweep_interval_secs = sweep;
            }
        }
        Ok(config)
    }
}
