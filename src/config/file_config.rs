//! TOML file configuration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Raw engine configuration as read from a TOML file. All fields optional;
/// missing values fall back to defaults during resolution.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Path to the ledger database file.
    pub db_path: Option<PathBuf>,
    pub engine: Option<EngineFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineFileConfig {
    /// Seconds between reconciliation sweeps.
    pub sweep_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {:?}", path.as_ref()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {:?}", path.as_ref()))
    }
}
