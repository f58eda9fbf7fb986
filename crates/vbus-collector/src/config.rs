//! Collector configuration file

use std::path::{Path, PathBuf};

use serde::Deserialize;
use vbus_protocol::TransportConfig;

/// Configuration shared by the collect and capture subcommands
///
/// Example:
/// ```json
/// {
///     "connection": "lan",
///     "host": "192.168.1.40",
///     "port": 7053,
///     "password": "vbus",
///     "spec_file": "specs/DeltaSolSLL.json"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CollectorConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,
    /// Path to the specification catalog JSON
    pub spec_file: PathBuf,
}

impl CollectorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let config = serde_json::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        Ok(config)
    }
}
