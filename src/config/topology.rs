use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TopologyConfig {
    /// Host injected into exported endpoints that do not bind one themselves
    #[serde(default = "default_host")]
    pub default_host: String,

    #[serde(default = "default_port")]
    pub default_port: u16,

    /// Intents merged into every export request, passed through to providers
    #[serde(default)]
    pub intents: Vec<String>,

    /// Honor `service.exported.*` keys found on the service descriptor
    /// itself. When false only the caller-supplied extra properties can
    /// request an export.
    #[serde(default = "default_trust_descriptor_metadata")]
    pub trust_descriptor_metadata: bool,

    /// Concurrent provider calls on the import path
    #[serde(default = "default_import_workers")]
    pub import_workers: usize,

    /// Upper bound on waiting for a concurrent export of the same
    /// properties to resolve
    #[serde(default = "default_export_wait_timeout_ms")]
    pub export_wait_timeout_ms: u64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            default_host: default_host(),
            default_port: default_port(),
            intents: vec![],
            trust_descriptor_metadata: default_trust_descriptor_metadata(),
            import_workers: default_import_workers(),
            export_wait_timeout_ms: default_export_wait_timeout_ms(),
        }
    }
}

impl TopologyConfig {
    /// Validates topology configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.default_port == 0 {
            return Err(ConfigError::Message("topology.default_port cannot be 0".into()).into());
        }
        if self.import_workers == 0 {
            return Err(ConfigError::Message("topology.import_workers must be at least 1".into()).into());
        }
        if self.export_wait_timeout_ms == 0 {
            return Err(ConfigError::Message("topology.export_wait_timeout_ms cannot be 0".into()).into());
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9000
}

fn default_trust_descriptor_metadata() -> bool {
    true
}

fn default_import_workers() -> usize {
    5
}

fn default_export_wait_timeout_ms() -> u64 {
    30_000
}
