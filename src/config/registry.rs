use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_BASE_PATH;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RegistryConfig {
    /// Registry subtree all published endpoints live under
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Backend ensemble address, handed verbatim to the adaptor
    #[serde(default = "default_connect_string")]
    pub connect_string: String,

    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            connect_string: default_connect_string(),
            session_timeout_ms: default_session_timeout_ms(),
        }
    }
}

impl RegistryConfig {
    /// Validates registry configuration consistency
    pub fn validate(&self) -> Result<()> {
        if !self.base_path.starts_with('/') {
            return Err(ConfigError::Message(format!(
                "registry.base_path must be absolute, got '{}'",
                self.base_path
            ))
            .into());
        }
        if self.base_path.len() > 1 && self.base_path.ends_with('/') {
            return Err(ConfigError::Message(format!(
                "registry.base_path must not end with '/', got '{}'",
                self.base_path
            ))
            .into());
        }
        if self.session_timeout_ms == 0 {
            return Err(ConfigError::Message("registry.session_timeout_ms cannot be 0".into()).into());
        }
        Ok(())
    }
}

fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}

fn default_connect_string() -> String {
    "127.0.0.1:2181".to_string()
}

fn default_session_timeout_ms() -> u64 {
    15_000
}
