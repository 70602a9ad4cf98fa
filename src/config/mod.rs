//! Configuration management module for the discovery engine.
//!
//! Provides hierarchical configuration loading from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. Main config file
//! 3. Explicit override file
//! 4. `RSD_CONFIG_PATH` file
//! 5. Environment variables (highest priority)
//!

mod discovery;
mod monitoring;
mod registry;
mod retry;
mod topology;
pub use discovery::*;
pub use monitoring::*;
pub use registry::*;
pub use retry::*;
pub use topology::*;


//---
use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RsdNodeConfig {
    /// Registry backend parameters
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Discovery-side behavior
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Export/import coordination parameters
    #[serde(default)]
    pub topology: TopologyConfig,
    /// Metrics and monitoring settings
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    /// Retry policies for registry and provider operations
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl RsdNodeConfig {
    /// Load configuration from multiple sources with priority:
    /// 1. Base config file (`config/rsd`, optional)
    /// 2. Explicit override file
    /// 3. `RSD_CONFIG_PATH` file
    /// 4. Environment variables
    ///
    /// # Arguments
    /// * `override_path` - Optional path to a deployment-specific config file
    ///
    /// # Returns
    /// Merged and validated configuration
    pub fn load(override_path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        // 1. Base config
        config = config.add_source(File::with_name("config/rsd").required(false));

        // 2. Deployment override
        if let Some(path) = override_path {
            config = config.add_source(File::with_name(path).required(true));
        }

        // 3. Environment-selected file
        if let Ok(path) = env::var("RSD_CONFIG_PATH") {
            config = config.add_source(File::with_name(&path));
        }

        // 4. Environment variables (highest priority)
        config = config.add_source(
            Environment::with_prefix("RSD")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: RsdNodeConfig = config.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.registry.validate()?;
        self.topology.validate()?;
        self.monitoring.validate()?;
        Ok(())
    }
}
