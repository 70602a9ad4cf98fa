use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Mirror locally exported endpoints into the registry so remote nodes
    /// can discover them. Disable for import-only deployments.
    #[serde(default = "default_publish_local_endpoints")]
    pub publish_local_endpoints: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            publish_local_endpoints: default_publish_local_endpoints(),
        }
    }
}

fn default_publish_local_endpoints() -> bool {
    true
}
