use serde::Deserialize;

/// Basic retry policy template
#[derive(Debug, Deserialize, Clone, Copy, Default)]
pub struct BackoffPolicy {
    /// Maximum number of retries (0 means no retries)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

/// Divide strategies by business domain
#[derive(Debug, Deserialize, Clone)]
pub struct RetryPolicies {
    // Registry rescan strategy (watch re-arm after transient errors)
    #[serde(default)]
    pub watch: BackoffPolicy,

    // Endpoint publication strategy (registry-facing writes)
    #[serde(default)]
    pub publish: BackoffPolicy,
}

// Default value implementation
impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            watch: BackoffPolicy {
                max_retries: 5,
                timeout_ms: 3000,
                base_delay_ms: 200,
                max_delay_ms: 5000,
            },
            publish: BackoffPolicy {
                max_retries: 3,
                timeout_ms: 5000,
                base_delay_ms: 100,
                max_delay_ms: 2000,
            },
        }
    }
}
fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    100
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
