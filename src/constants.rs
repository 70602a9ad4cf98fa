// -
// Well-known endpoint property keys

/// Endpoint description keys
pub const ENDPOINT_ID: &str = "endpoint.id";
pub const SERVICE_TYPES: &str = "service.types";
pub const SERVICE_CONFIGS: &str = "service.configs";
pub const SERVICE_INTENTS: &str = "service.intents";

/// Marker carried by proxies materialized from a remote endpoint
pub const SERVICE_IMPORTED: &str = "service.imported";
pub const SERVICE_IMPORTED_CONFIGS: &str = "service.imported.configs";

/// Export request keys on local service descriptors
pub const SERVICE_EXPORTED_TYPES: &str = "service.exported.types";
pub const SERVICE_EXPORTED_CONFIGS: &str = "service.exported.configs";
pub const SERVICE_EXPORTED_INTENTS: &str = "service.exported.intents";

/// Wildcard accepted by `service.exported.types`
pub const TYPES_WILDCARD: &str = "*";

/// Keys injected from the topology defaults before the provider call
pub(crate) const BIND_HOST: &str = "rsd.bind.host";
pub(crate) const BIND_PORT: &str = "rsd.bind.port";

/// Default registry subtree holding published endpoints
pub(crate) const DEFAULT_BASE_PATH: &str = "/rsd/services";
