use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::config::TopologyConfig;
use crate::constants::ENDPOINT_ID;
use crate::constants::SERVICE_CONFIGS;
use crate::constants::SERVICE_EXPORTED_CONFIGS;
use crate::constants::SERVICE_EXPORTED_TYPES;
use crate::constants::SERVICE_TYPES;
use crate::Endpoint;
use crate::PropertyMap;
use crate::ServiceDescriptor;

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique service id per call, so parallel tests never collide.
pub(crate) fn next_service_id() -> u64 {
    NEXT_SERVICE_ID.fetch_add(1, Ordering::AcqRel)
}

pub(crate) fn props(pairs: &[(&str, &str)]) -> PropertyMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), (*v).into()))
        .collect()
}

/// Minimal valid endpoint: an id and one service type.
pub(crate) fn endpoint(
    id: &str,
    service_type: &str,
) -> Endpoint {
    endpoint_with(id, &[service_type], &[])
}

pub(crate) fn endpoint_with(
    id: &str,
    types: &[&str],
    configs: &[&str],
) -> Endpoint {
    let mut p = PropertyMap::new();
    p.insert(ENDPOINT_ID.to_string(), id.into());
    p.insert(SERVICE_TYPES.to_string(), types.to_vec().into());
    if !configs.is_empty() {
        p.insert(SERVICE_CONFIGS.to_string(), configs.to_vec().into());
    }
    Endpoint::new(p).unwrap()
}

/// A service that declares `types` and requests them all exported.
pub(crate) fn exported_service(types: &[&str]) -> ServiceDescriptor {
    let mut p = PropertyMap::new();
    p.insert(SERVICE_TYPES.to_string(), types.to_vec().into());
    p.insert(SERVICE_EXPORTED_TYPES.to_string(), types.to_vec().into());
    ServiceDescriptor::new(next_service_id(), p)
}

pub(crate) fn exported_service_with_configs(
    types: &[&str],
    configs: &[&str],
) -> ServiceDescriptor {
    let mut p = PropertyMap::new();
    p.insert(SERVICE_TYPES.to_string(), types.to_vec().into());
    p.insert(SERVICE_EXPORTED_TYPES.to_string(), types.to_vec().into());
    p.insert(SERVICE_EXPORTED_CONFIGS.to_string(), configs.to_vec().into());
    ServiceDescriptor::new(next_service_id(), p)
}

/// Topology config with aggressive timeouts so waiting paths fail fast in
/// tests.
pub(crate) fn fast_topology_config() -> TopologyConfig {
    TopologyConfig {
        export_wait_timeout_ms: 200,
        import_workers: 2,
        ..TopologyConfig::default()
    }
}
