use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use nanoid::nanoid;
use tracing::debug;

use super::TransportProvider;
use crate::Endpoint;

/// Identifies one registered admin for its whole lifetime. The provider
/// name is kept in the id for log readability.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AdminId(String);

impl AdminId {
    pub(crate) fn generate(provider_name: &str) -> Self {
        AdminId(format!("{}-{}", provider_name, nanoid!(8)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdminId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tracks the currently registered transport providers. Pure bookkeeping:
/// export and import reactions to admin churn live in the topology layer.
pub struct ProviderRegistry {
    admins: DashMap<AdminId, Arc<dyn TransportProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            admins: DashMap::new(),
        }
    }

    pub fn register(
        &self,
        provider: Arc<dyn TransportProvider>,
    ) -> AdminId {
        let id = AdminId::generate(provider.name());
        debug!(admin = %id, "transport provider registered");
        self.admins.insert(id.clone(), provider);
        id
    }

    pub fn unregister(
        &self,
        id: &AdminId,
    ) -> Option<Arc<dyn TransportProvider>> {
        let removed = self.admins.remove(id).map(|(_, provider)| provider);
        if removed.is_some() {
            debug!(admin = %id, "transport provider unregistered");
        }
        removed
    }

    pub fn get(
        &self,
        id: &AdminId,
    ) -> Option<Arc<dyn TransportProvider>> {
        self.admins.get(id).map(|entry| entry.value().clone())
    }

    pub fn admin_ids(&self) -> Vec<AdminId> {
        self.admins.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.admins.is_empty()
    }

    /// Admins whose config types overlap the endpoint's. An endpoint
    /// without declared configs can be offered to any admin; the provider
    /// still gets the final say when asked to import.
    pub fn select_for_import(
        &self,
        endpoint: &Endpoint,
    ) -> Vec<(AdminId, Arc<dyn TransportProvider>)> {
        let configs = endpoint.config_types();
        self.admins
            .iter()
            .filter(|entry| {
                configs.is_empty()
                    || entry
                        .value()
                        .supported_configs()
                        .iter()
                        .any(|c| configs.iter().any(|wanted| wanted == c))
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
