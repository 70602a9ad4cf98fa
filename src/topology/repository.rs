use std::collections::HashMap;

use dashmap::DashMap;

use crate::provider::AdminId;
use crate::Endpoint;

/// Table of locally exported endpoints: service id to admin to endpoints.
/// Duplicate adds are suppressed so re-delivered export events stay
/// harmless.
pub struct EndpointRepository {
    services: DashMap<u64, HashMap<AdminId, Vec<Endpoint>>>,
}

impl EndpointRepository {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
        }
    }

    /// True when the endpoint was not yet recorded for this service and
    /// admin.
    pub fn add_endpoint(
        &self,
        service_id: u64,
        admin: &AdminId,
        endpoint: &Endpoint,
    ) -> bool {
        let mut row = self.services.entry(service_id).or_default();
        let endpoints = row.entry(admin.clone()).or_default();
        if endpoints.contains(endpoint) {
            return false;
        }
        endpoints.push(endpoint.clone());
        true
    }

    /// Records a batch, returning only the endpoints that were new.
    pub fn add_endpoints(
        &self,
        service_id: u64,
        admin: &AdminId,
        endpoints: &[Endpoint],
    ) -> Vec<Endpoint> {
        endpoints
            .iter()
            .filter(|e| self.add_endpoint(service_id, admin, e))
            .cloned()
            .collect()
    }

    pub fn remove_endpoint(
        &self,
        service_id: u64,
        admin: &AdminId,
        endpoint: &Endpoint,
    ) -> bool {
        let removed = match self.services.get_mut(&service_id).as_mut() {
            Some(row) => match row.get_mut(admin) {
                Some(endpoints) => {
                    let before = endpoints.len();
                    endpoints.retain(|e| e != endpoint);
                    let changed = before != endpoints.len();
                    if endpoints.is_empty() {
                        row.remove(admin);
                    }
                    changed
                }
                None => false,
            },
            None => return false,
        };
        self.services.remove_if(&service_id, |_, row| row.is_empty());
        removed
    }

    /// Drops the whole row for a service, returning what was recorded.
    pub fn remove_service(
        &self,
        service_id: u64,
    ) -> Vec<Endpoint> {
        match self.services.remove(&service_id) {
            Some((_, row)) => row.into_values().flatten().collect(),
            None => Vec::new(),
        }
    }

    /// Drops one admin's endpoints across every service.
    pub fn remove_admin(
        &self,
        admin: &AdminId,
    ) -> Vec<Endpoint> {
        let mut removed = Vec::new();
        for mut entry in self.services.iter_mut() {
            if let Some(endpoints) = entry.value_mut().remove(admin) {
                removed.extend(endpoints);
            }
        }
        self.services.retain(|_, row| !row.is_empty());
        removed
    }

    pub fn endpoints_for_service(
        &self,
        service_id: u64,
    ) -> Vec<Endpoint> {
        self.services
            .get(&service_id)
            .map(|row| row.values().flatten().cloned().collect())
            .unwrap_or_default()
    }

    pub fn all_endpoints(&self) -> Vec<Endpoint> {
        self.services
            .iter()
            .flat_map(|entry| {
                entry.value().values().flatten().cloned().collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn contains(
        &self,
        endpoint: &Endpoint,
    ) -> bool {
        self.services
            .iter()
            .any(|entry| entry.value().values().any(|v| v.contains(endpoint)))
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl Default for EndpointRepository {
    fn default() -> Self {
        Self::new()
    }
}
