use std::fmt;

use crate::constants::ENDPOINT_ID;
use crate::constants::SERVICE_CONFIGS;
use crate::constants::SERVICE_IMPORTED;
use crate::constants::SERVICE_TYPES;
use crate::EndpointError;
use crate::Filter;
use crate::PropertyKey;
use crate::PropertyMap;
use crate::PropertyValue;

/// Immutable description of a remotely reachable service.
///
/// Required properties: `endpoint.id` (opaque unique identifier) and
/// `service.types` (non-empty list). Everything else is carried opaquely
/// for filters and providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    properties: PropertyMap,
}

impl Endpoint {
    pub fn new(properties: PropertyMap) -> Result<Self, EndpointError> {
        match properties.get(ENDPOINT_ID) {
            None => return Err(EndpointError::MissingProperty(ENDPOINT_ID)),
            Some(v) => match v.as_str() {
                Some(id) if !id.is_empty() => {}
                _ => return Err(EndpointError::InvalidValue(ENDPOINT_ID)),
            },
        }
        match properties.get(SERVICE_TYPES) {
            None => return Err(EndpointError::MissingProperty(SERVICE_TYPES)),
            Some(v) => match v.as_seq() {
                Some(types) if !types.is_empty() => {}
                Some(_) => return Err(EndpointError::NoServiceTypes),
                None => return Err(EndpointError::InvalidValue(SERVICE_TYPES)),
            },
        }
        Ok(Endpoint { properties })
    }

    pub fn id(&self) -> &str {
        self.properties
            .get(ENDPOINT_ID)
            .and_then(PropertyValue::as_str)
            .unwrap_or_default()
    }

    pub fn service_types(&self) -> &[String] {
        self.properties
            .get(SERVICE_TYPES)
            .and_then(PropertyValue::as_seq)
            .unwrap_or_default()
    }

    /// Configuration types this endpoint can be reached through. Providers
    /// are matched against these.
    pub fn config_types(&self) -> Vec<&str> {
        self.properties
            .get(SERVICE_CONFIGS)
            .map(|v| v.text_values())
            .unwrap_or_default()
    }

    /// True for proxies materialized from a remote endpoint. Re-exporting
    /// them is refused to keep topologies loop-free.
    pub fn is_imported(&self) -> bool {
        self.properties.contains_key(SERVICE_IMPORTED)
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn matches(
        &self,
        filter: &Filter,
    ) -> bool {
        filter.matches(&self.properties)
    }

    /// Structural identity, shared with the dedup tables.
    pub fn key(&self) -> PropertyKey {
        PropertyKey::of(&self.properties)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.id())
    }
}
