use crate::constants::SERVICE_EXPORTED_CONFIGS;
use crate::constants::SERVICE_EXPORTED_TYPES;
use crate::constants::SERVICE_IMPORTED;
use crate::constants::SERVICE_TYPES;
use crate::PropertyMap;
use crate::PropertyValue;

/// A service hosted in this process, as handed to the export path.
///
/// `service_id` is the host's stable identifier for the instance; the
/// property map carries the declared types plus the export request keys
/// (`service.exported.*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    service_id: u64,
    properties: PropertyMap,
}

impl ServiceDescriptor {
    pub fn new(
        service_id: u64,
        properties: PropertyMap,
    ) -> Self {
        ServiceDescriptor { service_id, properties }
    }

    pub fn service_id(&self) -> u64 {
        self.service_id
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

    pub fn declared_types(&self) -> Vec<&str> {
        self.properties
            .get(SERVICE_TYPES)
            .map(|v| v.text_values())
            .unwrap_or_default()
    }

    /// The export request, when the host asked for one. `None` means this
    /// service is local-only.
    pub fn exported_types(&self) -> Option<Vec<&str>> {
        self.properties.get(SERVICE_EXPORTED_TYPES).map(|v| v.text_values())
    }

    pub fn requested_configs(&self) -> Vec<&str> {
        self.properties
            .get(SERVICE_EXPORTED_CONFIGS)
            .map(|v| v.text_values())
            .unwrap_or_default()
    }

    pub fn is_imported_proxy(&self) -> bool {
        self.properties.contains_key(SERVICE_IMPORTED)
    }
}
