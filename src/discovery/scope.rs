use crate::constants::SERVICE_TYPES;
use crate::Filter;
use crate::FilterError;

/// A discovery scope: a filter expression together with the registry
/// subtree it maps to.
///
/// Filters that pin `service.types` to a literal value watch only that
/// type's directory. Everything else watches the whole endpoint namespace
/// recursively.
#[derive(Debug, Clone)]
pub struct Scope {
    raw: String,
    filter: Filter,
    type_key: Option<String>,
}

impl Scope {
    pub fn parse(expr: &str) -> std::result::Result<Self, FilterError> {
        let filter = Filter::parse(expr)?;
        let type_key = filter.first_equality(SERVICE_TYPES).map(str::to_string);
        Ok(Scope {
            raw: filter.as_str().to_string(),
            filter,
            type_key,
        })
    }

    /// Canonical scope key. Interests are multiplexed on this string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Registry path this scope watches. Dots in the service type become
    /// path segments, mirroring how endpoints are published.
    pub fn node_path(
        &self,
        base_path: &str,
    ) -> String {
        match &self.type_key {
            Some(ty) => type_path(base_path, ty),
            None => base_path.to_string(),
        }
    }

    /// Whole-namespace scopes must descend into nested type directories.
    pub fn recursive(&self) -> bool {
        self.type_key.is_none()
    }
}

/// Directory that holds all endpoints of one service type.
pub(crate) fn type_path(
    base_path: &str,
    service_type: &str,
) -> String {
    format!("{}/{}", base_path, service_type.replace('.', "/"))
}

/// Endpoint ids double as registry node names; strip the one character a
/// node name cannot contain.
pub(crate) fn endpoint_node_name(endpoint_id: &str) -> String {
    endpoint_id.replace('/', "#")
}
