//! Discovery And Topology Error Hierarchy
//!
//! Defines comprehensive error types for the discovery engine,
//! categorized by subsystem and operational concerns.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (registry backend, serialization, tasks)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Node configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Export/import coordination failures
    #[error(transparent)]
    Topology(#[from] TopologyError),

    /// Filter expression parsing failures
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Endpoint description validation failures
    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Registry backend layer
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    //Serialization
    #[error("Serialization error")]
    Serialization(#[from] SerializationError),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Retry policy exhaustion
    #[error("Task '{name}' gave up after {retries} attempts")]
    RetryExhausted { name: String, retries: usize },

    // Basic node operations
    #[error("Node failed to start: {0}")]
    NodeStartFailed(String),

    #[error("Engine is shutting down")]
    Shutdown,
}

/// Registry result codes, shared between the backend boundary and the
/// watcher's rescan policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Path does not exist (normal during startup and teardown races)
    #[error("No node at {0}")]
    NoNode(String),

    /// Create collided with an existing node
    #[error("Node already exists at {0}")]
    NodeExists(String),

    /// Session to the registry ensemble expired
    #[error("Registry session expired")]
    SessionExpired,

    /// Credentials rejected by the ensemble
    #[error("Registry authentication failed")]
    AuthFailed,

    /// Transient connection loss, the session may still recover
    #[error("Registry connection lost")]
    ConnectionLoss,

    /// Handle was closed locally
    #[error("Registry handle is closed")]
    Closed,

    /// Anything the backend could not classify
    #[error("Registry backend error: {0}")]
    Backend(String),
}

impl RegistryError {
    /// Session-level failures are left to the backend's reconnect machinery;
    /// retrying the read ourselves would only race it.
    pub fn is_session_related(&self) -> bool {
        matches!(
            self,
            RegistryError::SessionExpired | RegistryError::AuthFailed | RegistryError::ConnectionLoss
        )
    }
}

// Serialization is classified separately (payload decoding crosses layers)
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    /// Service export failures
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Endpoint import failures
    #[error(transparent)]
    Import(#[from] ImportError),

    /// Operation on a registration whose lifecycle already ended
    #[error("Registration is already closed")]
    RegistrationClosed,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Requested export types must be declared by the service
    #[error("Exported types are not a subset of the declared service types: {requested}")]
    InvalidTypes { requested: String },

    /// Export request lacks a required service property
    #[error("Required service property '{0}' is missing")]
    MissingProperty(&'static str),

    /// A concurrent export of the same properties did not resolve in time
    #[error("Timed out after {0:?} waiting for a concurrent export to resolve")]
    WaitTimeout(Duration),

    /// Provider rejected or failed the export
    #[error("Provider export failed: {0}")]
    Provider(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// Provider rejected or failed the import
    #[error("Provider import failed: {0}")]
    Provider(String),
}

#[derive(Debug, thiserror::Error)]
#[doc(hidden)]
pub enum FilterError {
    #[error("Filter expression is empty")]
    Empty,

    #[error("Unexpected end of filter expression")]
    UnexpectedEnd,

    #[error("Unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { pos: usize, ch: char },

    #[error("Trailing input at position {pos}")]
    TrailingInput { pos: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Endpoint description lacks a required property
    #[error("Required endpoint property '{0}' is missing")]
    MissingProperty(&'static str),

    /// Property present but carries an unusable value
    #[error("Endpoint property '{0}' has the wrong shape")]
    InvalidValue(&'static str),

    /// Endpoint must expose at least one service type
    #[error("Endpoint declares no service types")]
    NoServiceTypes,
}

// ============== Conversion Implementations ============== //
impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::System(SystemError::Registry(e))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        SerializationError::Json(e).into()
    }
}

// ===== Topology Error conversions =====

impl From<ExportError> for Error {
    fn from(e: ExportError) -> Self {
        Error::Topology(TopologyError::Export(e))
    }
}

impl From<ImportError> for Error {
    fn from(e: ImportError) -> Self {
        Error::Topology(TopologyError::Import(e))
    }
}

impl From<JoinError> for Error {
    fn from(err: JoinError) -> Self {
        Error::System(SystemError::TaskFailed(err))
    }
}
