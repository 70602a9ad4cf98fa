//! Discovery side of the engine: registry watchers, scope multiplexing and
//! endpoint publication.

mod manager;
mod publisher;
mod scope;
mod watcher;

pub use manager::*;
pub use publisher::*;
pub use scope::*;
pub use watcher::*;

#[cfg(test)]
mod publisher_test;

#[cfg(test)]
use mockall::automock;

use crate::Endpoint;

/// Receives endpoint lifecycle callbacks. `matched_filter` names the filter
/// expression that selected the endpoint for this listener.
///
/// Callbacks may be invoked from watcher tasks; implementations must be
/// cheap or hand the work off. Delivery to a single listener is serialized,
/// delivery across listeners is not ordered.
#[cfg_attr(test, automock)]
pub trait EndpointListener: Send + Sync + 'static {
    fn endpoint_added(
        &self,
        endpoint: &Endpoint,
        matched_filter: &str,
    );

    fn endpoint_removed(
        &self,
        endpoint: &Endpoint,
        matched_filter: &str,
    );
}
