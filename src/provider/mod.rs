//! Transport provider seam: pluggable admins that know how to expose a
//! local service remotely and how to wire a proxy for a remote endpoint.

mod registry;

pub use registry::*;


use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Endpoint;
use crate::ExportError;
use crate::ImportError;
use crate::PropertyMap;
use crate::ServiceDescriptor;

/// A live export created by a provider. Dropping the handle does not tear
/// the export down; `close` does.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExportHandle: Send + Sync + 'static {
    /// The endpoint this export is reachable at.
    fn endpoint(&self) -> &Endpoint;

    async fn close(&self);
}

/// A live import: a local proxy wired to a remote endpoint.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImportHandle: Send + Sync + 'static {
    fn endpoint(&self) -> &Endpoint;

    /// Local service id of the proxy registration.
    fn service_id(&self) -> u64;

    async fn close(&self);
}

/// One remote-services admin. A provider declares the config types it
/// speaks and turns services into endpoints and endpoints into proxies.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TransportProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// Config types this provider can satisfy, e.g. `rsd.http`.
    fn supported_configs(&self) -> Vec<String>;

    /// Exposes the service described by `properties`. The returned
    /// handle's endpoint carries the provider-assigned `endpoint.id`.
    async fn export(
        &self,
        service: &ServiceDescriptor,
        properties: &PropertyMap,
    ) -> std::result::Result<Arc<dyn ExportHandle>, ExportError>;

    /// Wires a local proxy for the remote endpoint.
    async fn import(
        &self,
        endpoint: &Endpoint,
    ) -> std::result::Result<Arc<dyn ImportHandle>, ImportError>;
}
