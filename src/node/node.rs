//! The node facade owning every cache and coordinator in the engine.
//!
//! ## Key Responsibilities
//! - Owns the registry backend, watcher manager, coordinators and caches
//! - Routes provider registration into export replay and import retries
//! - Maintains readiness state for host health checks
//! - Ties the whole topology to one `watch` shutdown channel
//!
//! ## Example Usage
//! ```rust,no_run
//! # use tokio::sync::watch;
//! # use rsd_engine::NodeBuilder;
//! # async fn demo() -> rsd_engine::Result<()> {
//! let (_shutdown_tx, shutdown_rx) = watch::channel(());
//! let node = NodeBuilder::new(None, shutdown_rx).build().ready()?;
//! node.start().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use tokio::sync::watch;
use tracing::info;

use crate::config::RsdNodeConfig;
use crate::discovery::EndpointListener;
use crate::discovery::EndpointPublisher;
use crate::discovery::ListenerId;
use crate::discovery::WatcherManager;
use crate::metrics;
use crate::provider::AdminId;
use crate::provider::ProviderRegistry;
use crate::provider::TransportProvider;
use crate::registry::RegistryBackend;
use crate::topology::EventBus;
use crate::topology::ExportRegistration;
use crate::topology::ImportCoordinator;
use crate::topology::ImportRegistration;
use crate::topology::TopologyEventListener;
use crate::topology::TopologyExporter;
use crate::utils::task::spawn_task;
use crate::Endpoint;
use crate::PropertyMap;
use crate::Result;
use crate::ServiceDescriptor;

pub struct RsdNode {
    pub(crate) me: Weak<RsdNode>,
    pub(crate) backend: Arc<dyn RegistryBackend>,
    pub(crate) manager: Arc<WatcherManager>,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) importer: Arc<ImportCoordinator>,
    pub(crate) exporter: Arc<TopologyExporter>,
    pub(crate) publisher: Option<Arc<EndpointPublisher>>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) shutdown_signal: watch::Receiver<()>,
    pub(crate) started: AtomicBool,
    pub(crate) stopped: AtomicBool,
    pub(crate) ready: AtomicBool,

    pub config: Arc<RsdNodeConfig>,
}

impl RsdNode {
    /// Brings the node online: starts the import dispatcher, arms the
    /// shutdown listener and, when monitoring is enabled, the metrics
    /// scrape server. Calling it again is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.importer.start(self.shutdown_signal.clone()).await?;

        if self.config.monitoring.prometheus_enabled {
            let port = self.config.monitoring.prometheus_port;
            let shutdown_signal = self.shutdown_signal.clone();
            tokio::spawn(async move {
                metrics::start_server(port, shutdown_signal).await;
            });
        }

        if let Some(me) = self.me.upgrade() {
            let mut shutdown_signal = self.shutdown_signal.clone();
            spawn_task(
                "shutdown-listener",
                move || async move {
                    // A closed channel counts as a shutdown request too.
                    let _ = shutdown_signal.changed().await;
                    info!("shutdown signal received, stopping node");
                    me.stop().await;
                    Ok(())
                },
                None,
            );
        }

        self.set_ready(true);
        info!("node started");
        Ok(())
    }

    /// Tears the node down: watchers first so no new discoveries race the
    /// teardown, then imports, exports and finally the published endpoints.
    /// Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.set_ready(false);
        self.manager.close().await;
        self.importer.close().await;
        self.exporter.close().await;
        if let Some(publisher) = &self.publisher {
            publisher.close().await;
        }
        info!("node stopped");
    }

    /// Registers a transport provider. Services exported so far are
    /// replayed through it and endpoints nobody could import yet are
    /// retried against it.
    pub async fn register_provider(
        &self,
        provider: Arc<dyn TransportProvider>,
    ) -> AdminId {
        let admin = self.providers.register(provider.clone());
        self.exporter.admin_added(admin.clone(), provider).await;
        self.importer.trigger_imports().await;
        admin
    }

    /// Removes the provider and tears down everything exported through it.
    /// Imports it served stay alive until their endpoints disappear or
    /// their consumers leave.
    pub async fn unregister_provider(
        &self,
        admin: &AdminId,
    ) {
        self.providers.unregister(admin);
        self.exporter.admin_removed(admin).await;
    }

    /// Exports the service through every registered provider admin.
    pub async fn export_service(
        &self,
        service: &ServiceDescriptor,
        extra_props: &PropertyMap,
    ) -> Result<Vec<ExportRegistration>> {
        self.exporter.export_service(service, extra_props).await
    }

    /// The hosted service went away; all its exports are closed.
    pub async fn service_unregistered(
        &self,
        service_id: u64,
    ) {
        self.exporter.service_unregistered(service_id).await;
    }

    /// Imports the endpoint through a compatible provider admin, or joins
    /// an existing import of the same endpoint.
    pub async fn import_service(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Option<ImportRegistration>> {
        self.importer.import_service(endpoint).await
    }

    /// Records one consumer subscription for the filter, widening endpoint
    /// discovery on the first one.
    pub async fn add_service_interest(
        &self,
        filter_expr: &str,
    ) -> Result<()> {
        self.importer.add_service_interest(filter_expr).await
    }

    /// Drops one consumer subscription; the last one closes the filter's
    /// imports.
    pub async fn remove_service_interest(
        &self,
        filter_expr: &str,
    ) -> Result<()> {
        self.importer.remove_service_interest(filter_expr).await
    }

    /// Watches the registry for remote endpoints matching the filters.
    pub async fn add_endpoint_listener(
        &self,
        listener: Arc<dyn EndpointListener>,
        filters: Vec<String>,
    ) -> Result<ListenerId> {
        self.manager.add_interest(listener, filters).await
    }

    /// Replaces a remote-endpoint listener's filter set.
    pub async fn update_endpoint_listener(
        &self,
        id: ListenerId,
        filters: Vec<String>,
    ) -> Result<()> {
        self.manager.update_interest(id, filters).await
    }

    pub async fn remove_endpoint_listener(
        &self,
        id: ListenerId,
    ) {
        self.manager.remove_interest(id).await;
    }

    /// Observes locally exported endpoints. Already exported endpoints
    /// arrive as initial callbacks.
    pub fn add_export_listener(
        &self,
        listener: Arc<dyn EndpointListener>,
        filters: Vec<String>,
    ) -> Result<ListenerId> {
        self.exporter.add_listener(listener, filters)
    }

    pub fn remove_export_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.exporter.remove_listener(id)
    }

    /// Subscribes to export/import lifecycle events.
    pub fn subscribe_events(
        &self,
        listener: Arc<dyn TopologyEventListener>,
    ) -> u64 {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe_events(
        &self,
        id: u64,
    ) {
        self.events.unsubscribe(id);
    }

    pub fn registry_backend(&self) -> Arc<dyn RegistryBackend> {
        self.backend.clone()
    }

    pub fn set_ready(
        &self,
        is_ready: bool,
    ) {
        self.ready.store(is_ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
