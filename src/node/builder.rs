//! A builder pattern implementation for constructing an [`RsdNode`]
//! instance.
//!
//! The [`NodeBuilder`] provides a fluent interface to configure and
//! assemble the components the node needs: the registry backend, the
//! endpoint codec, the watcher manager, the provider registry and the
//! export/import coordinators.
//!
//! ## Key Design Points
//! - **Default Components**: Initializes with in-process defaults (memory-backed registry, JSON
//!   endpoint codec).
//! - **Customization**: Allows overriding defaults via setter methods (e.g., `registry_backend()`,
//!   `endpoint_codec()`).
//! - **Lifecycle Management**:
//!   - `build()`: Assembles the [`RsdNode`] and wires every coordinator.
//!   - `ready()`: Finalizes construction and returns the initialized [`RsdNode`].
//!
//! ## Example
//! ```ignore
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let node = NodeBuilder::new(None, shutdown_rx)
//!     .registry_backend(custom_backend)  // Optional override
//!     .build()
//!     .ready()
//!     .unwrap();
//! node.start().await?;
//! ```
//!
//! ## Notes
//! - **Thread Safety**: All components wrapped in `Arc` for shared ownership.
//! - **Resource Cleanup**: Uses `watch::Receiver` for cooperative shutdown signaling.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use crate::config::RsdNodeConfig;
use crate::discovery::EndpointPublisher;
use crate::discovery::WatcherManager;
use crate::endpoint::EndpointCodec;
use crate::endpoint::JsonEndpointCodec;
use crate::provider::ProviderRegistry;
use crate::registry::MemoryRegistry;
use crate::registry::RegistryBackend;
use crate::topology::EndpointNotifier;
use crate::topology::EndpointRepository;
use crate::topology::EventBus;
use crate::topology::ImportCoordinator;
use crate::topology::TopologyExporter;
use crate::RsdNode;
use crate::Result;
use crate::SystemError;

/// Builder pattern implementation for constructing an engine node with
/// configurable components. Provides a fluent interface to set up node
/// configuration, the registry backend and the endpoint codec.
pub struct NodeBuilder {
    pub(super) node_config: RsdNodeConfig,
    pub(super) backend: Option<Arc<dyn RegistryBackend>>,
    pub(super) codec: Option<Arc<dyn EndpointCodec>>,
    pub(super) shutdown_signal: watch::Receiver<()>,

    pub(super) node: Option<Arc<RsdNode>>,
}

impl NodeBuilder {
    /// Creates a new NodeBuilder with configuration loaded from file
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a deployment-specific config file
    /// * `shutdown_signal` - Watch channel for graceful shutdown signaling
    ///
    /// # Panics
    /// Will panic if configuration loading fails (consider returning Result
    /// instead)
    pub fn new(
        config_path: Option<&str>,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        if let Some(p) = config_path {
            info!("loading override config from: {}", &p);
        }
        let node_config = RsdNodeConfig::load(config_path).expect("Load node_config successfully");
        Self::init(node_config, shutdown_signal)
    }

    /// Constructs NodeBuilder from in-memory configuration
    ///
    /// # Arguments
    /// * `node_config` - Pre-built node configuration
    /// * `shutdown_signal` - Graceful shutdown notification channel
    ///
    /// # Usage
    /// ```ignore
    /// let builder = NodeBuilder::from_config(my_config, shutdown_rx);
    /// ```
    pub fn from_config(
        node_config: RsdNodeConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self::init(node_config, shutdown_signal)
    }

    /// Core initialization logic shared by all construction paths
    pub fn init(
        node_config: RsdNodeConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            node_config,
            backend: None,
            codec: None,
            shutdown_signal,
            node: None,
        }
    }

    /// Sets a custom registry backend implementation
    pub fn registry_backend(
        mut self,
        backend: Arc<dyn RegistryBackend>,
    ) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Sets a custom endpoint codec implementation
    pub fn endpoint_codec(
        mut self,
        codec: Arc<dyn EndpointCodec>,
    ) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Replaces the entire node configuration
    pub fn node_config(
        mut self,
        node_config: RsdNodeConfig,
    ) -> Self {
        self.node_config = node_config;
        self
    }

    /// Finalizes the builder and constructs the node instance.
    ///
    /// Initializes default implementations for any unconfigured components:
    /// - Memory-backed registry and JSON endpoint codec
    /// - Watcher manager over the configured base path
    /// - Provider registry plus export and import coordinators
    /// - Endpoint publisher, when local publication is enabled
    pub fn build(mut self) -> Self {
        let node_config = Arc::new(self.node_config.clone());

        let backend = self
            .backend
            .take()
            .unwrap_or_else(|| Arc::new(MemoryRegistry::new()) as Arc<dyn RegistryBackend>);
        let codec = self
            .codec
            .take()
            .unwrap_or_else(|| Arc::new(JsonEndpointCodec) as Arc<dyn EndpointCodec>);

        let manager = WatcherManager::new(
            backend.clone(),
            codec.clone(),
            node_config.registry.base_path.clone(),
            node_config.retry.watch,
        );

        let repository = Arc::new(EndpointRepository::new());
        let notifier = Arc::new(EndpointNotifier::new());
        let events = Arc::new(EventBus::new());

        let publisher = if node_config.discovery.publish_local_endpoints {
            Some(Arc::new(EndpointPublisher::new(
                backend.clone(),
                codec.clone(),
                node_config.registry.base_path.clone(),
                node_config.retry.publish,
            )))
        } else {
            None
        };

        let providers = Arc::new(ProviderRegistry::new());
        let exporter = TopologyExporter::new(
            node_config.topology.clone(),
            repository,
            notifier,
            publisher.clone(),
            events.clone(),
        );
        let importer = ImportCoordinator::new(
            providers.clone(),
            manager.clone(),
            events.clone(),
            node_config.topology.import_workers,
        );

        let shutdown_signal = self.shutdown_signal.clone();
        let node = Arc::new_cyclic(|me| RsdNode {
            me: me.clone(),
            backend,
            manager,
            providers,
            importer,
            exporter,
            publisher,
            events,
            shutdown_signal,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            ready: AtomicBool::new(false),
            config: node_config,
        });

        self.node = Some(node);
        self
    }

    /// Returns the built node instance after successful construction.
    ///
    /// # Errors
    /// Returns `SystemError::NodeStartFailed` if build hasn't completed
    pub fn ready(self) -> Result<Arc<RsdNode>> {
        self.node
            .ok_or_else(|| SystemError::NodeStartFailed("check node ready failed".to_string()).into())
    }
}
