//! Shared fixtures for the end-to-end tests: an in-process transport
//! provider, recording listeners and node construction over a shared
//! memory registry.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::sleep;

use rsd_engine::constants::ENDPOINT_ID;
use rsd_engine::constants::SERVICE_EXPORTED_TYPES;
use rsd_engine::constants::SERVICE_TYPES;
use rsd_engine::Endpoint;
use rsd_engine::EndpointListener;
use rsd_engine::ExportError;
use rsd_engine::ExportHandle;
use rsd_engine::ImportError;
use rsd_engine::ImportHandle;
use rsd_engine::NodeBuilder;
use rsd_engine::PropertyMap;
use rsd_engine::RegistryBackend;
use rsd_engine::RsdNode;
use rsd_engine::RsdNodeConfig;
use rsd_engine::ServiceDescriptor;
use rsd_engine::TopologyEvent;
use rsd_engine::TopologyEventListener;
use rsd_engine::TransportProvider;

static NEXT_SERVICE_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_service_id() -> u64 {
    NEXT_SERVICE_ID.fetch_add(1, Ordering::AcqRel)
}

/// A service declaring and exporting one type.
pub fn exported_service(service_type: &str) -> ServiceDescriptor {
    let mut props = PropertyMap::new();
    props.insert(SERVICE_TYPES.to_string(), vec![service_type].into());
    props.insert(SERVICE_EXPORTED_TYPES.to_string(), vec![service_type].into());
    ServiceDescriptor::new(next_service_id(), props)
}

/// Builds a started node on top of `backend`. The returned sender keeps
/// the shutdown channel alive for the duration of the test.
pub async fn start_node(backend: Arc<dyn RegistryBackend>) -> (watch::Sender<()>, Arc<RsdNode>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let node = NodeBuilder::from_config(RsdNodeConfig::default(), shutdown_rx)
        .registry_backend(backend)
        .build()
        .ready()
        .expect("node should build");
    node.start().await.expect("node should start");
    (shutdown_tx, node)
}

/// Polls `cond` until it holds or two seconds pass.
pub async fn wait_until(
    what: &str,
    mut cond: impl FnMut() -> bool,
) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// Polls the registry until `path` holds exactly `count` children. A
/// missing path counts as zero children while waiting for the first one.
pub async fn wait_for_children(
    backend: &Arc<dyn RegistryBackend>,
    path: &str,
    count: usize,
) {
    for _ in 0..200 {
        let children = backend.get_children(path, None).await.unwrap_or_default();
        if children.len() == count {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {} children under {}", count, path);
}

/// In-process transport provider: exports become `echo://` endpoints,
/// imports wire a fake proxy. Counts provider calls and handle closes.
pub struct EchoProvider {
    name: String,
    configs: Vec<String>,
    export_delay_ms: AtomicU64,
    export_calls: AtomicUsize,
    import_calls: AtomicUsize,
    export_closes: Arc<AtomicUsize>,
    import_closes: Arc<AtomicUsize>,
    next_proxy_id: AtomicU64,
}

impl EchoProvider {
    pub fn new(
        name: &str,
        configs: &[&str],
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            configs: configs.iter().map(|c| c.to_string()).collect(),
            export_delay_ms: AtomicU64::new(0),
            export_calls: AtomicUsize::new(0),
            import_calls: AtomicUsize::new(0),
            export_closes: Arc::new(AtomicUsize::new(0)),
            import_closes: Arc::new(AtomicUsize::new(0)),
            next_proxy_id: AtomicU64::new(1000),
        })
    }

    pub fn set_export_delay_ms(
        &self,
        ms: u64,
    ) {
        self.export_delay_ms.store(ms, Ordering::Release);
    }

    pub fn export_calls(&self) -> usize {
        self.export_calls.load(Ordering::Acquire)
    }

    pub fn import_calls(&self) -> usize {
        self.import_calls.load(Ordering::Acquire)
    }

    pub fn export_closes(&self) -> usize {
        self.export_closes.load(Ordering::Acquire)
    }

    pub fn import_closes(&self) -> usize {
        self.import_closes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TransportProvider for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_configs(&self) -> Vec<String> {
        self.configs.clone()
    }

    async fn export(
        &self,
        service: &ServiceDescriptor,
        properties: &PropertyMap,
    ) -> std::result::Result<Arc<dyn ExportHandle>, ExportError> {
        self.export_calls.fetch_add(1, Ordering::AcqRel);
        let delay = self.export_delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            sleep(Duration::from_millis(delay)).await;
        }
        let mut props = properties.clone();
        props.insert(
            ENDPOINT_ID.to_string(),
            format!("echo://{}/{}", self.name, service.service_id()).into(),
        );
        let endpoint = Endpoint::new(props).map_err(|e| ExportError::Provider(e.to_string()))?;
        Ok(Arc::new(EchoExportHandle {
            endpoint,
            closes: self.export_closes.clone(),
        }))
    }

    async fn import(
        &self,
        endpoint: &Endpoint,
    ) -> std::result::Result<Arc<dyn ImportHandle>, ImportError> {
        self.import_calls.fetch_add(1, Ordering::AcqRel);
        Ok(Arc::new(EchoImportHandle {
            endpoint: endpoint.clone(),
            service_id: self.next_proxy_id.fetch_add(1, Ordering::AcqRel),
            closes: self.import_closes.clone(),
        }))
    }
}

struct EchoExportHandle {
    endpoint: Endpoint,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ExportHandle for EchoExportHandle {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::AcqRel);
    }
}

struct EchoImportHandle {
    endpoint: Endpoint,
    service_id: u64,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ImportHandle for EchoImportHandle {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn service_id(&self) -> u64 {
        self.service_id
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::AcqRel);
    }
}

/// Endpoint listener recording every callback.
pub struct Recorder {
    calls: Mutex<Vec<(bool, Endpoint, String)>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { calls: Mutex::new(Vec::new()) })
    }

    pub fn added(&self) -> Vec<Endpoint> {
        self.calls
            .lock()
            .iter()
            .filter(|(added, _, _)| *added)
            .map(|(_, e, _)| e.clone())
            .collect()
    }

    pub fn removed(&self) -> Vec<Endpoint> {
        self.calls
            .lock()
            .iter()
            .filter(|(added, _, _)| !*added)
            .map(|(_, e, _)| e.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }
}

impl EndpointListener for Recorder {
    fn endpoint_added(
        &self,
        endpoint: &Endpoint,
        matched_filter: &str,
    ) {
        self.calls.lock().push((true, endpoint.clone(), matched_filter.to_string()));
    }

    fn endpoint_removed(
        &self,
        endpoint: &Endpoint,
        matched_filter: &str,
    ) {
        self.calls.lock().push((false, endpoint.clone(), matched_filter.to_string()));
    }
}

/// Topology event listener recording the event stream.
pub struct Events {
    events: Mutex<Vec<TopologyEvent>>,
}

impl Events {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()) })
    }

    pub fn events(&self) -> Vec<TopologyEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }
}

impl TopologyEventListener for Events {
    fn on_event(
        &self,
        event: &TopologyEvent,
    ) {
        self.events.lock().push(event.clone());
    }
}
