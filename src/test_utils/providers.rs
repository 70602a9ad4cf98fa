use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

use crate::constants::ENDPOINT_ID;
use crate::provider::ExportHandle;
use crate::provider::ImportHandle;
use crate::provider::TransportProvider;
use crate::Endpoint;
use crate::ExportError;
use crate::ImportError;
use crate::PropertyMap;
use crate::ServiceDescriptor;

/// In-process provider: exports become endpoints addressed under a
/// `loop://` scheme, imports wire a fake proxy id. Counts calls and
/// closes so tests can assert the provider contract.
pub(crate) struct LoopbackProvider {
    name: String,
    configs: Vec<String>,
    export_delay_ms: AtomicU64,
    fail_exports: AtomicBool,
    fail_imports: AtomicBool,
    export_calls: AtomicUsize,
    import_calls: AtomicUsize,
    export_closes: Arc<AtomicUsize>,
    import_closes: Arc<AtomicUsize>,
    next_proxy_id: AtomicU64,
}

impl LoopbackProvider {
    pub(crate) fn new(
        name: &str,
        configs: &[&str],
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            configs: configs.iter().map(|c| c.to_string()).collect(),
            export_delay_ms: AtomicU64::new(0),
            fail_exports: AtomicBool::new(false),
            fail_imports: AtomicBool::new(false),
            export_calls: AtomicUsize::new(0),
            import_calls: AtomicUsize::new(0),
            export_closes: Arc::new(AtomicUsize::new(0)),
            import_closes: Arc::new(AtomicUsize::new(0)),
            next_proxy_id: AtomicU64::new(1000),
        })
    }

    /// Makes every export pause, widening the window concurrent callers
    /// race in.
    pub(crate) fn set_export_delay_ms(
        &self,
        ms: u64,
    ) {
        self.export_delay_ms.store(ms, Ordering::Release);
    }

    pub(crate) fn set_fail_exports(
        &self,
        fail: bool,
    ) {
        self.fail_exports.store(fail, Ordering::Release);
    }

    pub(crate) fn set_fail_imports(
        &self,
        fail: bool,
    ) {
        self.fail_imports.store(fail, Ordering::Release);
    }

    pub(crate) fn export_calls(&self) -> usize {
        self.export_calls.load(Ordering::Acquire)
    }

    pub(crate) fn import_calls(&self) -> usize {
        self.import_calls.load(Ordering::Acquire)
    }

    pub(crate) fn export_closes(&self) -> usize {
        self.export_closes.load(Ordering::Acquire)
    }

    pub(crate) fn import_closes(&self) -> usize {
        self.import_closes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl TransportProvider for LoopbackProvider {
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
        if self.fail_exports.load(Ordering::Acquire) {
            return Err(ExportError::Provider(format!("{} export rejected", self.name)));
        }
        let mut props = properties.clone();
        props.insert(
            ENDPOINT_ID.to_string(),
            format!("loop://{}/{}", self.name, service.service_id()).into(),
        );
        let endpoint =
            Endpoint::new(props).map_err(|e| ExportError::Provider(e.to_string()))?;
        Ok(Arc::new(LoopbackExportHandle {
            endpoint,
            closes: self.export_closes.clone(),
        }))
    }

    async fn import(
        &self,
        endpoint: &Endpoint,
    ) -> std::result::Result<Arc<dyn ImportHandle>, ImportError> {
        self.import_calls.fetch_add(1, Ordering::AcqRel);
        if self.fail_imports.load(Ordering::Acquire) {
            return Err(ImportError::Provider(format!("{} import rejected", self.name)));
        }
        Ok(Arc::new(LoopbackImportHandle {
            endpoint: endpoint.clone(),
            service_id: self.next_proxy_id.fetch_add(1, Ordering::AcqRel),
            closes: self.import_closes.clone(),
        }))
    }
}

struct LoopbackExportHandle {
    endpoint: Endpoint,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ExportHandle for LoopbackExportHandle {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::AcqRel);
    }
}

struct LoopbackImportHandle {
    endpoint: Endpoint,
    service_id: u64,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ImportHandle for LoopbackImportHandle {
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
