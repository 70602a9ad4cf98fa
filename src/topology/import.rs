use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use autometrics::autometrics;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::EventBus;
use super::ImportRegistration;
use super::ImportShared;
use super::TopologyEvent;
use crate::discovery::EndpointListener;
use crate::discovery::ListenerId;
use crate::discovery::WatcherManager;
use crate::metrics;
use crate::provider::ProviderRegistry;
use crate::utils::task::spawn_task;
use crate::utils::task::WorkerPool;
use crate::utils::RefCounter;
use crate::Endpoint;
use crate::Filter;
use crate::PropertyKey;
use crate::Result;
use crate::SystemError;
use crate::API_SLO;

enum ImportSignal {
    Added(Endpoint, String),
    Removed(Endpoint, String),
}

struct ImportedState {
    /// Dedup table: one shared import per endpoint value.
    by_endpoint: HashMap<PropertyKey, Arc<ImportShared>>,
    /// Registration copies held on behalf of each consumer filter.
    by_filter: HashMap<String, Vec<ImportRegistration>>,
}

/// Import half of the topology: turns discovered endpoints into local
/// proxies while at least one consumer filter wants them.
///
/// Discovery callbacks only enqueue signals; a dispatcher task drains them
/// and hands provider calls to a bounded worker pool, so slow imports
/// never stall registry change processing. Provider import calls are
/// serialized by `import_gate`, which is what makes the by-endpoint dedup
/// race-free.
///
/// Lock order where both are needed: `possibilities` before `imported`.
pub struct ImportCoordinator {
    me: Weak<ImportCoordinator>,
    providers: Arc<ProviderRegistry>,
    manager: Arc<WatcherManager>,
    events: Arc<EventBus>,
    workers: WorkerPool,

    /// Consumer filter expression to subscription count.
    interest: RefCounter<String>,
    listener_id: parking_lot::Mutex<Option<ListenerId>>,
    /// Discovered endpoints per filter, imported or not.
    possibilities: parking_lot::Mutex<HashMap<String, Vec<Endpoint>>>,
    imported: parking_lot::Mutex<ImportedState>,
    import_gate: tokio::sync::Mutex<()>,

    signal_tx: mpsc::UnboundedSender<ImportSignal>,
    signal_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<ImportSignal>>>,
    closed: AtomicBool,
}

impl ImportCoordinator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        manager: Arc<WatcherManager>,
        events: Arc<EventBus>,
        import_workers: usize,
    ) -> Arc<Self> {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            providers,
            manager,
            events,
            workers: WorkerPool::new(import_workers),
            interest: RefCounter::new(),
            listener_id: parking_lot::Mutex::new(None),
            possibilities: parking_lot::Mutex::new(HashMap::new()),
            imported: parking_lot::Mutex::new(ImportedState {
                by_endpoint: HashMap::new(),
                by_filter: HashMap::new(),
            }),
            import_gate: tokio::sync::Mutex::new(()),
            signal_tx,
            signal_rx: std::sync::Mutex::new(Some(signal_rx)),
            closed: AtomicBool::new(false),
        })
    }

    /// Registers with the watcher manager and spawns the dispatcher.
    pub async fn start(
        &self,
        shutdown_signal: watch::Receiver<()>,
    ) -> Result<()> {
        let me = match self.me.upgrade() {
            Some(me) => me,
            None => return Err(SystemError::Shutdown.into()),
        };
        let id = self
            .manager
            .add_interest(me.clone() as Arc<dyn EndpointListener>, self.interest.keys())
            .await?;
        *self.listener_id.lock() = Some(id);

        let mut signal_rx = match self.signal_rx.lock() {
            Ok(mut slot) => match slot.take() {
                Some(rx) => rx,
                None => {
                    warn!("import dispatcher started twice, ignoring");
                    return Ok(());
                }
            },
            Err(poisoned) => match poisoned.into_inner().take() {
                Some(rx) => rx,
                None => return Ok(()),
            },
        };
        let mut shutdown_signal = shutdown_signal;
        spawn_task(
            "import-dispatcher",
            move || async move {
                loop {
                    tokio::select! {
                        // P0: shutdown received
                        _ = shutdown_signal.changed() => {
                            debug!("import dispatcher stopping");
                            return Ok(());
                        }

                        signal = signal_rx.recv() => {
                            match signal {
                                Some(signal) => me.dispatch(signal).await,
                                None => return Ok(()),
                            }
                        }
                    }
                }
            },
            None,
        );
        Ok(())
    }

    /// Imports the endpoint, or joins the existing import of the same
    /// endpoint value.
    ///
    /// `Ok(None)` means no registered admin speaks any of the endpoint's
    /// config types; the caller is expected to retry through
    /// [`Self::trigger_imports`] when admins change. Provider failures
    /// come back as a registration carrying the error.
    #[autometrics(objective = API_SLO)]
    pub async fn import_service(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Option<ImportRegistration>> {
        let _gate = self.import_gate.lock().await;
        if self.closed.load(Ordering::Acquire) {
            return Err(SystemError::Shutdown.into());
        }
        let key = endpoint.key();

        let existing = {
            let mut imported = self.imported.lock();
            match imported.by_endpoint.get(&key) {
                Some(shared) if shared.is_closed() => {
                    imported.by_endpoint.remove(&key);
                    None
                }
                Some(shared) => Some(shared.clone()),
                None => None,
            }
        };
        if let Some(shared) = existing {
            match ImportRegistration::claim(shared.clone(), self.me.clone()) {
                Ok(copy) => {
                    if shared.error().is_none() {
                        self.events.emit(TopologyEvent::ImportRegistered {
                            endpoint: endpoint.clone(),
                        });
                    }
                    trace!(endpoint = %endpoint, "joined existing import");
                    return Ok(Some(copy));
                }
                Err(_) => {
                    // Torn down while we looked; import afresh.
                    self.imported.lock().by_endpoint.remove(&key);
                }
            }
        }

        let (admin, provider) = match self.providers.select_for_import(endpoint).into_iter().next() {
            Some(selected) => selected,
            None => {
                debug!(endpoint = %endpoint, "no admin for endpoint, kept as possibility");
                return Ok(None);
            }
        };

        let shared = match provider.import(endpoint).await {
            Ok(handle) => {
                metrics::IMPORTED_ENDPOINTS.inc();
                info!(endpoint = %endpoint, admin = %admin, "endpoint imported");
                ImportShared::live(endpoint.clone(), admin, key.clone(), handle)
            }
            Err(e) => {
                metrics::IMPORT_FAILURES.with_label_values(&[admin.as_str()]).inc();
                warn!(endpoint = %endpoint, admin = %admin, error = %e, "endpoint import failed");
                self.events.emit(TopologyEvent::ImportFailed {
                    endpoint: endpoint.clone(),
                    message: e.to_string(),
                });
                ImportShared::failed(endpoint.clone(), admin, key.clone(), e.to_string())
            }
        };

        let copy = ImportRegistration::claim(shared.clone(), self.me.clone())?;
        self.imported.lock().by_endpoint.insert(key, shared.clone());
        if shared.error().is_none() {
            self.events.emit(TopologyEvent::ImportRegistered {
                endpoint: endpoint.clone(),
            });
        }
        Ok(Some(copy))
    }

    /// Records one consumer subscription for `filter_expr`. The first
    /// subscription widens the discovery scope.
    pub async fn add_service_interest(
        &self,
        filter_expr: &str,
    ) -> Result<()> {
        let canonical = Filter::parse(filter_expr)?.as_str().to_string();
        let count = self.interest.add(canonical.clone());
        info!(filter = %canonical, count, "service interest added");
        if count == 1 {
            self.refresh_scopes().await?;
        }
        Ok(())
    }

    /// Drops one subscription. When the last one goes, the discovery scope
    /// narrows and every import created for the filter is closed.
    pub async fn remove_service_interest(
        &self,
        filter_expr: &str,
    ) -> Result<()> {
        let canonical = Filter::parse(filter_expr)?.as_str().to_string();
        match self.interest.remove(&canonical) {
            None => {
                warn!(filter = %canonical, "interest removal for untracked filter");
            }
            Some(0) => {
                info!(filter = %canonical, "last consumer gone, closing filter imports");
                self.refresh_scopes().await?;
                self.possibilities.lock().remove(&canonical);
                let victims = self
                    .imported
                    .lock()
                    .by_filter
                    .remove(&canonical)
                    .unwrap_or_default();
                for registration in victims {
                    registration.close().await;
                }
            }
            Some(count) => {
                debug!(filter = %canonical, count, "service interest removed");
            }
        }
        Ok(())
    }

    /// Re-attempts imports for every discovered endpoint that nobody could
    /// service yet. Called when a new admin registers.
    pub async fn trigger_imports(&self) {
        let pending: Vec<(String, Endpoint)> = {
            let possibilities = self.possibilities.lock();
            let imported = self.imported.lock();
            possibilities
                .iter()
                .flat_map(|(filter, endpoints)| {
                    endpoints
                        .iter()
                        .filter(|e| match imported.by_endpoint.get(&e.key()) {
                            Some(shared) => shared.is_closed(),
                            None => true,
                        })
                        .map(|e| (filter.clone(), e.clone()))
                        .collect::<Vec<_>>()
                })
                .collect()
        };
        for (filter, endpoint) in pending {
            self.submit_import(endpoint, filter).await;
        }
    }

    /// Count for one canonical filter expression, for tests and
    /// inspection.
    pub fn interest_count(
        &self,
        filter_expr: &str,
    ) -> usize {
        self.interest.count(&filter_expr.to_string())
    }

    #[cfg(test)]
    pub(crate) fn possibility_count(&self) -> usize {
        self.possibilities.lock().values().map(Vec::len).sum()
    }

    /// Tears down every import and stops accepting work. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let listener = self.listener_id.lock().take();
        if let Some(id) = listener {
            self.manager.remove_interest(id).await;
        }
        let shareds: Vec<Arc<ImportShared>> = {
            let mut imported = self.imported.lock();
            imported.by_filter.clear();
            imported.by_endpoint.drain().map(|(_, shared)| shared).collect()
        };
        self.possibilities.lock().clear();
        for shared in shareds {
            self.teardown(&shared).await;
        }
        self.workers.close();
        info!("import coordinator closed");
    }

    /// Last-copy teardown entry point, reached from
    /// [`ImportRegistration::close`].
    pub(crate) async fn release(
        &self,
        shared: &Arc<ImportShared>,
    ) {
        self.teardown(shared).await;
        let mut imported = self.imported.lock();
        if let Some(current) = imported.by_endpoint.get(&shared.key) {
            if Arc::ptr_eq(current, shared) {
                imported.by_endpoint.remove(&shared.key);
            }
        }
        for registrations in imported.by_filter.values_mut() {
            registrations.retain(|r| r.is_open());
        }
    }

    async fn teardown(
        &self,
        shared: &Arc<ImportShared>,
    ) {
        if !shared.mark_closed() {
            return;
        }
        if let Some(handle) = shared.handle() {
            handle.close().await;
            metrics::IMPORTED_ENDPOINTS.dec();
            self.events.emit(TopologyEvent::ImportUnregistered {
                endpoint: shared.endpoint.clone(),
            });
            info!(endpoint = %shared.endpoint, "import torn down");
        }
    }

    async fn dispatch(
        &self,
        signal: ImportSignal,
    ) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        match signal {
            ImportSignal::Added(endpoint, filter) => {
                {
                    let mut possibilities = self.possibilities.lock();
                    let entries = possibilities.entry(filter.clone()).or_default();
                    if !entries.contains(&endpoint) {
                        entries.push(endpoint.clone());
                    }
                }
                self.submit_import(endpoint, filter).await;
            }
            ImportSignal::Removed(endpoint, filter) => {
                {
                    let mut possibilities = self.possibilities.lock();
                    if let Some(entries) = possibilities.get_mut(&filter) {
                        entries.retain(|e| e != &endpoint);
                        if entries.is_empty() {
                            possibilities.remove(&filter);
                        }
                    }
                }
                let victims: Vec<ImportRegistration> = {
                    let mut imported = self.imported.lock();
                    match imported.by_filter.get_mut(&filter) {
                        Some(registrations) => {
                            let key = endpoint.key();
                            let kept = std::mem::take(registrations);
                            let (matching, keep): (Vec<_>, Vec<_>) =
                                kept.into_iter().partition(|r| r.endpoint().key() == key);
                            *registrations = keep;
                            matching
                        }
                        None => Vec::new(),
                    }
                };
                for registration in victims {
                    self.workers
                        .submit("close-import", async move {
                            registration.close().await;
                            Ok(())
                        })
                        .await;
                }
            }
        }
    }

    /// Queues one filter-driven import attempt on the worker pool. The
    /// resulting registration is held by the coordinator under the filter.
    async fn submit_import(
        &self,
        endpoint: Endpoint,
        filter: String,
    ) {
        let me = match self.me.upgrade() {
            Some(me) => me,
            None => return,
        };
        self.workers
            .submit("import-endpoint", async move {
                if me.closed.load(Ordering::Acquire) {
                    return Ok(());
                }
                match me.import_service(&endpoint).await? {
                    Some(registration) => {
                        me.imported
                            .lock()
                            .by_filter
                            .entry(filter)
                            .or_default()
                            .push(registration);
                    }
                    None => {
                        trace!(endpoint = %endpoint, filter = %filter, "import possibility not serviceable yet");
                    }
                }
                Ok(())
            })
            .await;
    }

    async fn refresh_scopes(&self) -> Result<()> {
        let id = *self.listener_id.lock();
        if let Some(id) = id {
            self.manager.update_interest(id, self.interest.keys()).await?;
        }
        Ok(())
    }
}

impl EndpointListener for ImportCoordinator {
    fn endpoint_added(
        &self,
        endpoint: &Endpoint,
        matched_filter: &str,
    ) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = self
            .signal_tx
            .send(ImportSignal::Added(endpoint.clone(), matched_filter.to_string()));
    }

    fn endpoint_removed(
        &self,
        endpoint: &Endpoint,
        matched_filter: &str,
    ) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = self
            .signal_tx
            .send(ImportSignal::Removed(endpoint.clone(), matched_filter.to_string()));
    }
}
