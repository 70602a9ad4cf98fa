use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::EndpointListener;
use super::Scope;
use crate::config::BackoffPolicy;
use crate::metrics;
use crate::registry::RegistryBackend;
use crate::registry::RegistryEvent;
use crate::registry::WatchObserver;
use crate::utils::task::spawn_task;
use crate::Endpoint;
use crate::EndpointCodec;
use crate::RegistryError;

/// Watches one registry subtree and converts node churn into endpoint
/// added/removed callbacks.
///
/// Registry watches are one-shot, so every event triggers a full rescan of
/// the subtree which re-arms the watches and diffs the result against the
/// last known state. All state mutation and delta delivery happen under the
/// `known` lock; concurrent rescans collapse into sequential ones.
pub struct RegistryWatcher {
    scope_expr: String,
    node_path: String,
    recursive: bool,
    backend: Arc<dyn RegistryBackend>,
    codec: Arc<dyn EndpointCodec>,
    sink: Arc<dyn EndpointListener>,
    policy: BackoffPolicy,

    /// Canonical node-path to endpoint map. Held across backend awaits so
    /// rescans serialize and deltas are delivered in order.
    known: Mutex<HashMap<String, Endpoint>>,
    /// Lock-free copy of `known` for snapshot reads.
    snapshot: ArcSwap<HashMap<String, Endpoint>>,
    closed: AtomicBool,
    /// Consecutive rescan failures, reset on success.
    failures: AtomicUsize,

    event_tx: mpsc::UnboundedSender<RegistryEvent>,
    event_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<RegistryEvent>>>,
    // Shutdown signal for the event loop
    shutdown_tx: watch::Sender<()>,
}

impl RegistryWatcher {
    pub fn new(
        scope: &Scope,
        base_path: &str,
        backend: Arc<dyn RegistryBackend>,
        codec: Arc<dyn EndpointCodec>,
        sink: Arc<dyn EndpointListener>,
        policy: BackoffPolicy,
    ) -> Arc<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(());
        Arc::new(Self {
            scope_expr: scope.as_str().to_string(),
            node_path: scope.node_path(base_path),
            recursive: scope.recursive(),
            backend,
            codec,
            sink,
            policy,
            known: Mutex::new(HashMap::new()),
            snapshot: ArcSwap::from_pointee(HashMap::new()),
            closed: AtomicBool::new(false),
            failures: AtomicUsize::new(0),
            event_tx,
            event_rx: std::sync::Mutex::new(Some(event_rx)),
            shutdown_tx,
        })
    }

    /// Spawns the event loop and performs the initial rescan. Endpoints
    /// already present in the registry are delivered before this returns.
    pub async fn start(self: &Arc<Self>) {
        let mut event_rx = match self.event_rx.lock() {
            Ok(mut slot) => match slot.take() {
                Some(rx) => rx,
                None => {
                    warn!(scope = %self.scope_expr, "watcher started twice, ignoring");
                    return;
                }
            },
            Err(poisoned) => match poisoned.into_inner().take() {
                Some(rx) => rx,
                None => return,
            },
        };

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let me = self.clone();
        spawn_task(
            "registry-watcher",
            move || async move {
                loop {
                    tokio::select! {
                        // P0: close requested
                        _ = shutdown_rx.changed() => {
                            debug!(scope = %me.scope_expr, "watcher event loop stopping");
                            return Ok(());
                        }

                        // Fired one-shot watch: rescan and re-arm
                        event = event_rx.recv() => {
                            match event {
                                Some(event) => {
                                    trace!(scope = %me.scope_expr, path = %event.path, kind = ?event.kind, "registry event");
                                    me.clone().rescan().await;
                                }
                                None => return Ok(()),
                            }
                        }
                    }
                }
            },
            None,
        );

        metrics::ACTIVE_WATCHERS.inc();
        self.clone().rescan().await;
    }

    /// Current endpoint set without touching any lock.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.snapshot.load().values().cloned().collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn scope_expr(&self) -> &str {
        &self.scope_expr
    }

    /// Stops the event loop and synthesizes a removed callback for every
    /// known endpoint. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(());

        let mut known = self.known.lock().await;
        let entries: Vec<Endpoint> = known.values().cloned().collect();
        known.clear();
        self.snapshot.store(Arc::new(HashMap::new()));
        for endpoint in &entries {
            self.sink.endpoint_removed(endpoint, &self.scope_expr);
        }
        drop(known);

        metrics::ACTIVE_WATCHERS.dec();
        debug!(scope = %self.scope_expr, removed = entries.len(), "watcher closed");
    }

    /// Full subtree scan: re-arms all watches, diffs against the known set
    /// and delivers the delta. Serialized by the `known` lock.
    async fn rescan(self: Arc<Self>) {
        if self.is_closed() {
            return;
        }
        let mut known = self.known.lock().await;
        // Recheck: close() may have won the lock race.
        if self.is_closed() {
            return;
        }

        metrics::WATCHER_RESCANS.inc();
        match self.scan().await {
            Ok(current) => {
                self.failures.store(0, Ordering::Release);
                let (added, removed) = diff(&known, &current);
                *known = current.clone();
                self.snapshot.store(Arc::new(current));
                metrics::ENDPOINTS_ADDED.inc_by(added.len() as u64);
                metrics::ENDPOINTS_REMOVED.inc_by(removed.len() as u64);
                for endpoint in &removed {
                    self.sink.endpoint_removed(endpoint, &self.scope_expr);
                }
                for endpoint in &added {
                    self.sink.endpoint_added(endpoint, &self.scope_expr);
                }
                if !added.is_empty() || !removed.is_empty() {
                    debug!(
                        scope = %self.scope_expr,
                        added = added.len(),
                        removed = removed.len(),
                        "endpoint delta applied"
                    );
                }
            }
            Err(e) if e.is_session_related() => {
                // The backend re-fires watches once the session is back.
                debug!(scope = %self.scope_expr, error = %e, "rescan skipped, session unavailable");
            }
            Err(e) => {
                drop(known);
                self.schedule_retry(e);
            }
        }
    }

    /// Reads the whole subtree, arming existence, child and data watches as
    /// it goes. Nodes vanishing mid-scan are skipped, not errors.
    async fn scan(&self) -> std::result::Result<HashMap<String, Endpoint>, RegistryError> {
        let observer = self.observer();
        let mut found = HashMap::new();

        if !self.backend.exists(&self.node_path, Some(observer.clone())).await? {
            return Ok(found);
        }

        let mut pending = vec![self.node_path.clone()];
        while let Some(dir) = pending.pop() {
            let children = match self.backend.get_children(&dir, Some(observer.clone())).await {
                Ok(children) => children,
                Err(RegistryError::NoNode(_)) => continue,
                Err(e) => return Err(e),
            };
            for name in children {
                let child = format!("{}/{}", dir, name);
                match self.backend.get_data(&child, Some(observer.clone())).await {
                    Ok(data) => {
                        if let Some(endpoint) = self.codec.decode(&data) {
                            found.insert(child.clone(), endpoint);
                        }
                    }
                    Err(RegistryError::NoNode(_)) => {}
                    Err(e) => return Err(e),
                }
                if self.recursive {
                    pending.push(child);
                }
            }
        }
        Ok(found)
    }

    fn observer(&self) -> WatchObserver {
        let tx = self.event_tx.clone();
        Arc::new(move |event| {
            let _ = tx.send(event);
        })
    }

    #[cfg(test)]
    pub(crate) fn inject_event(
        &self,
        event: RegistryEvent,
    ) {
        let _ = self.event_tx.send(event);
    }

    /// Transient failure: retry with exponential backoff, bounded by the
    /// watch retry policy. Once exhausted the next registry event takes
    /// over.
    fn schedule_retry(
        self: Arc<Self>,
        error: RegistryError,
    ) {
        let attempt = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
        if attempt > self.policy.max_retries {
            warn!(
                scope = %self.scope_expr,
                error = %error,
                attempt,
                "rescan retries exhausted, waiting for next registry event"
            );
            return;
        }
        let shift = (attempt - 1).min(16) as u32;
        let delay_ms = self
            .policy
            .base_delay_ms
            .saturating_mul(1u64 << shift)
            .min(self.policy.max_delay_ms);
        warn!(
            scope = %self.scope_expr,
            error = %error,
            attempt,
            delay_ms,
            "rescan failed, retrying"
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            self.rescan().await;
        });
    }
}

/// Entry-wise diff keyed by node path. A changed entry surfaces as a
/// removal of the old endpoint followed by an addition of the new one.
fn diff(
    old: &HashMap<String, Endpoint>,
    new: &HashMap<String, Endpoint>,
) -> (Vec<Endpoint>, Vec<Endpoint>) {
    let mut added = Vec::new();
    let mut removed = Vec::new();
    for (path, endpoint) in new {
        match old.get(path) {
            None => added.push(endpoint.clone()),
            Some(previous) if previous != endpoint => {
                removed.push(previous.clone());
                added.push(endpoint.clone());
            }
            Some(_) => {}
        }
    }
    for (path, endpoint) in old {
        if !new.contains_key(path) {
            removed.push(endpoint.clone());
        }
    }
    (added, removed)
}
