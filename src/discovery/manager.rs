use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::debug;
use tracing::warn;

use super::EndpointListener;
use super::RegistryWatcher;
use super::Scope;
use crate::config::BackoffPolicy;
use crate::registry::RegistryBackend;
use crate::Endpoint;
use crate::EndpointCodec;
use crate::Filter;
use crate::Result;
use crate::SystemError;

/// Handle identifying one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new(raw: u64) -> Self {
        ListenerId(raw)
    }
}

impl fmt::Display for ListenerId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

struct ListenerEntry {
    listener: Arc<dyn EndpointListener>,
    /// Filters as last updated. Fan-out re-evaluates these at delivery
    /// time, so scope updates take effect for in-flight events too.
    filters: Vec<Filter>,
    /// Serializes callbacks to this listener.
    delivery: Arc<Mutex<()>>,
}

struct Interest {
    subscribers: Vec<ListenerId>,
    watcher: Arc<RegistryWatcher>,
}

struct ManagerState {
    /// Keyed by the canonical filter expression. At most one watcher per
    /// scope at any time.
    interests: HashMap<String, Interest>,
    listeners: HashMap<ListenerId, ListenerEntry>,
}

/// Multiplexes listeners over per-scope registry watchers.
///
/// Listeners sharing a scope share one watcher. The last listener leaving
/// a scope closes its watcher. The state lock is never held across
/// listener callbacks or watcher lifecycle calls.
pub struct WatcherManager {
    me: Weak<WatcherManager>,
    backend: Arc<dyn RegistryBackend>,
    codec: Arc<dyn EndpointCodec>,
    base_path: String,
    policy: BackoffPolicy,
    next_id: AtomicU64,
    closed: AtomicBool,
    state: Mutex<ManagerState>,
}

impl WatcherManager {
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        codec: Arc<dyn EndpointCodec>,
        base_path: String,
        policy: BackoffPolicy,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            backend,
            codec,
            base_path,
            policy,
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            state: Mutex::new(ManagerState {
                interests: HashMap::new(),
                listeners: HashMap::new(),
            }),
        })
    }

    /// Registers `listener` under the given filter expressions and starts
    /// watching them. Endpoints already known for each scope are delivered
    /// before this returns.
    pub async fn add_interest(
        &self,
        listener: Arc<dyn EndpointListener>,
        filters: Vec<String>,
    ) -> Result<ListenerId> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SystemError::Shutdown.into());
        }
        let scopes = parse_scopes(&filters)?;
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::AcqRel));

        let (started, joined) = {
            let mut state = self.state.lock();
            state.listeners.insert(
                id,
                ListenerEntry {
                    listener,
                    filters: scopes.iter().map(|s| s.filter().clone()).collect(),
                    delivery: Arc::new(Mutex::new(())),
                },
            );
            self.attach_scopes(&mut state, id, &scopes)
        };

        self.activate(id, started, joined).await;
        debug!(%id, scopes = filters.len(), "listener registered");
        Ok(id)
    }

    /// Replaces the listener's filter set. New scopes are joined, dropped
    /// scopes are left, and watchers without remaining subscribers close.
    pub async fn update_interest(
        &self,
        id: ListenerId,
        filters: Vec<String>,
    ) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SystemError::Shutdown.into());
        }
        let scopes = parse_scopes(&filters)?;

        let (started, joined, orphaned) = {
            let mut state = self.state.lock();
            if !state.listeners.contains_key(&id) {
                warn!(%id, "interest update for unknown listener, ignoring");
                return Ok(());
            }

            let new_keys: HashSet<&str> = scopes.iter().map(|s| s.as_str()).collect();
            let old_keys: Vec<String> = state
                .interests
                .iter()
                .filter(|(_, interest)| interest.subscribers.contains(&id))
                .map(|(key, _)| key.clone())
                .collect();

            let mut orphaned = Vec::new();
            for key in old_keys.iter().filter(|k| !new_keys.contains(k.as_str())) {
                if let Some(watcher) = detach(&mut state, id, key) {
                    orphaned.push(watcher);
                }
            }

            let fresh: Vec<Scope> = scopes
                .iter()
                .filter(|s| !old_keys.iter().any(|k| k == s.as_str()))
                .cloned()
                .collect();
            if let Some(entry) = state.listeners.get_mut(&id) {
                entry.filters = scopes.iter().map(|s| s.filter().clone()).collect();
            }
            let (started, joined) = self.attach_scopes(&mut state, id, &fresh);
            (started, joined, orphaned)
        };

        for watcher in orphaned {
            watcher.close().await;
        }
        self.activate(id, started, joined).await;
        Ok(())
    }

    /// Deregisters the listener. Watchers it was the last subscriber of are
    /// closed; their synthesized removals fan out to nobody.
    pub async fn remove_interest(
        &self,
        id: ListenerId,
    ) {
        let orphaned = {
            let mut state = self.state.lock();
            if state.listeners.remove(&id).is_none() {
                return;
            }
            let keys: Vec<String> = state
                .interests
                .iter()
                .filter(|(_, interest)| interest.subscribers.contains(&id))
                .map(|(key, _)| key.clone())
                .collect();
            let mut orphaned = Vec::new();
            for key in &keys {
                if let Some(watcher) = detach(&mut state, id, key) {
                    orphaned.push(watcher);
                }
            }
            orphaned
        };
        for watcher in orphaned {
            watcher.close().await;
        }
        debug!(%id, "listener deregistered");
    }

    #[cfg(test)]
    pub(crate) fn interest_count(&self) -> usize {
        self.state.lock().interests.len()
    }

    /// Snapshot of the endpoints currently known for one scope.
    pub fn endpoints_for(
        &self,
        scope_expr: &str,
    ) -> Vec<Endpoint> {
        let watcher = {
            let state = self.state.lock();
            state.interests.get(scope_expr).map(|i| i.watcher.clone())
        };
        watcher.map(|w| w.endpoints()).unwrap_or_default()
    }

    /// Closes every watcher, fanning synthesized removals out to still
    /// registered listeners, then drops all registrations. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let watchers: Vec<Arc<RegistryWatcher>> = {
            let state = self.state.lock();
            state.interests.values().map(|i| i.watcher.clone()).collect()
        };
        for watcher in watchers {
            watcher.close().await;
        }
        let mut state = self.state.lock();
        state.interests.clear();
        state.listeners.clear();
        debug!("watcher manager closed");
    }

    /// Joins or creates the interest for each scope. Returns watchers that
    /// still need starting and already running watchers the listener needs
    /// an initial sync from. Caller holds the state lock.
    fn attach_scopes(
        &self,
        state: &mut ManagerState,
        id: ListenerId,
        scopes: &[Scope],
    ) -> (Vec<Arc<RegistryWatcher>>, Vec<Arc<RegistryWatcher>>) {
        let mut started = Vec::new();
        let mut joined = Vec::new();
        for scope in scopes {
            match state.interests.get_mut(scope.as_str()) {
                Some(interest) => {
                    if !interest.subscribers.contains(&id) {
                        interest.subscribers.push(id);
                    }
                    joined.push(interest.watcher.clone());
                }
                None => {
                    let sink = Arc::new(ScopeSink {
                        manager: self.me.clone(),
                        scope: scope.as_str().to_string(),
                    });
                    let watcher = RegistryWatcher::new(
                        scope,
                        &self.base_path,
                        self.backend.clone(),
                        self.codec.clone(),
                        sink,
                        self.policy,
                    );
                    state.interests.insert(
                        scope.as_str().to_string(),
                        Interest {
                            subscribers: vec![id],
                            watcher: watcher.clone(),
                        },
                    );
                    started.push(watcher);
                }
            }
        }
        (started, joined)
    }

    /// Starts fresh watchers (their initial rescan fans out through
    /// dispatch) and replays current snapshots of joined watchers to the
    /// new subscriber.
    async fn activate(
        &self,
        id: ListenerId,
        started: Vec<Arc<RegistryWatcher>>,
        joined: Vec<Arc<RegistryWatcher>>,
    ) {
        for watcher in &started {
            watcher.start().await;
        }
        for watcher in &joined {
            self.deliver_initial(id, watcher);
        }
    }

    /// Replays an already running watcher's snapshot to one listener.
    fn deliver_initial(
        &self,
        id: ListenerId,
        watcher: &Arc<RegistryWatcher>,
    ) {
        let endpoints = watcher.endpoints();
        if endpoints.is_empty() {
            return;
        }
        let target = {
            let state = self.state.lock();
            state
                .listeners
                .get(&id)
                .map(|entry| (entry.listener.clone(), entry.delivery.clone(), entry.filters.clone()))
        };
        let (listener, delivery, filters) = match target {
            Some(target) => target,
            None => return,
        };
        let _guard = delivery.lock();
        for endpoint in &endpoints {
            for filter in &filters {
                if endpoint.matches(filter) {
                    listener.endpoint_added(endpoint, filter.as_str());
                }
            }
        }
    }

    /// Fan-out for one watcher delta. Recipients and their current filters
    /// are collected under the state lock, callbacks run outside it.
    fn dispatch(
        &self,
        scope_expr: &str,
        endpoint: &Endpoint,
        added: bool,
    ) {
        let recipients = {
            let state = self.state.lock();
            let interest = match state.interests.get(scope_expr) {
                Some(interest) => interest,
                None => return,
            };
            let mut recipients = Vec::new();
            for id in &interest.subscribers {
                // Listeners deregistered mid-flight are silently skipped.
                if let Some(entry) = state.listeners.get(id) {
                    let matched: Vec<String> = entry
                        .filters
                        .iter()
                        .filter(|f| endpoint.matches(f))
                        .map(|f| f.as_str().to_string())
                        .collect();
                    if !matched.is_empty() {
                        recipients.push((entry.listener.clone(), entry.delivery.clone(), matched));
                    }
                }
            }
            recipients
        };

        for (listener, delivery, matched) in recipients {
            let _guard = delivery.lock();
            for filter in &matched {
                if added {
                    listener.endpoint_added(endpoint, filter);
                } else {
                    listener.endpoint_removed(endpoint, filter);
                }
            }
        }
    }
}

/// Per-scope sink handed to a watcher. Holds the manager weakly so a
/// watcher task never keeps a closed manager alive.
struct ScopeSink {
    manager: Weak<WatcherManager>,
    scope: String,
}

impl EndpointListener for ScopeSink {
    fn endpoint_added(
        &self,
        endpoint: &Endpoint,
        _matched_filter: &str,
    ) {
        if let Some(manager) = self.manager.upgrade() {
            manager.dispatch(&self.scope, endpoint, true);
        }
    }

    fn endpoint_removed(
        &self,
        endpoint: &Endpoint,
        _matched_filter: &str,
    ) {
        if let Some(manager) = self.manager.upgrade() {
            manager.dispatch(&self.scope, endpoint, false);
        }
    }
}

fn parse_scopes(filters: &[String]) -> Result<Vec<Scope>> {
    let mut scopes = Vec::with_capacity(filters.len());
    let mut seen = HashSet::new();
    for expr in filters {
        let scope = Scope::parse(expr)?;
        if seen.insert(scope.as_str().to_string()) {
            scopes.push(scope);
        }
    }
    Ok(scopes)
}

/// Removes `id` from one interest. Returns the watcher when the interest
/// lost its last subscriber and was dropped from the map. Caller holds the
/// state lock and must close the watcher after releasing it.
fn detach(
    state: &mut ManagerState,
    id: ListenerId,
    scope_expr: &str,
) -> Option<Arc<RegistryWatcher>> {
    let interest = state.interests.get_mut(scope_expr)?;
    interest.subscribers.retain(|s| *s != id);
    if interest.subscribers.is_empty() {
        state.interests.remove(scope_expr).map(|i| i.watcher)
    } else {
        None
    }
}
