use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::discovery::EndpointListener;
use crate::discovery::ListenerId;
use crate::Endpoint;
use crate::Filter;
use crate::Result;

struct NotifierEntry {
    listener: Arc<dyn EndpointListener>,
    filters: Vec<Filter>,
    /// Serializes callbacks to this listener.
    delivery: Arc<Mutex<()>>,
}

/// Notifies host listeners about locally exported endpoints. One callback
/// per matching filter per listener; the table lock is never held across
/// callbacks.
pub struct EndpointNotifier {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<ListenerId, NotifierEntry>>,
}

impl EndpointNotifier {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a listener. Endpoints in `current` that match are
    /// delivered as initial added callbacks before this returns.
    pub fn add_listener(
        &self,
        listener: Arc<dyn EndpointListener>,
        filter_exprs: Vec<String>,
        current: &[Endpoint],
    ) -> Result<ListenerId> {
        let filters = parse_filters(&filter_exprs)?;
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::AcqRel));
        let delivery = Arc::new(Mutex::new(()));
        self.listeners.lock().insert(
            id,
            NotifierEntry {
                listener: listener.clone(),
                filters: filters.clone(),
                delivery: delivery.clone(),
            },
        );
        let _guard = delivery.lock();
        for endpoint in current {
            for filter in &filters {
                if endpoint.matches(filter) {
                    listener.endpoint_added(endpoint, filter.as_str());
                }
            }
        }
        debug!(%id, filters = filter_exprs.len(), "export listener registered");
        Ok(id)
    }

    /// Replaces the listener's filter set. Takes effect for all later
    /// notifications.
    pub fn set_filters(
        &self,
        id: ListenerId,
        filter_exprs: Vec<String>,
    ) -> Result<()> {
        let filters = parse_filters(&filter_exprs)?;
        if let Some(entry) = self.listeners.lock().get_mut(&id) {
            entry.filters = filters;
        }
        Ok(())
    }

    pub fn remove_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.listeners.lock().remove(&id).is_some()
    }

    pub fn notify_added(
        &self,
        endpoints: &[Endpoint],
    ) {
        self.notify(endpoints, true);
    }

    pub fn notify_removed(
        &self,
        endpoints: &[Endpoint],
    ) {
        self.notify(endpoints, false);
    }

    fn notify(
        &self,
        endpoints: &[Endpoint],
        added: bool,
    ) {
        if endpoints.is_empty() {
            return;
        }
        let targets: Vec<(Arc<dyn EndpointListener>, Arc<Mutex<()>>, Vec<Filter>)> = {
            let listeners = self.listeners.lock();
            listeners
                .values()
                .map(|entry| (entry.listener.clone(), entry.delivery.clone(), entry.filters.clone()))
                .collect()
        };
        for (listener, delivery, filters) in targets {
            let _guard = delivery.lock();
            for endpoint in endpoints {
                for filter in &filters {
                    if endpoint.matches(filter) {
                        if added {
                            listener.endpoint_added(endpoint, filter.as_str());
                        } else {
                            listener.endpoint_removed(endpoint, filter.as_str());
                        }
                    }
                }
            }
        }
    }
}

impl Default for EndpointNotifier {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_filters(exprs: &[String]) -> Result<Vec<Filter>> {
    let mut filters = Vec::with_capacity(exprs.len());
    for expr in exprs {
        filters.push(Filter::parse(expr)?);
    }
    Ok(filters)
}
