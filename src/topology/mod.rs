//! Topology layer: export and import coordination, registration lifecycle
//! and listener notification.

mod export;
mod exporter;
mod import;
mod notifier;
mod registration;
mod repository;

pub use export::*;
pub use exporter::*;
pub use import::*;
pub use notifier::*;
pub use registration::*;
pub use repository::*;


use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
#[cfg(test)]
use mockall::automock;

use crate::provider::AdminId;
use crate::Endpoint;

/// Lifecycle notifications published by the topology layer.
#[derive(Debug, Clone)]
pub enum TopologyEvent {
    ExportRegistered { endpoint: Endpoint },
    ExportFailed { service_id: u64, admin: AdminId, message: String },
    ExportUnregistered { endpoint: Endpoint },
    ImportRegistered { endpoint: Endpoint },
    ImportFailed { endpoint: Endpoint, message: String },
    ImportUnregistered { endpoint: Endpoint },
}

#[cfg_attr(test, automock)]
pub trait TopologyEventListener: Send + Sync + 'static {
    fn on_event(
        &self,
        event: &TopologyEvent,
    );
}

/// Fan-out point for [`TopologyEvent`]s. Listener callbacks run on the
/// emitting task, outside any bus lock.
pub struct EventBus {
    next_id: AtomicU64,
    listeners: DashMap<u64, Arc<dyn TopologyEventListener>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: DashMap::new(),
        }
    }

    pub fn subscribe(
        &self,
        listener: Arc<dyn TopologyEventListener>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        self.listeners.insert(id, listener);
        id
    }

    pub fn unsubscribe(
        &self,
        id: u64,
    ) {
        self.listeners.remove(&id);
    }

    pub fn emit(
        &self,
        event: TopologyEvent,
    ) {
        let targets: Vec<Arc<dyn TopologyEventListener>> =
            self.listeners.iter().map(|entry| entry.value().clone()).collect();
        for listener in targets {
            listener.on_event(&event);
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
