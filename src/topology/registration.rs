use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use super::ExportCoordinator;
use super::ImportCoordinator;
use crate::provider::AdminId;
use crate::provider::ExportHandle;
use crate::provider::ImportHandle;
use crate::Endpoint;
use crate::PropertyKey;
use crate::Result;
use crate::TopologyError;

/// What one export attempt produced: a live remote endpoint, or the error
/// the provider reported. Failures stay addressable so every caller
/// sharing the key sees the same outcome.
pub(crate) enum ExportOutcome {
    Live {
        endpoint: Endpoint,
        handle: Arc<dyn ExportHandle>,
    },
    Failed {
        message: String,
    },
}

/// State shared by every copy of one export. Copies count `instances` up
/// and down; whoever drops it to zero tears the export down through the
/// coordinator.
pub(crate) struct ExportShared {
    pub(crate) service_id: u64,
    pub(crate) admin: AdminId,
    pub(crate) key: PropertyKey,
    pub(crate) outcome: ExportOutcome,
    instances: AtomicUsize,
    closed: AtomicBool,
}

impl ExportShared {
    pub(crate) fn live(
        service_id: u64,
        admin: AdminId,
        key: PropertyKey,
        endpoint: Endpoint,
        handle: Arc<dyn ExportHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            service_id,
            admin,
            key,
            outcome: ExportOutcome::Live { endpoint, handle },
            instances: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn failed(
        service_id: u64,
        admin: AdminId,
        key: PropertyKey,
        message: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            service_id,
            admin,
            key,
            outcome: ExportOutcome::Failed { message },
            instances: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn endpoint(&self) -> Option<&Endpoint> {
        match &self.outcome {
            ExportOutcome::Live { endpoint, .. } => Some(endpoint),
            ExportOutcome::Failed { .. } => None,
        }
    }

    pub(crate) fn error(&self) -> Option<&str> {
        match &self.outcome {
            ExportOutcome::Live { .. } => None,
            ExportOutcome::Failed { message } => Some(message),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// First closer wins; everyone else sees `false` and skips teardown.
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Claims one instance. Fails when the export was torn down between
    /// lookup and claim.
    pub(crate) fn acquire(&self) -> std::result::Result<(), TopologyError> {
        self.instances.fetch_add(1, Ordering::AcqRel);
        if self.is_closed() {
            self.instances.fetch_sub(1, Ordering::AcqRel);
            return Err(TopologyError::RegistrationClosed);
        }
        Ok(())
    }

    /// Drops one instance. True when this was the last one.
    pub(crate) fn release_instance(&self) -> bool {
        self.instances.fetch_sub(1, Ordering::AcqRel) == 1
    }

    #[cfg(test)]
    pub(crate) fn instance_count(&self) -> usize {
        self.instances.load(Ordering::Acquire)
    }
}

/// One caller's handle on an export. Independent copies of the same
/// underlying export are closed independently; the provider-side endpoint
/// lives until the last copy goes.
pub struct ExportRegistration {
    shared: Arc<ExportShared>,
    coordinator: Weak<ExportCoordinator>,
    open: AtomicBool,
}

impl ExportRegistration {
    pub(crate) fn claim(
        shared: Arc<ExportShared>,
        coordinator: Weak<ExportCoordinator>,
    ) -> std::result::Result<Self, TopologyError> {
        shared.acquire()?;
        Ok(Self {
            shared,
            coordinator,
            open: AtomicBool::new(true),
        })
    }

    /// The exported endpoint, `None` when the export failed or was closed.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        if self.shared.is_closed() {
            return None;
        }
        self.shared.endpoint()
    }

    /// The provider error when this registration is in the failed state.
    pub fn error(&self) -> Option<&str> {
        self.shared.error()
    }

    pub fn service_id(&self) -> u64 {
        self.shared.service_id
    }

    pub fn admin(&self) -> &AdminId {
        &self.shared.admin
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.shared.is_closed()
    }

    /// An independent copy sharing the underlying export.
    pub fn try_copy(&self) -> Result<ExportRegistration> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TopologyError::RegistrationClosed.into());
        }
        let copy = Self::claim(self.shared.clone(), self.coordinator.clone())?;
        Ok(copy)
    }

    /// Closes this copy. The underlying export is torn down when the last
    /// copy closes. Idempotent per copy.
    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.shared.release_instance() {
            if let Some(coordinator) = self.coordinator.upgrade() {
                coordinator.release(&self.shared).await;
            }
        }
    }
}

/// Import-side outcome: a wired local proxy or the recorded provider
/// error.
pub(crate) enum ImportOutcome {
    Live {
        handle: Arc<dyn ImportHandle>,
    },
    Failed {
        message: String,
    },
}

pub(crate) struct ImportShared {
    pub(crate) endpoint: Endpoint,
    pub(crate) admin: AdminId,
    pub(crate) key: PropertyKey,
    pub(crate) outcome: ImportOutcome,
    instances: AtomicUsize,
    closed: AtomicBool,
}

impl ImportShared {
    pub(crate) fn live(
        endpoint: Endpoint,
        admin: AdminId,
        key: PropertyKey,
        handle: Arc<dyn ImportHandle>,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            admin,
            key,
            outcome: ImportOutcome::Live { handle },
            instances: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn failed(
        endpoint: Endpoint,
        admin: AdminId,
        key: PropertyKey,
        message: String,
    ) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            admin,
            key,
            outcome: ImportOutcome::Failed { message },
            instances: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn handle(&self) -> Option<&Arc<dyn ImportHandle>> {
        match &self.outcome {
            ImportOutcome::Live { handle } => Some(handle),
            ImportOutcome::Failed { .. } => None,
        }
    }

    pub(crate) fn error(&self) -> Option<&str> {
        match &self.outcome {
            ImportOutcome::Live { .. } => None,
            ImportOutcome::Failed { message } => Some(message),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn acquire(&self) -> std::result::Result<(), TopologyError> {
        self.instances.fetch_add(1, Ordering::AcqRel);
        if self.is_closed() {
            self.instances.fetch_sub(1, Ordering::AcqRel);
            return Err(TopologyError::RegistrationClosed);
        }
        Ok(())
    }

    pub(crate) fn release_instance(&self) -> bool {
        self.instances.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// One consumer's handle on an imported endpoint. Mirrors
/// [`ExportRegistration`]: the proxy stays wired until the last copy is
/// closed or the endpoint vanishes from the registry.
pub struct ImportRegistration {
    shared: Arc<ImportShared>,
    coordinator: Weak<ImportCoordinator>,
    open: AtomicBool,
}

impl ImportRegistration {
    pub(crate) fn claim(
        shared: Arc<ImportShared>,
        coordinator: Weak<ImportCoordinator>,
    ) -> std::result::Result<Self, TopologyError> {
        shared.acquire()?;
        Ok(Self {
            shared,
            coordinator,
            open: AtomicBool::new(true),
        })
    }

    /// The remote endpoint this import is wired to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    /// Local service id of the proxy, `None` while failed or closed.
    pub fn service_id(&self) -> Option<u64> {
        if self.shared.is_closed() {
            return None;
        }
        self.shared.handle().map(|h| h.service_id())
    }

    pub fn error(&self) -> Option<&str> {
        self.shared.error()
    }

    pub fn admin(&self) -> &AdminId {
        &self.shared.admin
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.shared.is_closed()
    }

    pub fn try_copy(&self) -> Result<ImportRegistration> {
        if !self.open.load(Ordering::Acquire) {
            return Err(TopologyError::RegistrationClosed.into());
        }
        let copy = Self::claim(self.shared.clone(), self.coordinator.clone())?;
        Ok(copy)
    }

    pub async fn close(&self) {
        if !self.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.shared.release_instance() {
            if let Some(coordinator) = self.coordinator.upgrade() {
                coordinator.release(&self.shared).await;
            }
        }
    }

    pub(crate) fn shared(&self) -> &Arc<ImportShared> {
        &self.shared
    }
}
