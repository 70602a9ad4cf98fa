use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use autometrics::autometrics;
use futures::future::join_all;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::has_export_request;
use super::EndpointNotifier;
use super::EndpointRepository;
use super::EventBus;
use super::ExportCoordinator;
use super::ExportRegistration;
use crate::config::TopologyConfig;
use crate::discovery::EndpointListener;
use crate::discovery::EndpointPublisher;
use crate::discovery::ListenerId;
use crate::provider::AdminId;
use crate::provider::TransportProvider;
use crate::PropertyMap;
use crate::Result;
use crate::ServiceDescriptor;
use crate::SystemError;
use crate::API_SLO;

struct ServiceRecord {
    descriptor: ServiceDescriptor,
    extra_props: PropertyMap,
    /// Registrations this exporter created itself when an admin arrived
    /// after the service was first exported.
    held: Vec<ExportRegistration>,
}

/// Front door of the export side: one [`ExportCoordinator`] per admin,
/// fanned out on every export call.
///
/// Exported services are remembered so admins registered later pick them
/// up, matching how endpoints from earlier admins already exist.
pub struct TopologyExporter {
    coordinators: parking_lot::RwLock<HashMap<AdminId, Arc<ExportCoordinator>>>,
    services: parking_lot::Mutex<HashMap<u64, ServiceRecord>>,
    config: TopologyConfig,
    repository: Arc<EndpointRepository>,
    notifier: Arc<EndpointNotifier>,
    publisher: Option<Arc<EndpointPublisher>>,
    events: Arc<EventBus>,
    closed: AtomicBool,
}

impl TopologyExporter {
    pub fn new(
        config: TopologyConfig,
        repository: Arc<EndpointRepository>,
        notifier: Arc<EndpointNotifier>,
        publisher: Option<Arc<EndpointPublisher>>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new(Self {
            coordinators: parking_lot::RwLock::new(HashMap::new()),
            services: parking_lot::Mutex::new(HashMap::new()),
            config,
            repository,
            notifier,
            publisher,
            events,
            closed: AtomicBool::new(false),
        })
    }

    /// Wires a coordinator for the new admin and re-exports every service
    /// exported so far through it.
    pub async fn admin_added(
        &self,
        admin: AdminId,
        provider: Arc<dyn TransportProvider>,
    ) {
        if self.closed.load(Ordering::Acquire) {
            warn!(admin = %admin, "admin registered after shutdown, ignoring");
            return;
        }
        let coordinator = ExportCoordinator::new(
            admin.clone(),
            provider,
            self.config.clone(),
            self.repository.clone(),
            self.notifier.clone(),
            self.publisher.clone(),
            self.events.clone(),
        );
        let replaced = self.coordinators.write().insert(admin.clone(), coordinator.clone());
        if let Some(old) = replaced {
            warn!(admin = %admin, "admin id reused, closing previous coordinator");
            old.close_all().await;
        }
        info!(admin = %admin, "admin registered");

        let known: Vec<(u64, ServiceDescriptor, PropertyMap)> = {
            let services = self.services.lock();
            services
                .iter()
                .map(|(id, record)| (*id, record.descriptor.clone(), record.extra_props.clone()))
                .collect()
        };
        for (service_id, descriptor, extra_props) in known {
            match coordinator.export_service(&descriptor, &extra_props).await {
                Ok(registrations) => {
                    if registrations.is_empty() {
                        continue;
                    }
                    let mut services = self.services.lock();
                    if let Some(record) = services.get_mut(&service_id) {
                        record.held.extend(registrations);
                    }
                }
                Err(e) => {
                    warn!(
                        admin = %admin,
                        service_id,
                        error = %e,
                        "re-export through new admin failed"
                    );
                }
            }
        }
    }

    /// Drops the admin's coordinator and tears its exports down.
    pub async fn admin_removed(
        &self,
        admin: &AdminId,
    ) {
        let coordinator = self.coordinators.write().remove(admin);
        match coordinator {
            Some(coordinator) => {
                coordinator.close_all().await;
                let mut services = self.services.lock();
                for record in services.values_mut() {
                    record.held.retain(|r| r.is_open());
                }
                info!(admin = %admin, "admin unregistered");
            }
            None => {
                debug!(admin = %admin, "removal of unknown admin");
            }
        }
    }

    /// Exports the service through every registered admin and returns the
    /// combined registrations.
    ///
    /// Services that do not request export are skipped silently. When
    /// every admin rejects the request the first error is returned;
    /// individual admin failures alongside successes are logged and the
    /// successes returned.
    #[autometrics(objective = API_SLO)]
    pub async fn export_service(
        &self,
        service: &ServiceDescriptor,
        extra_props: &PropertyMap,
    ) -> Result<Vec<ExportRegistration>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SystemError::Shutdown.into());
        }
        if !has_export_request(service, extra_props, &self.config) {
            debug!(service_id = service.service_id(), "service does not request export, skipping");
            return Ok(Vec::new());
        }

        let coordinators: Vec<Arc<ExportCoordinator>> =
            self.coordinators.read().values().cloned().collect();
        if coordinators.is_empty() {
            debug!(service_id = service.service_id(), "no admins registered, export deferred");
            self.record_service(service, extra_props);
            return Ok(Vec::new());
        }

        let results = join_all(
            coordinators.iter().map(|c| c.export_service(service, extra_props)),
        )
        .await;

        let mut registrations = Vec::new();
        let mut first_error = None;
        for (coordinator, result) in coordinators.iter().zip(results) {
            match result {
                Ok(regs) => registrations.extend(regs),
                Err(e) => {
                    warn!(
                        admin = %coordinator.admin(),
                        service_id = service.service_id(),
                        error = %e,
                        "export failed"
                    );
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if registrations.is_empty() {
            if let Some(e) = first_error {
                return Err(e);
            }
        }
        self.record_service(service, extra_props);
        Ok(registrations)
    }

    /// Tears down everything exported for the service, on every admin.
    pub async fn service_unregistered(
        &self,
        service_id: u64,
    ) {
        let record = self.services.lock().remove(&service_id);
        if let Some(record) = record {
            for registration in record.held {
                registration.close().await;
            }
        }
        let coordinators: Vec<Arc<ExportCoordinator>> =
            self.coordinators.read().values().cloned().collect();
        for coordinator in coordinators {
            coordinator.remove_service(service_id).await;
        }
    }

    /// Subscribes a listener to locally exported endpoints. Already
    /// exported endpoints arrive as initial callbacks.
    pub fn add_listener(
        &self,
        listener: Arc<dyn EndpointListener>,
        filter_exprs: Vec<String>,
    ) -> Result<ListenerId> {
        self.notifier.add_listener(listener, filter_exprs, &self.repository.all_endpoints())
    }

    pub fn remove_listener(
        &self,
        id: ListenerId,
    ) -> bool {
        self.notifier.remove_listener(id)
    }

    /// Closes every coordinator and forgets all services. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let records: Vec<ServiceRecord> = {
            let mut services = self.services.lock();
            services.drain().map(|(_, record)| record).collect()
        };
        for record in records {
            for registration in record.held {
                registration.close().await;
            }
        }
        let coordinators: Vec<Arc<ExportCoordinator>> = {
            let mut map = self.coordinators.write();
            map.drain().map(|(_, c)| c).collect()
        };
        for coordinator in coordinators {
            coordinator.close_all().await;
        }
        info!("topology exporter closed");
    }

    fn record_service(
        &self,
        service: &ServiceDescriptor,
        extra_props: &PropertyMap,
    ) {
        let mut services = self.services.lock();
        services
            .entry(service.service_id())
            .and_modify(|record| {
                record.descriptor = service.clone();
                record.extra_props = extra_props.clone();
            })
            .or_insert_with(|| ServiceRecord {
                descriptor: service.clone(),
                extra_props: extra_props.clone(),
                held: Vec::new(),
            });
    }
}
