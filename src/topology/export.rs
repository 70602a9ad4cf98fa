use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;
use std::time::Instant;

use autometrics::autometrics;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::EndpointNotifier;
use super::EndpointRepository;
use super::EventBus;
use super::ExportOutcome;
use super::ExportRegistration;
use super::ExportShared;
use super::TopologyEvent;
use crate::config::TopologyConfig;
use crate::constants::BIND_HOST;
use crate::constants::BIND_PORT;
use crate::constants::SERVICE_CONFIGS;
use crate::constants::SERVICE_EXPORTED_CONFIGS;
use crate::constants::SERVICE_EXPORTED_INTENTS;
use crate::constants::SERVICE_EXPORTED_TYPES;
use crate::constants::SERVICE_IMPORTED;
use crate::constants::SERVICE_INTENTS;
use crate::constants::SERVICE_TYPES;
use crate::constants::TYPES_WILDCARD;
use crate::discovery::EndpointPublisher;
use crate::metrics;
use crate::provider::AdminId;
use crate::provider::TransportProvider;
use crate::Endpoint;
use crate::ExportError;
use crate::PropertyKey;
use crate::PropertyMap;
use crate::PropertyValue;
use crate::Result;
use crate::ServiceDescriptor;
use crate::SystemError;
use crate::API_SLO;

/// Dedup state for one export key.
enum ExportSlot {
    /// Someone is exporting right now; waiters subscribe to the sender.
    InProgress(watch::Sender<bool>),
    /// Export finished, live or failed. Later callers take copies.
    Resolved(Vec<Arc<ExportShared>>),
}

enum SlotAction {
    Export,
    Wait(watch::Receiver<bool>),
    Done(Vec<ExportRegistration>),
}

/// Export half of one admin: deduplicates concurrent exports of the same
/// logical service so the provider is invoked at most once per key, and
/// owns the resulting registrations until the last copy closes.
///
/// The slot map lock is never held across the provider call; concurrent
/// callers for an in-progress key wait on a watch channel, bounded by
/// `export_wait_timeout_ms`.
pub struct ExportCoordinator {
    me: Weak<ExportCoordinator>,
    admin: AdminId,
    provider: Arc<dyn TransportProvider>,
    config: TopologyConfig,
    slots: Mutex<HashMap<PropertyKey, ExportSlot>>,
    repository: Arc<EndpointRepository>,
    notifier: Arc<EndpointNotifier>,
    publisher: Option<Arc<EndpointPublisher>>,
    events: Arc<EventBus>,
    closed: AtomicBool,
}

impl ExportCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        admin: AdminId,
        provider: Arc<dyn TransportProvider>,
        config: TopologyConfig,
        repository: Arc<EndpointRepository>,
        notifier: Arc<EndpointNotifier>,
        publisher: Option<Arc<EndpointPublisher>>,
        events: Arc<EventBus>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            admin,
            provider,
            config,
            slots: Mutex::new(HashMap::new()),
            repository,
            notifier,
            publisher,
            events,
            closed: AtomicBool::new(false),
        })
    }

    pub fn admin(&self) -> &AdminId {
        &self.admin
    }

    /// Exports the service through this admin, or joins an equivalent
    /// export already present or in flight.
    ///
    /// Returns `Ok(vec![])` when the request does not apply to this admin:
    /// imported proxies are never re-exported, and requested config types
    /// disjoint from the provider's are somebody else's job. Invalid
    /// requests (exported types outside the declared set) are argument
    /// errors. Provider failures resolve into registrations carrying the
    /// error, shared by every caller of the same key.
    #[autometrics(objective = API_SLO)]
    pub async fn export_service(
        &self,
        service: &ServiceDescriptor,
        extra_props: &PropertyMap,
    ) -> Result<Vec<ExportRegistration>> {
        let plan = match export_plan(service, extra_props, &self.config, self.provider.as_ref())? {
            Some(plan) => plan,
            None => return Ok(Vec::new()),
        };
        let wait_limit = Duration::from_millis(self.config.export_wait_timeout_ms);

        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(SystemError::Shutdown.into());
            }
            let action = {
                let mut slots = self.slots.lock().await;
                match slots.entry(plan.key.clone()) {
                    Entry::Vacant(vacant) => {
                        let (tx, _) = watch::channel(false);
                        vacant.insert(ExportSlot::InProgress(tx));
                        SlotAction::Export
                    }
                    Entry::Occupied(mut occupied) => {
                        let outcome = match occupied.get_mut() {
                            ExportSlot::InProgress(tx) => Ok(tx.subscribe()),
                            ExportSlot::Resolved(shareds) => {
                                shareds.retain(|s| !s.is_closed());
                                let mut copies = Vec::new();
                                for shared in shareds.iter() {
                                    if let Ok(copy) =
                                        ExportRegistration::claim(shared.clone(), self.me.clone())
                                    {
                                        copies.push(copy);
                                    }
                                }
                                Err(copies)
                            }
                        };
                        match outcome {
                            Ok(rx) => SlotAction::Wait(rx),
                            Err(copies) if copies.is_empty() => {
                                // Every entry was torn down since resolution.
                                occupied.remove();
                                continue;
                            }
                            Err(copies) => SlotAction::Done(copies),
                        }
                    }
                }
            };

            match action {
                SlotAction::Export => break,
                SlotAction::Done(copies) => {
                    self.emit_for_copies(service.service_id(), &copies);
                    debug!(
                        admin = %self.admin,
                        service_id = service.service_id(),
                        copies = copies.len(),
                        "joined existing export"
                    );
                    return Ok(copies);
                }
                SlotAction::Wait(mut rx) => {
                    // Resolution and sender drop both wake us; re-inspect
                    // either way.
                    match tokio::time::timeout(wait_limit, rx.changed()).await {
                        Ok(_) => continue,
                        Err(_) => return Err(ExportError::WaitTimeout(wait_limit).into()),
                    }
                }
            }
        }

        let shared = self.perform_export(service, &plan).await;
        {
            let mut slots = self.slots.lock().await;
            let previous = slots.insert(plan.key.clone(), ExportSlot::Resolved(vec![shared.clone()]));
            if let Some(ExportSlot::InProgress(tx)) = previous {
                let _ = tx.send(true);
            }
        }
        self.announce(&shared);

        let copy = ExportRegistration::claim(shared, self.me.clone())?;
        Ok(vec![copy])
    }

    /// Closes every registration belonging to this service.
    pub async fn remove_service(
        &self,
        service_id: u64,
    ) {
        let victims = {
            let mut slots = self.slots.lock().await;
            let mut victims = Vec::new();
            slots.retain(|_, slot| match slot {
                ExportSlot::Resolved(shareds) => {
                    shareds.retain(|shared| {
                        if shared.service_id == service_id {
                            victims.push(shared.clone());
                            false
                        } else {
                            true
                        }
                    });
                    !shareds.is_empty()
                }
                ExportSlot::InProgress(_) => true,
            });
            victims
        };
        for shared in victims {
            self.teardown(&shared).await;
        }
    }

    /// Tears every export down. Waiters of in-progress slots are woken and
    /// observe the shutdown. Idempotent.
    pub async fn close_all(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let victims = {
            let mut slots = self.slots.lock().await;
            let mut victims = Vec::new();
            for (_, slot) in slots.drain() {
                match slot {
                    ExportSlot::Resolved(shareds) => victims.extend(shareds),
                    ExportSlot::InProgress(tx) => {
                        let _ = tx.send(true);
                    }
                }
            }
            victims
        };
        for shared in victims {
            self.teardown(&shared).await;
        }
        info!(admin = %self.admin, "export coordinator closed");
    }

    /// Last-copy teardown entry point, reached from
    /// [`ExportRegistration::close`].
    pub(crate) async fn release(
        &self,
        shared: &Arc<ExportShared>,
    ) {
        self.teardown(shared).await;
        let mut slots = self.slots.lock().await;
        if let Some(ExportSlot::Resolved(shareds)) = slots.get_mut(&shared.key) {
            shareds.retain(|s| !Arc::ptr_eq(s, shared));
            if shareds.is_empty() {
                slots.remove(&shared.key);
            }
        }
    }

    async fn perform_export(
        &self,
        service: &ServiceDescriptor,
        plan: &ExportPlan,
    ) -> Arc<ExportShared> {
        let started = Instant::now();
        match self.provider.export(service, &plan.props).await {
            Ok(handle) => {
                metrics::EXPORT_DURATION_METRIC
                    .with_label_values(&[self.admin.as_str()])
                    .observe(started.elapsed().as_millis() as f64);
                let endpoint = handle.endpoint().clone();
                info!(
                    admin = %self.admin,
                    service_id = service.service_id(),
                    endpoint = %endpoint,
                    "service exported"
                );
                ExportShared::live(
                    service.service_id(),
                    self.admin.clone(),
                    plan.key.clone(),
                    endpoint,
                    handle,
                )
            }
            Err(e) => {
                metrics::EXPORT_FAILURES.with_label_values(&[self.admin.as_str()]).inc();
                warn!(
                    admin = %self.admin,
                    service_id = service.service_id(),
                    error = %e,
                    "service export failed"
                );
                ExportShared::failed(
                    service.service_id(),
                    self.admin.clone(),
                    plan.key.clone(),
                    e.to_string(),
                )
            }
        }
    }

    /// Post-resolution bookkeeping for a fresh export: repository row,
    /// listener notification, registry publication and the lifecycle
    /// event.
    fn announce(
        &self,
        shared: &Arc<ExportShared>,
    ) {
        match &shared.outcome {
            ExportOutcome::Live { endpoint, .. } => {
                metrics::EXPORTED_SERVICES.inc();
                if self.repository.add_endpoint(shared.service_id, &self.admin, endpoint) {
                    self.notifier.notify_added(std::slice::from_ref(endpoint));
                }
                if let Some(publisher) = &self.publisher {
                    self.spawn_publish(publisher.clone(), endpoint.clone());
                }
                self.events.emit(TopologyEvent::ExportRegistered {
                    endpoint: endpoint.clone(),
                });
            }
            ExportOutcome::Failed { message } => {
                self.events.emit(TopologyEvent::ExportFailed {
                    service_id: shared.service_id,
                    admin: self.admin.clone(),
                    message: message.clone(),
                });
            }
        }
    }

    /// Registry publication runs off the export path so a slow registry
    /// does not delay the caller; failures are retried by the publisher
    /// and logged and counted here once the policy gives up.
    fn spawn_publish(
        &self,
        publisher: Arc<EndpointPublisher>,
        endpoint: Endpoint,
    ) {
        tokio::spawn(async move {
            if let Err(e) = publisher.publish_with_retry(&endpoint).await {
                metrics::ENDPOINT_PUBLISH_FAILURES.inc();
                warn!(endpoint = %endpoint, error = %e, "failed to publish endpoint");
            }
        });
    }

    async fn teardown(
        &self,
        shared: &Arc<ExportShared>,
    ) {
        if !shared.mark_closed() {
            return;
        }
        if let ExportOutcome::Live { endpoint, handle } = &shared.outcome {
            handle.close().await;
            metrics::EXPORTED_SERVICES.dec();
            if self.repository.remove_endpoint(shared.service_id, &shared.admin, endpoint) {
                self.notifier.notify_removed(std::slice::from_ref(endpoint));
            }
            if let Some(publisher) = &self.publisher {
                if let Err(e) = publisher.retract(endpoint).await {
                    warn!(endpoint = %endpoint, error = %e, "failed to retract endpoint");
                }
            }
            self.events.emit(TopologyEvent::ExportUnregistered {
                endpoint: endpoint.clone(),
            });
            info!(admin = %self.admin, endpoint = %endpoint, "export torn down");
        }
    }

    /// Joining an existing export re-announces its outcome to event
    /// listeners, so late subscribers observe every handed-out copy.
    fn emit_for_copies(
        &self,
        service_id: u64,
        copies: &[ExportRegistration],
    ) {
        for copy in copies {
            match (copy.endpoint(), copy.error()) {
                (Some(endpoint), _) => self.events.emit(TopologyEvent::ExportRegistered {
                    endpoint: endpoint.clone(),
                }),
                (None, Some(message)) => self.events.emit(TopologyEvent::ExportFailed {
                    service_id,
                    admin: self.admin.clone(),
                    message: message.to_string(),
                }),
                (None, None) => {}
            }
        }
    }
}

pub(crate) struct ExportPlan {
    pub(crate) key: PropertyKey,
    pub(crate) props: PropertyMap,
}

/// Whether anything actually asks for this service to be exported, under
/// the configured trust policy. Services without a request are local-only
/// and silently skipped by the exporter.
pub(crate) fn has_export_request(
    service: &ServiceDescriptor,
    extra_props: &PropertyMap,
    config: &TopologyConfig,
) -> bool {
    extra_props.contains_key(SERVICE_EXPORTED_TYPES)
        || (config.trust_descriptor_metadata && service.get(SERVICE_EXPORTED_TYPES).is_some())
}

/// Builds the effective export properties for one admin and the dedup key
/// over them.
///
/// `Ok(None)` means the request does not apply here (imported proxy, or
/// requested configs this provider does not speak). Errors are caller
/// misuse. The returned property map is what the provider sees: declared
/// types narrowed to the exported set, configs narrowed to the provider,
/// bind defaults filled in, request keys stripped.
pub(crate) fn export_plan(
    service: &ServiceDescriptor,
    extra_props: &PropertyMap,
    config: &TopologyConfig,
    provider: &dyn TransportProvider,
) -> Result<Option<ExportPlan>> {
    let mut props: PropertyMap = if config.trust_descriptor_metadata {
        service.properties().clone()
    } else {
        service
            .properties()
            .iter()
            .filter(|(key, _)| !key.starts_with("service.exported"))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    };
    for (key, value) in extra_props {
        props.insert(key.clone(), value.clone());
    }

    if props.contains_key(SERVICE_IMPORTED) {
        debug!(service_id = service.service_id(), "refusing to re-export an imported proxy");
        return Ok(None);
    }

    let requested: Vec<String> = match props.get(SERVICE_EXPORTED_TYPES) {
        Some(value) => value.text_values().into_iter().map(str::to_string).collect(),
        None => return Err(ExportError::MissingProperty(SERVICE_EXPORTED_TYPES).into()),
    };
    if requested.is_empty() {
        return Err(ExportError::MissingProperty(SERVICE_EXPORTED_TYPES).into());
    }

    let declared = service.declared_types();
    let exported: Vec<String> = if requested.len() == 1 && requested[0] == TYPES_WILDCARD {
        declared.iter().map(|t| t.to_string()).collect()
    } else {
        let invalid: Vec<&str> = requested
            .iter()
            .map(String::as_str)
            .filter(|t| !declared.contains(t))
            .collect();
        if !invalid.is_empty() {
            return Err(ExportError::InvalidTypes {
                requested: invalid.join(", "),
            }
            .into());
        }
        requested
    };
    if exported.is_empty() {
        return Err(ExportError::InvalidTypes {
            requested: TYPES_WILDCARD.to_string(),
        }
        .into());
    }

    let requested_configs: Vec<String> = props
        .get(SERVICE_EXPORTED_CONFIGS)
        .map(|v| v.text_values().into_iter().map(str::to_string).collect())
        .unwrap_or_default();
    let supported = provider.supported_configs();
    let configs: Vec<String> = if requested_configs.is_empty() {
        supported
    } else {
        let matching: Vec<String> = requested_configs
            .into_iter()
            .filter(|c| supported.iter().any(|s| s == c))
            .collect();
        if matching.is_empty() {
            return Ok(None);
        }
        matching
    };

    if let Some(intents) = props.remove(SERVICE_EXPORTED_INTENTS) {
        props.insert(SERVICE_INTENTS.to_string(), intents);
    } else if !config.intents.is_empty() && !props.contains_key(SERVICE_INTENTS) {
        props.insert(SERVICE_INTENTS.to_string(), config.intents.clone().into());
    }
    props.insert(SERVICE_TYPES.to_string(), exported.into());
    props.insert(SERVICE_CONFIGS.to_string(), configs.into());
    props.remove(SERVICE_EXPORTED_TYPES);
    props.remove(SERVICE_EXPORTED_CONFIGS);
    if !props.contains_key(BIND_HOST) {
        props.insert(BIND_HOST.to_string(), config.default_host.as_str().into());
    }
    if !props.contains_key(BIND_PORT) {
        props.insert(BIND_PORT.to_string(), PropertyValue::Str(config.default_port.to_string()));
    }

    let key = PropertyKey::of(&props);
    Ok(Some(ExportPlan { key, props }))
}
