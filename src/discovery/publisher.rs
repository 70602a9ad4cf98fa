use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::scope::endpoint_node_name;
use super::scope::type_path;
use crate::config::BackoffPolicy;
use crate::metrics;
use crate::registry::RegistryBackend;
use crate::utils::task::task_with_timeout_and_exponential_backoff;
use crate::Endpoint;
use crate::EndpointCodec;
use crate::PropertyKey;
use crate::RegistryError;
use crate::Result;

/// Mirrors locally exported endpoints into the registry: one ephemeral
/// node per (service type, endpoint) pair, so typed scopes find them under
/// their own directory.
pub struct EndpointPublisher {
    backend: Arc<dyn RegistryBackend>,
    codec: Arc<dyn EndpointCodec>,
    base_path: String,
    policy: BackoffPolicy,
    /// Endpoint key to the registry nodes holding it.
    published: Mutex<HashMap<PropertyKey, Vec<String>>>,
    closed: AtomicBool,
}

impl EndpointPublisher {
    pub fn new(
        backend: Arc<dyn RegistryBackend>,
        codec: Arc<dyn EndpointCodec>,
        base_path: String,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            backend,
            codec,
            base_path,
            policy,
            published: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// [`Self::publish`] under the publish retry policy. Publication is
    /// idempotent, so a retried attempt overwrites whatever a failed one
    /// left behind.
    pub async fn publish_with_retry(
        &self,
        endpoint: &Endpoint,
    ) -> Result<()> {
        task_with_timeout_and_exponential_backoff("publish-endpoint", || self.publish(endpoint), &self.policy).await
    }

    /// Writes the endpoint under every service type it declares.
    /// Re-publishing an endpoint overwrites the existing node data.
    pub async fn publish(
        &self,
        endpoint: &Endpoint,
    ) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            warn!(endpoint = %endpoint, "publish after close, ignoring");
            return Ok(());
        }
        let data = self.codec.encode(endpoint)?;
        let mut paths = Vec::new();
        for service_type in endpoint.service_types() {
            let dir = type_path(&self.base_path, service_type);
            self.backend.ensure_path(&dir).await?;
            let node = format!("{}/{}", dir, endpoint_node_name(endpoint.id()));
            match self.backend.create(&node, data.clone(), true).await {
                Ok(()) => paths.push(node),
                Err(RegistryError::NodeExists(_)) => {
                    self.backend.set_data(&node, data.clone()).await?;
                    paths.push(node);
                }
                Err(e) => return Err(e.into()),
            }
        }
        info!(endpoint = %endpoint, nodes = paths.len(), "endpoint published");
        self.published.lock().insert(endpoint.key(), paths);
        Ok(())
    }

    /// Deletes the endpoint's registry nodes. Unknown endpoints and nodes
    /// already gone are fine.
    pub async fn retract(
        &self,
        endpoint: &Endpoint,
    ) -> Result<()> {
        let paths = self.published.lock().remove(&endpoint.key());
        let paths = match paths {
            Some(paths) => paths,
            None => return Ok(()),
        };
        for path in &paths {
            self.delete_quietly(path).await;
        }
        debug!(endpoint = %endpoint, nodes = paths.len(), "endpoint retracted");
        Ok(())
    }

    /// Deletes every published node. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<Vec<String>> = {
            let mut published = self.published.lock();
            published.drain().map(|(_, paths)| paths).collect()
        };
        for paths in drained {
            for path in paths {
                self.delete_quietly(&path).await;
            }
        }
        debug!("endpoint publisher closed");
    }

    /// Best-effort delete. The registry drops our ephemeral nodes itself
    /// once the session ends, so failures here only get logged.
    async fn delete_quietly(
        &self,
        path: &str,
    ) {
        match self.backend.delete(path).await {
            Ok(()) | Err(RegistryError::NoNode(_)) => {}
            Err(e) => {
                metrics::ENDPOINT_PUBLISH_FAILURES.inc();
                warn!(%path, error = %e, "failed to delete endpoint node");
            }
        }
    }
}
