use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::sleep;

use crate::discovery::EndpointListener;
use crate::topology::TopologyEvent;
use crate::topology::TopologyEventListener;
use crate::Endpoint;

/// Endpoint listener that records every callback for later assertions.
pub(crate) struct RecordingListener {
    calls: Mutex<Vec<(bool, Endpoint, String)>>,
}

impl RecordingListener {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { calls: Mutex::new(Vec::new()) })
    }

    pub(crate) fn calls(&self) -> Vec<(bool, Endpoint, String)> {
        self.calls.lock().clone()
    }

    pub(crate) fn added(&self) -> Vec<Endpoint> {
        self.calls
            .lock()
            .iter()
            .filter(|(added, _, _)| *added)
            .map(|(_, e, _)| e.clone())
            .collect()
    }

    pub(crate) fn removed(&self) -> Vec<Endpoint> {
        self.calls
            .lock()
            .iter()
            .filter(|(added, _, _)| !*added)
            .map(|(_, e, _)| e.clone())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Polls until at least `count` callbacks arrived. Panics after two
    /// seconds; recording listeners are test-only.
    pub(crate) async fn wait_for(
        &self,
        count: usize,
    ) {
        for _ in 0..200 {
            if self.calls.lock().len() >= count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {} listener callbacks, got {}",
            count,
            self.calls.lock().len()
        );
    }
}

impl EndpointListener for RecordingListener {
    fn endpoint_added(
        &self,
        endpoint: &Endpoint,
        matched_filter: &str,
    ) {
        self.calls.lock().push((true, endpoint.clone(), matched_filter.to_string()));
    }

    fn endpoint_removed(
        &self,
        endpoint: &Endpoint,
        matched_filter: &str,
    ) {
        self.calls.lock().push((false, endpoint.clone(), matched_filter.to_string()));
    }
}

/// Topology event listener that records the stream of events.
pub(crate) struct RecordingEventListener {
    events: Mutex<Vec<TopologyEvent>>,
}

impl RecordingEventListener {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self { events: Mutex::new(Vec::new()) })
    }

    pub(crate) fn events(&self) -> Vec<TopologyEvent> {
        self.events.lock().clone()
    }

    pub(crate) async fn wait_for(
        &self,
        count: usize,
    ) {
        for _ in 0..200 {
            if self.events.lock().len() >= count {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "timed out waiting for {} topology events, got {}",
            count,
            self.events.lock().len()
        );
    }
}

impl TopologyEventListener for RecordingEventListener {
    fn on_event(
        &self,
        event: &TopologyEvent,
    ) {
        self.events.lock().push(event.clone());
    }
}
