#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::Endpoint;
use crate::PropertyMap;
use crate::Result;

/// Turns endpoint descriptions into registry payloads and back.
///
/// Decoding is lenient: the registry is shared infrastructure and a single
/// corrupt node must never take a watcher down, so malformed payloads are
/// reported as `None` and skipped.
#[cfg_attr(test, automock)]
pub trait EndpointCodec: Send + Sync + 'static {
    fn decode(
        &self,
        data: &[u8],
    ) -> Option<Endpoint>;

    fn encode(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Vec<u8>>;
}

/// Default codec: the endpoint's property map as a flat JSON object.
#[derive(Debug, Default)]
pub struct JsonEndpointCodec;

impl EndpointCodec for JsonEndpointCodec {
    fn decode(
        &self,
        data: &[u8],
    ) -> Option<Endpoint> {
        if data.is_empty() {
            return None;
        }
        let props: PropertyMap = match serde_json::from_slice(data) {
            Ok(props) => props,
            Err(e) => {
                debug!(error = %e, "skipping endpoint node with malformed payload");
                return None;
            }
        };
        match Endpoint::new(props) {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                debug!(error = %e, "skipping endpoint node with incomplete description");
                None
            }
        }
    }

    fn encode(
        &self,
        endpoint: &Endpoint,
    ) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(endpoint.properties())?)
    }
}
