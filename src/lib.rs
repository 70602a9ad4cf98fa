mod config;
pub mod constants;
mod discovery;
mod endpoint;
mod errors;
mod metrics;
mod node;
mod provider;
mod registry;
mod topology;
pub mod utils;

pub use config::*;
pub use discovery::*;
pub use endpoint::*;
pub use errors::*;
pub use metrics::*;
pub use node::*;
pub use provider::*;
pub use registry::*;
pub use topology::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
//-----------------------------------------------------------
// Autometrics
/// autometrics: https://docs.autometrics.dev/rust/adding-alerts-and-slos
use autometrics::objectives::Objective;
use autometrics::objectives::ObjectiveLatency;
use autometrics::objectives::ObjectivePercentile;
const API_SLO: Objective = Objective::new("api")
    .success_rate(ObjectivePercentile::P99_9)
    .latency(ObjectiveLatency::Ms10, ObjectivePercentile::P99);
