
use autometrics::prometheus_exporter::PrometheusResponse;
use autometrics::prometheus_exporter::{self};
use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::register_histogram_vec;
use prometheus::HistogramVec;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref ENDPOINTS_ADDED: IntCounter = IntCounter::new(
        "discovered_endpoints_added",
        "Endpoints discovered across all watchers"
    )
    .expect("metric can not be created");

    pub static ref ENDPOINTS_REMOVED: IntCounter = IntCounter::new(
        "discovered_endpoints_removed",
        "Endpoint removals observed across all watchers"
    )
    .expect("metric can not be created");

    pub static ref WATCHER_RESCANS: IntCounter = IntCounter::new(
        "watcher_rescans_total",
        "Registry subtree rescans triggered by watch events"
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCHERS: IntGauge = IntGauge::new(
        "active_watchers",
        "Registry watchers currently armed"
    )
    .expect("metric can not be created");

    pub static ref EXPORTED_SERVICES: IntGauge = IntGauge::new(
        "exported_services",
        "Services currently exported"
    )
    .expect("metric can not be created");

    pub static ref IMPORTED_ENDPOINTS: IntGauge = IntGauge::new(
        "imported_endpoints",
        "Remote endpoints currently imported"
    )
    .expect("metric can not be created");

    pub static ref EXPORT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("export_failures", "export_failures"),
        &["admin"]
    )
    .expect("Should succeed to create metric");

    pub static ref IMPORT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("import_failures", "import_failures"),
        &["admin"]
    )
    .expect("Should succeed to create metric");

    pub static ref ENDPOINT_PUBLISH_FAILURES: IntCounter = IntCounter::new(
        "endpoint_publish_failures",
        "Registry writes for local endpoints that failed"
    )
    .expect("metric can not be created");

    pub static ref EXPORT_DURATION_METRIC: HistogramVec = register_histogram_vec!(
        "export_duration_metric",
        "Histogram of service export duration in ms",
        &["admin"],
        exponential_buckets(1.0, 2.0, 12).unwrap()
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

fn register_custom_metrics() {
    REGISTRY
        .register(Box::new(ENDPOINTS_ADDED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(ENDPOINTS_REMOVED.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(WATCHER_RESCANS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(ACTIVE_WATCHERS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(EXPORTED_SERVICES.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(IMPORTED_ENDPOINTS.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(EXPORT_FAILURES.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(IMPORT_FAILURES.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(ENDPOINT_PUBLISH_FAILURES.clone()))
        .expect("collector can be registered");
    REGISTRY
        .register(Box::new(EXPORT_DURATION_METRIC.clone()))
        .expect("collector can be registered");
}

pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    register_custom_metrics();

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    let mut res = match String::from_utf8(buffer.clone()) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    };
    buffer.clear();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!("could not encode prometheus metrics: {}", e);
    };
    let res_custom = match String::from_utf8(buffer.clone()) {
        Ok(v) => v,
        Err(e) => {
            error!("prometheus metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    };
    buffer.clear();

    let autometrics_metrics = get_metrics_body();
    res.push_str(&res_custom);
    res.push_str(&autometrics_metrics);
    Ok(res)
}

/// Export metrics for Prometheus to scrape
pub fn get_metrics_body() -> String {
    let autometrics_response = prometheus_exporter::encode_http_response();
    autometrics_response.into_body()
}

/// Export metrics for Prometheus to scrape
pub fn get_metrics() -> PrometheusResponse {
    prometheus_exporter::encode_http_response()
}
