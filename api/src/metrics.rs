use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref UPLOAD_REQUESTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dpr_upload_requests_total",
        "Total upload requests received"
    ))
    .unwrap();
    pub static ref RECORDS_INGESTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dpr_records_ingested_total",
        "Total telemetry records stored"
    ))
    .unwrap();
    pub static ref LOGIN_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dpr_login_failures_total",
        "Total rejected password checks"
    ))
    .unwrap();
    pub static ref DB_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "dpr_db_failures_total",
        "Total failed database calls"
    ))
    .unwrap();
    pub static ref UPLOAD_BATCH_SIZE: Histogram = Histogram::with_opts(
        HistogramOpts::new("dpr_upload_batch_size", "Records per upload request")
            .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0])
    )
    .unwrap();
    pub static ref DASHBOARD_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "dpr_dashboard_latency_seconds",
            "Time taken to compute a dashboard summary"
        )
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5])
    )
    .unwrap();
}

pub fn init_metrics() {
    REGISTRY
        .register(Box::new(UPLOAD_REQUESTS_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(RECORDS_INGESTED_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(LOGIN_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DB_FAILURES_TOTAL.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(UPLOAD_BATCH_SIZE.clone()))
        .unwrap();
    REGISTRY
        .register(Box::new(DASHBOARD_LATENCY_SECONDS.clone()))
        .unwrap();
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}
