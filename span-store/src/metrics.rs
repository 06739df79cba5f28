use crate::store::StoreError;
use axum::extract::State;
use axum::http::StatusCode;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

const NAMESPACE: &str = "span_store";
const STATUS_OK: &str = "ok";
const STATUS_ERR: &str = "err";

/// Per physical table write accounting, labelled by full table name
#[derive(Clone)]
pub struct TableMetricsFactory {
    attempts: IntCounterVec,
    latency: HistogramVec,
    records: IntCounterVec,
}

impl TableMetricsFactory {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let attempts = IntCounterVec::new(
            Opts::new("attempts_total", "bulk upsert calls issued")
                .namespace(NAMESPACE)
                .subsystem("table"),
            &["table"],
        )?;
        let latency = HistogramVec::new(
            HistogramOpts::new("latency_seconds", "bulk upsert latency")
                .namespace(NAMESPACE)
                .subsystem("table"),
            &["table", "status"],
        )?;
        let records = IntCounterVec::new(
            Opts::new("records_total", "rows sent in bulk upserts")
                .namespace(NAMESPACE)
                .subsystem("table"),
            &["table", "status"],
        )?;
        registry.register(Box::new(attempts.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(records.clone()))?;
        Ok(Self {
            attempts,
            latency,
            records,
        })
    }

    pub fn emit(&self, table: &str, result: &Result<(), StoreError>, latency: Duration, rows: usize) {
        self.attempts.with_label_values(&[table]).inc();
        let status = match result {
            Ok(()) => STATUS_OK,
            Err(_) => STATUS_ERR,
        };
        self.latency
            .with_label_values(&[table, status])
            .observe(latency.as_secs_f64());
        self.records
            .with_label_values(&[table, status])
            .inc_by(rows as u64);
    }

    pub fn attempts(&self, table: &str) -> u64 {
        self.attempts.with_label_values(&[table]).get()
    }

    pub fn records(&self, table: &str, ok: bool) -> u64 {
        self.records
            .with_label_values(&[table, if ok { STATUS_OK } else { STATUS_ERR }])
            .get()
    }

    pub fn latency_samples(&self, table: &str, ok: bool) -> u64 {
        self.latency
            .with_label_values(&[table, if ok { STATUS_OK } else { STATUS_ERR }])
            .get_sample_count()
    }
}

#[derive(Clone)]
pub struct ExporterMetrics {
    pub processed_spans: IntCounter,
    pub processed_span_bytes: IntCounter,
    pub convert_failed: IntCounter,
}

impl ExporterMetrics {
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let counter = |name: &str, help: &str| -> Result<IntCounter, prometheus::Error> {
            let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE).subsystem("exporter"))?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        Ok(Self {
            processed_spans: counter("processed_spans_total", "spans accepted for write")?,
            processed_span_bytes: counter(
                "processed_span_bytes_total",
                "estimated span bytes accepted for write",
            )?,
            convert_failed: counter(
                "convert_failed_total",
                "input batches that couldn't be decoded before reaching the writers",
            )?,
        })
    }
}

async fn metrics_get(State(registry): State<Registry>) -> Result<String, (StatusCode, String)> {
    let mut buffer = vec![];
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| {
            error!("Error encoding metrics: {e:#?}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;
    String::from_utf8(buffer).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

pub fn serve(registry: Registry, port: u16) -> JoinHandle<()> {
    let app = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics_get))
        .with_state(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Serving metrics on {addr}/metrics");
    tokio::spawn(async move {
        if let Err(e) = axum::Server::bind(&addr).serve(app.into_make_service()).await {
            error!("failed to serve metrics: {e:#?}");
        }
    })
}
