use backtraced_error::{error_chain_to_pretty_formatted, SerdeJsonError};
use clap::Parser;
use span_store::config::StoreConfig;
use span_store::exporter::TraceExporter;
use span_store::metrics;
use span_store::span_structs::Span;
use span_store::store::PgTableStore;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, info_span, instrument, Instrument};

#[tokio::main]
async fn main() {
    // load env vars so clap can use it when parsing a config
    dotenv::dotenv().ok();
    let config = StoreConfig::parse();
    if let Err(e) = config.validate() {
        eprintln!("Invalid config: {e}");
        std::process::exit(2);
    }
    if let Err(e) = tracing_config_helper::setup_console_logging(config.log_json) {
        eprintln!("Failed to set up logging: {e}");
        std::process::exit(1);
    }
    if let Err(e) = run(config).await {
        error!("span-store stopped: {e}");
        std::process::exit(1);
    }
}

#[instrument(level = "error", skip_all)]
async fn start_exporter(
    config: &StoreConfig,
) -> Result<(TraceExporter, tokio::task::JoinHandle<()>), Box<dyn std::error::Error>> {
    info!("Using config: {:#?}", config);
    let con = connect_to_db(config).await?;
    let registry = prometheus::Registry::new();
    let exporter = TraceExporter::new(
        Arc::new(PgTableStore::new(con)),
        &registry,
        config.db_path(),
        config.write_timeout(),
        config.tag_index_policy(),
    )?;
    let metrics_handle = metrics::serve(registry, config.metrics_listen_port);
    Ok((exporter, metrics_handle))
}

/// Each stdin line is one batch: a JSON array of spans.
async fn run(config: StoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (exporter, metrics_handle) = start_exporter(&config).await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Vec<Span>>(&line) {
            Ok(spans) => exporter.push(&spans).await,
            Err(e) => {
                let e = SerdeJsonError::from_serde_json_error(e, "decoding span batch");
                error!("{}", error_chain_to_pretty_formatted(&e));
                exporter.record_convert_failed(1);
            }
        }
    }
    info!("Input closed, shutting down");
    metrics_handle.abort();
    Ok(())
}

async fn connect_to_db(config: &StoreConfig) -> Result<PgPool, Box<dyn std::error::Error>> {
    let con = PgPoolOptions::new()
        .max_connections(u32::from(config.db.max_db_connections))
        .connect_with(PgConnectOptions::from_str(&config.db.url)?)
        .instrument(info_span!("Connecting to the DB"))
        .await?;
    Ok(con)
}
