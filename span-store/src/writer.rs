use crate::dbmodel::{span_to_row, Row};
use crate::metrics::TableMetricsFactory;
use crate::schema::{partition_from_time, DbPath, PartitionKey, TBL_TRACES};
use crate::store::{StoreError, TableStore};
use backtraced_error::error_chain_to_pretty_formatted;
use span_structs::Span;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct BatchWriterOptions {
    pub db_path: DbPath,
    /// Applies to each bulk upsert on its own, not to the whole batch
    pub write_timeout: Duration,
}

/// Bulk upsert bounded by `timeout`, recorded in the table metrics whatever the outcome.
pub(crate) async fn upload_rows(
    store: &dyn TableStore,
    metrics: &TableMetricsFactory,
    table: &str,
    rows: Vec<Row>,
    timeout: Duration,
) -> Result<(), StoreError> {
    let row_count = rows.len();
    let started = Instant::now();
    let result = match tokio::time::timeout(timeout, store.bulk_upsert(table, rows)).await {
        Ok(result) => result,
        Err(_elapsed) => Err(StoreError::Timeout {
            table: table.to_string(),
            timeout,
        }),
    };
    metrics.emit(table, &result, started.elapsed(), row_count);
    result
}

pub struct BatchSpanWriter {
    store: Arc<dyn TableStore>,
    metrics: TableMetricsFactory,
    opts: BatchWriterOptions,
}

impl BatchSpanWriter {
    pub fn new(
        store: Arc<dyn TableStore>,
        metrics: TableMetricsFactory,
        opts: BatchWriterOptions,
    ) -> Self {
        Self {
            store,
            metrics,
            opts,
        }
    }

    /// Best effort: failures are logged and counted, never returned.
    #[instrument(skip_all, fields(spans = spans.len()))]
    pub async fn write_spans(&self, spans: &[Span]) {
        let mut parts: BTreeMap<PartitionKey, Vec<Row>> = BTreeMap::new();
        for span in spans {
            match span_to_row(span) {
                Ok(row) => parts
                    .entry(partition_from_time(span.start_time))
                    .or_default()
                    .push(row),
                Err(e) => {
                    warn!(
                        trace_id = %span.trace_id,
                        span_id = span.span_id.0,
                        "Skipping span that can't be stored: {}",
                        error_chain_to_pretty_formatted(&e)
                    );
                }
            }
        }
        debug!("{} partitions to write", parts.len());
        futures::future::join_all(
            parts
                .into_iter()
                .map(|(part, rows)| self.write_partition(part, rows)),
        )
        .await;
    }

    async fn write_partition(&self, part: PartitionKey, rows: Vec<Row>) {
        let table = part.build_full_table_name(&self.opts.db_path, TBL_TRACES);
        let row_count = rows.len();
        match upload_rows(
            self.store.as_ref(),
            &self.metrics,
            &table,
            rows,
            self.opts.write_timeout,
        )
        .await
        {
            Ok(()) => info!(table = %table, "Inserted {row_count} spans"),
            Err(e) => {
                error!(
                    table = %table,
                    "insert spans error: {}",
                    error_chain_to_pretty_formatted(&e)
                );
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::{span_at, InMemoryTableStore};
    use prometheus::Registry;

    fn writer(store: Arc<InMemoryTableStore>, timeout: Duration) -> (BatchSpanWriter, TableMetricsFactory) {
        let metrics = TableMetricsFactory::new(&Registry::new()).unwrap();
        let writer = BatchSpanWriter::new(
            store,
            metrics.clone(),
            BatchWriterOptions {
                db_path: DbPath::new("jaeger"),
                write_timeout: timeout,
            },
        );
        (writer, metrics)
    }

    #[tokio::test]
    async fn one_upsert_per_partition() {
        crate::test::enable_logging_for_tests();
        let store = Arc::new(InMemoryTableStore::default());
        let (writer, metrics) = writer(Arc::clone(&store), Duration::from_secs(1));
        let spans = vec![
            span_at(1, "2024-01-05T01:00:00Z"),
            span_at(2, "2024-01-05T02:00:00Z"),
            span_at(3, "2024-01-05T13:00:00Z"),
        ];
        writer.write_spans(&spans).await;
        let calls = store.calls();
        assert_eq!(calls.len(), 2);
        let early = store.rows_for("jaeger.traces_20240105_0");
        assert_eq!(early.len(), 2);
        let late = store.rows_for("jaeger.traces_20240105_2");
        assert_eq!(late.len(), 1);
        assert_eq!(metrics.records("jaeger.traces_20240105_0", true), 2);
        assert_eq!(metrics.records("jaeger.traces_20240105_2", true), 1);
    }

    #[tokio::test]
    async fn timed_out_upsert_is_counted_as_error() {
        crate::test::enable_logging_for_tests();
        let store = Arc::new(InMemoryTableStore::default().with_delay(Duration::from_millis(200)));
        let (writer, metrics) = writer(Arc::clone(&store), Duration::from_millis(10));
        writer
            .write_spans(&[span_at(1, "2024-01-05T01:00:00Z")])
            .await;
        assert_eq!(metrics.attempts("jaeger.traces_20240105_0"), 1);
        assert_eq!(metrics.records("jaeger.traces_20240105_0", false), 1);
        assert_eq!(metrics.records("jaeger.traces_20240105_0", true), 0);
    }

    #[tokio::test]
    async fn unconvertible_spans_are_skipped() {
        crate::test::enable_logging_for_tests();
        let store = Arc::new(InMemoryTableStore::default());
        let (writer, _metrics) = writer(Arc::clone(&store), Duration::from_secs(1));
        let mut bad = span_at(2, "2024-01-05T01:00:00Z");
        bad.duration = Duration::MAX;
        writer
            .write_spans(&[span_at(1, "2024-01-05T01:00:00Z"), bad])
            .await;
        assert_eq!(store.rows_for("jaeger.traces_20240105_0").len(), 1);
    }

    #[tokio::test]
    async fn empty_batch_writes_nothing() {
        let store = Arc::new(InMemoryTableStore::default());
        let (writer, _metrics) = writer(Arc::clone(&store), Duration::from_secs(1));
        writer.write_spans(&[]).await;
        assert!(store.calls().is_empty());
    }
}
