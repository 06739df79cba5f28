use crate::indexer::tags::TagIndexPolicy;
use crate::indexer::BatchIndexWriter;
use crate::metrics::{ExporterMetrics, TableMetricsFactory};
use crate::schema::DbPath;
use crate::store::TableStore;
use crate::writer::{BatchSpanWriter, BatchWriterOptions};
use prometheus::Registry;
use span_structs::Span;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Sole ingestion entry point: every batch goes to the span table and to the indexes.
pub struct TraceExporter {
    span_writer: BatchSpanWriter,
    index_writer: BatchIndexWriter,
    metrics: ExporterMetrics,
}

impl TraceExporter {
    pub fn new(
        store: Arc<dyn TableStore>,
        registry: &Registry,
        db_path: DbPath,
        write_timeout: Duration,
        tag_policy: TagIndexPolicy,
    ) -> Result<Self, prometheus::Error> {
        let table_metrics = TableMetricsFactory::new(registry)?;
        let metrics = ExporterMetrics::new(registry)?;
        Ok(Self::from_writers(
            BatchSpanWriter::new(
                Arc::clone(&store),
                table_metrics.clone(),
                BatchWriterOptions {
                    db_path: db_path.clone(),
                    write_timeout,
                },
            ),
            BatchIndexWriter::new(store, table_metrics, tag_policy, db_path, write_timeout),
            metrics,
        ))
    }

    pub fn from_writers(
        span_writer: BatchSpanWriter,
        index_writer: BatchIndexWriter,
        metrics: ExporterMetrics,
    ) -> Self {
        Self {
            span_writer,
            index_writer,
            metrics,
        }
    }

    /// Never fails, write problems only show up in logs and metrics
    #[instrument(skip_all, fields(spans = spans.len()))]
    pub async fn push(&self, spans: &[Span]) {
        if spans.is_empty() {
            return;
        }
        futures::join!(
            self.span_writer.write_spans(spans),
            self.index_writer.process_and_write_batch(spans)
        );
        let bytes = spans
            .iter()
            .fold(0usize, |acc, s| acc.saturating_add(s.estimated_size_bytes()));
        self.metrics.processed_spans.inc_by(spans.len() as u64);
        self.metrics.processed_span_bytes.inc_by(bytes as u64);
    }

    /// Counts input batches that never made it to [`TraceExporter::push`]
    pub fn record_convert_failed(&self, batches: u64) {
        self.metrics.convert_failed.inc_by(batches);
    }
}
