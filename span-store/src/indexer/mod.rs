//! Secondary indexes: tag, service name, service+operation and duration.
//!
//! A batch is first folded into one [`aggregator::IndexAggregator`] per index kind, so
//! identical facts from the same 5 second window collapse into a single row carrying
//! every trace id that produced them. Rows are then grouped by partition and written
//! with one bulk upsert per (kind, partition). Each row gets a round-robin bucket so a
//! hot tag or service doesn't pile onto a single row key.

use crate::dbmodel::{Field, Row, Value};
use crate::metrics::TableMetricsFactory;
use crate::schema::{
    partition_from_time, DbPath, PartitionKey, NUM_INDEX_BUCKETS, TBL_DURATION_INDEX,
    TBL_SERVICE_NAME_INDEX, TBL_SERVICE_OPERATION_INDEX, TBL_TAG_INDEX,
};
use crate::store::TableStore;
use crate::writer::upload_rows;
use backtraced_error::error_chain_to_pretty_formatted;
use span_structs::Span;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub mod aggregator;
pub mod bucket;
pub mod index;
pub mod tags;

use aggregator::{AggregatedRow, IndexAggregator};
use bucket::{BucketRoundRobin, LockedRand};
use index::{DurationIndex, Indexable, ServiceNameIndex, ServiceOperationIndex, TagIndex};
use tags::TagIndexPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Tag,
    ServiceName,
    ServiceOperation,
    Duration,
}

impl IndexKind {
    pub fn table_basename(&self) -> &'static str {
        match self {
            IndexKind::Tag => TBL_TAG_INDEX,
            IndexKind::ServiceName => TBL_SERVICE_NAME_INDEX,
            IndexKind::ServiceOperation => TBL_SERVICE_OPERATION_INDEX,
            IndexKind::Duration => TBL_DURATION_INDEX,
        }
    }
}

/// One aggregator per index kind, filled from a single batch
#[derive(Debug, Default)]
pub struct BatchIndexes {
    pub tags: IndexAggregator,
    pub service_names: IndexAggregator,
    pub service_operations: IndexAggregator,
    pub durations: IndexAggregator,
}

impl BatchIndexes {
    pub fn from_spans(spans: &[Span], tag_policy: &TagIndexPolicy) -> Self {
        let mut indexes = Self::default();
        for span in spans {
            for tag in span.tags.iter().chain(span.process_tags.iter()) {
                if tag_policy.should_index_tag(tag) {
                    indexes
                        .tags
                        .add(Indexable::Tag(TagIndex::new(span, tag)), span.trace_id);
                }
            }
            indexes.service_names.add(
                Indexable::ServiceName(ServiceNameIndex::new(span)),
                span.trace_id,
            );
            indexes.service_operations.add(
                Indexable::ServiceOperation(ServiceOperationIndex::new(span)),
                span.trace_id,
            );
            indexes
                .durations
                .add(Indexable::Duration(DurationIndex::new(span, "")), span.trace_id);
            if !span.operation_name.is_empty() {
                indexes.durations.add(
                    Indexable::Duration(DurationIndex::new(span, &span.operation_name)),
                    span.trace_id,
                );
            }
        }
        indexes
    }
}

pub struct BatchIndexWriter {
    store: Arc<dyn TableStore>,
    metrics: TableMetricsFactory,
    tag_policy: TagIndexPolicy,
    buckets: BucketRoundRobin,
    uniq_rand: LockedRand,
    db_path: DbPath,
    write_timeout: Duration,
}

impl BatchIndexWriter {
    pub fn new(
        store: Arc<dyn TableStore>,
        metrics: TableMetricsFactory,
        tag_policy: TagIndexPolicy,
        db_path: DbPath,
        write_timeout: Duration,
    ) -> Self {
        Self::with_randomness(
            store,
            metrics,
            tag_policy,
            db_path,
            write_timeout,
            BucketRoundRobin::new(NUM_INDEX_BUCKETS),
            LockedRand::from_time(),
        )
    }

    /// Same as [`BatchIndexWriter::new`] with caller supplied bucket rotation and `uniq` source
    pub fn with_randomness(
        store: Arc<dyn TableStore>,
        metrics: TableMetricsFactory,
        tag_policy: TagIndexPolicy,
        db_path: DbPath,
        write_timeout: Duration,
        buckets: BucketRoundRobin,
        uniq_rand: LockedRand,
    ) -> Self {
        Self {
            store,
            metrics,
            tag_policy,
            buckets,
            uniq_rand,
            db_path,
            write_timeout,
        }
    }

    /// Best effort: failures are logged and counted, never returned.
    #[instrument(skip_all, fields(spans = spans.len()))]
    pub async fn process_and_write_batch(&self, spans: &[Span]) {
        let indexes = BatchIndexes::from_spans(spans, &self.tag_policy);
        debug!(
            tags = indexes.tags.len(),
            service_names = indexes.service_names.len(),
            service_operations = indexes.service_operations.len(),
            durations = indexes.durations.len(),
            "Aggregated batch indexes"
        );
        futures::join!(
            self.write_items_table(IndexKind::Tag, indexes.tags.into_index_data()),
            self.write_items_table(
                IndexKind::ServiceName,
                indexes.service_names.into_index_data()
            ),
            self.write_items_table(
                IndexKind::ServiceOperation,
                indexes.service_operations.into_index_data()
            ),
            self.write_items_table(IndexKind::Duration, indexes.durations.into_index_data()),
        );
    }

    async fn write_items_table(&self, kind: IndexKind, items: Vec<AggregatedRow>) {
        let mut parts: BTreeMap<PartitionKey, Vec<AggregatedRow>> = BTreeMap::new();
        for item in items {
            parts
                .entry(partition_from_time(item.index.timestamp()))
                .or_default()
                .push(item);
        }
        futures::future::join_all(
            parts
                .into_iter()
                .map(|(part, items)| self.write_partition_table(kind, part, items)),
        )
        .await;
    }

    fn to_rows(&self, table: &str, items: Vec<AggregatedRow>) -> Vec<Row> {
        let mut rows = Vec::with_capacity(items.len());
        for item in items {
            let mut fields = match item.index.fields_with_bucket(|| self.buckets.next()) {
                Ok(fields) => fields,
                Err(e) => {
                    warn!(
                        table = %table,
                        "Skipping index entry: {}",
                        error_chain_to_pretty_formatted(&e)
                    );
                    continue;
                }
            };
            fields.push(Field::key("uniq", Value::Uint32(self.uniq_rand.next_u32())));
            fields.push(Field::value(
                "trace_ids",
                Value::Bytes(item.trace_ids.to_bytes()),
            ));
            rows.push(Row::new(fields));
        }
        rows
    }

    async fn write_partition_table(
        &self,
        kind: IndexKind,
        part: PartitionKey,
        items: Vec<AggregatedRow>,
    ) {
        let table = part.build_full_table_name(&self.db_path, kind.table_basename());
        let rows = self.to_rows(&table, items);
        if rows.is_empty() {
            return;
        }
        let row_count = rows.len();
        match upload_rows(
            self.store.as_ref(),
            &self.metrics,
            &table,
            rows,
            self.write_timeout,
        )
        .await
        {
            Ok(()) => info!(table = %table, "Inserted {row_count} index rows"),
            Err(e) => {
                error!(
                    table = %table,
                    "indexer write fail: {}",
                    error_chain_to_pretty_formatted(&e)
                );
            }
        }
    }
}
