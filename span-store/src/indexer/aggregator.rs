use crate::dbmodel::TraceIdList;
use crate::indexer::index::Indexable;
use span_structs::time_conversion::truncate_to_window_secs;
use span_structs::TraceId;
use std::collections::HashMap;

/// Entries with the same hash inside this window become one row
pub const AGGREGATION_WINDOW_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AggregationKey {
    hash: u64,
    window_start_secs: i64,
}

/// First entry seen for an aggregation key, plus every trace that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRow {
    pub index: Indexable,
    pub trace_ids: TraceIdList,
}

/// Merges index entries of one kind within a batch. Lives as long as the batch.
#[derive(Debug, Default)]
pub struct IndexAggregator {
    rows: HashMap<AggregationKey, AggregatedRow>,
}

impl IndexAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, index: Indexable, trace_id: TraceId) {
        let key = AggregationKey {
            hash: index.hash(),
            window_start_secs: truncate_to_window_secs(index.timestamp(), AGGREGATION_WINDOW_SECS),
        };
        self.rows
            .entry(key)
            .and_modify(|row| row.trace_ids.push(trace_id))
            .or_insert_with(|| AggregatedRow {
                index,
                trace_ids: TraceIdList::single(trace_id),
            });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn into_index_data(self) -> Vec<AggregatedRow> {
        self.rows.into_values().collect()
    }
}
