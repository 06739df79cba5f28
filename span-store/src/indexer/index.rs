//! The four index entry kinds derived from a span.
//!
//! Every kind answers the same three questions: what identifies it for in-batch
//! aggregation ([`Indexable::hash`]), when it happened ([`Indexable::timestamp`]) and
//! what it looks like as a row ([`Indexable::fields`]).

use crate::dbmodel::{
    duration_nanos, hash_bucket_data, hash_data, rev_start_time, ConversionError, Field, Value,
};
use chrono::{DateTime, Utc};
use span_structs::time_conversion::truncate_duration_to_millis;
use span_structs::{KeyValue, Span};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct TagIndex {
    pub service_name: String,
    pub operation_name: String,
    pub key: String,
    pub value: String,
    pub start_time: DateTime<Utc>,
}

impl TagIndex {
    pub fn new(span: &Span, tag: &KeyValue) -> Self {
        Self {
            service_name: span.service_name.clone(),
            operation_name: span.operation_name.clone(),
            key: tag.key.clone(),
            value: tag.value.to_string(),
            start_time: span.start_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceNameIndex {
    pub service_name: String,
    pub start_time: DateTime<Utc>,
}

impl ServiceNameIndex {
    pub fn new(span: &Span) -> Self {
        Self {
            service_name: span.service_name.clone(),
            start_time: span.start_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOperationIndex {
    pub service_name: String,
    pub operation_name: String,
    pub start_time: DateTime<Utc>,
}

impl ServiceOperationIndex {
    pub fn new(span: &Span) -> Self {
        Self {
            service_name: span.service_name.clone(),
            operation_name: span.operation_name.clone(),
            start_time: span.start_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DurationIndex {
    pub service_name: String,
    /// Empty for the service-wide entry
    pub operation_name: String,
    /// Span duration floored to whole milliseconds
    pub duration: Duration,
    pub start_time: DateTime<Utc>,
}

impl DurationIndex {
    pub fn new(span: &Span, operation_name: &str) -> Self {
        Self {
            service_name: span.service_name.clone(),
            operation_name: operation_name.to_string(),
            duration: truncate_duration_to_millis(span.duration),
            start_time: span.start_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Indexable {
    Tag(TagIndex),
    ServiceName(ServiceNameIndex),
    ServiceOperation(ServiceOperationIndex),
    Duration(DurationIndex),
}

impl Indexable {
    /// Identity used to merge entries within a batch
    pub fn hash(&self) -> u64 {
        match self {
            Indexable::Tag(i) => hash_data(&[
                i.service_name.as_bytes(),
                i.operation_name.as_bytes(),
                i.key.as_bytes(),
                i.value.as_bytes(),
            ]),
            Indexable::ServiceName(i) => hash_data(&[i.service_name.as_bytes()]),
            Indexable::ServiceOperation(i) => {
                hash_data(&[i.service_name.as_bytes(), i.operation_name.as_bytes()])
            }
            Indexable::Duration(i) => hash_data(&[
                i.service_name.as_bytes(),
                i.operation_name.as_bytes(),
                &u64::try_from(i.duration.as_millis())
                    .unwrap_or(u64::MAX)
                    .to_le_bytes(),
            ]),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Indexable::Tag(i) => i.start_time,
            Indexable::ServiceName(i) => i.start_time,
            Indexable::ServiceOperation(i) => i.start_time,
            Indexable::Duration(i) => i.start_time,
        }
    }

    /// Row fields for the given round-robin bucket. `idx_hash` is what the read side
    /// looks up, one lookup per bucket.
    pub fn fields(&self, bucket: u8) -> Result<Vec<Field>, ConversionError> {
        self.fields_with_bucket(|| bucket)
    }

    /// Same as [`Indexable::fields`], `next_bucket` only runs once the conversions succeeded
    pub fn fields_with_bucket(
        &self,
        next_bucket: impl FnOnce() -> u8,
    ) -> Result<Vec<Field>, ConversionError> {
        let rev_ts = Field::key("rev_start_time", Value::Int64(rev_start_time(self.timestamp())?));
        let duration_field = match self {
            Indexable::Duration(i) => Some(Field::key(
                "duration",
                Value::Int64(duration_nanos(i.duration)?),
            )),
            _ => None,
        };
        let bucket = next_bucket();
        let bucket_field = Field::key("bucket", Value::Uint8(bucket));
        let fields = match self {
            Indexable::Tag(i) => vec![
                Field::key(
                    "idx_hash",
                    Value::Uint64(hash_bucket_data(
                        bucket,
                        &[i.service_name.as_bytes(), i.key.as_bytes(), i.value.as_bytes()],
                    )),
                ),
                bucket_field,
                rev_ts,
                Field::key(
                    "op_hash",
                    Value::Uint64(hash_data(&[i.operation_name.as_bytes()])),
                ),
            ],
            Indexable::ServiceName(i) => vec![
                Field::key(
                    "idx_hash",
                    Value::Uint64(hash_bucket_data(bucket, &[i.service_name.as_bytes()])),
                ),
                bucket_field,
                rev_ts,
            ],
            Indexable::ServiceOperation(i) => vec![
                Field::key(
                    "idx_hash",
                    Value::Uint64(hash_bucket_data(
                        bucket,
                        &[i.service_name.as_bytes(), i.operation_name.as_bytes()],
                    )),
                ),
                bucket_field,
                rev_ts,
            ],
            Indexable::Duration(i) => {
                let mut fields = vec![
                    Field::key(
                        "idx_hash",
                        Value::Uint64(hash_bucket_data(
                            bucket,
                            &[i.service_name.as_bytes(), i.operation_name.as_bytes()],
                        )),
                    ),
                    bucket_field,
                ];
                fields.extend(duration_field);
                fields.push(rev_ts);
                fields
            }
        };
        Ok(fields)
    }
}
