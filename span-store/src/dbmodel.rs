//! Row representation shared by the span and index tables, and the span projection.

use backtraced_error::SerdeJsonError;
use chrono::{DateTime, Utc};
use span_structs::time_conversion::{duration_to_nanos_i64, time_to_nanos_i64};
use span_structs::{KeyValue, Span, TraceId};
use std::time::Duration;
use thiserror::Error;
use xxhash_rust::xxh3::Xxh3;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Uint8(u8),
    Uint32(u32),
    Uint64(u64),
    Int64(i64),
    Utf8(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub value: Value,
    /// Part of the row key, used as the upsert conflict target
    pub key: bool,
}

impl Field {
    pub fn key(name: &'static str, value: Value) -> Self {
        Self {
            name,
            value,
            key: true,
        }
    }

    pub fn value(name: &'static str, value: Value) -> Self {
        Self {
            name,
            value,
            key: false,
        }
    }
}

/// Flat record handed to a single bulk upsert
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    pub fields: Vec<Field>,
}

impl Row {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("start time {0} does not fit i64 nanoseconds")]
    TimestampOutOfRange(DateTime<Utc>),
    #[error("duration {0:?} does not fit i64 nanoseconds")]
    DurationOutOfRange(Duration),
    #[error("{field} contains a NUL byte")]
    NulByte { field: &'static str },
    #[error("Failed to encode span extra data")]
    Encode {
        #[from]
        source: SerdeJsonError,
    },
}

pub fn start_time_nanos(ts: DateTime<Utc>) -> Result<i64, ConversionError> {
    time_to_nanos_i64(ts).ok_or(ConversionError::TimestampOutOfRange(ts))
}

pub fn duration_nanos(duration: Duration) -> Result<i64, ConversionError> {
    duration_to_nanos_i64(duration).ok_or(ConversionError::DurationOutOfRange(duration))
}

/// Index rows are read newest first, so the key holds the negated start time
pub fn rev_start_time(ts: DateTime<Utc>) -> Result<i64, ConversionError> {
    Ok(start_time_nanos(ts)?.saturating_neg())
}

fn write_part(hasher: &mut Xxh3, part: &[u8]) {
    // length prefix, so ("ab", "c") and ("a", "bc") hash differently
    hasher.update(&(part.len() as u64).to_le_bytes());
    hasher.update(part);
}

pub fn hash_data(parts: &[&[u8]]) -> u64 {
    let mut hasher = Xxh3::new();
    for part in parts {
        write_part(&mut hasher, part);
    }
    hasher.digest()
}

pub fn hash_bucket_data(bucket: u8, parts: &[&[u8]]) -> u64 {
    let mut hasher = Xxh3::new();
    write_part(&mut hasher, &[bucket]);
    for part in parts {
        write_part(&mut hasher, part);
    }
    hasher.digest()
}

/// Trace ids observed for one aggregated index row. Order carries no meaning and
/// duplicates are kept.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceIdList(pub Vec<TraceId>);

impl TraceIdList {
    pub const ENCODED_ID_LEN: usize = 16;

    pub fn single(id: TraceId) -> Self {
        Self(vec![id])
    }

    pub fn push(&mut self, id: TraceId) {
        self.0.push(id);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.0.len() * Self::ENCODED_ID_LEN);
        for id in &self.0 {
            buf.extend_from_slice(&id.to_be_bytes());
        }
        buf
    }

    /// None when the input isn't a whole number of encoded ids
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % Self::ENCODED_ID_LEN != 0 {
            return None;
        }
        let ids = bytes
            .chunks_exact(Self::ENCODED_ID_LEN)
            .map(|chunk| {
                let mut id = [0u8; 16];
                id.copy_from_slice(chunk);
                TraceId::from_be_bytes(id)
            })
            .collect();
        Some(Self(ids))
    }
}

#[derive(serde::Serialize)]
struct SpanExtra<'a> {
    tags: &'a [KeyValue],
    process_tags: &'a [KeyValue],
}

/// Text columns can't hold `\0`
fn text_value(field: &'static str, s: &str) -> Result<Value, ConversionError> {
    if s.contains('\0') {
        return Err(ConversionError::NulByte { field });
    }
    Ok(Value::Utf8(s.to_string()))
}

pub fn span_to_row(span: &Span) -> Result<Row, ConversionError> {
    let extra = serde_json::to_vec(&SpanExtra {
        tags: &span.tags,
        process_tags: &span.process_tags,
    })
    .map_err(|e| {
        SerdeJsonError::from_serde_json_error(
            e,
            format!("encoding tags of span {:?} in trace {}", span.span_id, span.trace_id),
        )
    })?;
    Ok(Row::new(vec![
        Field::key("trace_id_high", Value::Uint64(span.trace_id.high)),
        Field::key("trace_id_low", Value::Uint64(span.trace_id.low)),
        Field::key("span_id", Value::Uint64(span.span_id.0)),
        Field::value("service_name", text_value("service_name", &span.service_name)?),
        Field::value(
            "operation_name",
            text_value("operation_name", &span.operation_name)?,
        ),
        Field::value("start_time", Value::Int64(start_time_nanos(span.start_time)?)),
        Field::value("duration", Value::Int64(duration_nanos(span.duration)?)),
        Field::value("extra", Value::Bytes(extra)),
    ]))
}
