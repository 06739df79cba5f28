use chrono::{DateTime, Utc};
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod time_conversion;

/// 128-bit trace identifier, shared by every span of the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct TraceId {
    pub high: u64,
    pub low: u64,
}

impl TraceId {
    pub fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    pub fn to_be_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.high.to_be_bytes());
        bytes[8..].copy_from_slice(&self.low.to_be_bytes());
        bytes
    }

    pub fn from_be_bytes(bytes: [u8; 16]) -> Self {
        let mut high = [0u8; 8];
        let mut low = [0u8; 8];
        high.copy_from_slice(&bytes[..8]);
        low.copy_from_slice(&bytes[8..]);
        Self {
            high: u64::from_be_bytes(high),
            low: u64::from_be_bytes(low),
        }
    }
}

impl Display for TraceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.high, self.low)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SpanId(pub u64);

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "value")]
pub enum TagValue {
    Str(String),
    Bool(bool),
    I64(i64),
    F64(f64),
    Binary(Vec<u8>),
}

impl Display for TagValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TagValue::Str(s) => write!(f, "{s}"),
            TagValue::Bool(b) => write!(f, "{b}"),
            TagValue::I64(i) => write!(f, "{i}"),
            TagValue::F64(v) => write!(f, "{v}"),
            TagValue::Binary(bytes) => {
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: TagValue,
}

impl KeyValue {
    pub fn string<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Self {
            key: key.into(),
            value: TagValue::Str(value.into()),
        }
    }
}

/// A single timed operation, already decoded from whatever wire format it arrived in.
/// Read-only once it reaches the writers.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Span {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub service_name: String,
    pub operation_name: String,
    pub start_time: DateTime<Utc>,
    pub duration: Duration,
    #[serde(default)]
    pub tags: Vec<KeyValue>,
    /// Tags of the process (resource) that emitted the span
    #[serde(default)]
    pub process_tags: Vec<KeyValue>,
}

impl Span {
    /// Rough payload size, names plus tag keys and values
    pub fn estimated_size_bytes(&self) -> usize {
        let tags_size = |tags: &[KeyValue]| -> usize {
            tags.iter().fold(0usize, |acc, kv| {
                let value_size = match &kv.value {
                    TagValue::Str(s) => s.len(),
                    TagValue::Binary(b) => b.len(),
                    TagValue::Bool(_) => 1,
                    TagValue::I64(_) | TagValue::F64(_) => 8,
                };
                acc.saturating_add(kv.key.len()).saturating_add(value_size)
            })
        };
        self.service_name
            .len()
            .saturating_add(self.operation_name.len())
            .saturating_add(tags_size(&self.tags))
            .saturating_add(tags_size(&self.process_tags))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trace_id_bytes_are_big_endian_high_first() {
        let id = TraceId::new(1, 2);
        let bytes = id.to_be_bytes();
        assert_eq!(bytes[7], 1);
        assert_eq!(bytes[15], 2);
        assert_eq!(TraceId::from_be_bytes(bytes), id);
        assert_eq!(id.to_string(), "00000000000000010000000000000002");
    }

    #[test]
    fn span_deserializes_without_tags() {
        let json = r#"{
            "trace_id": {"high": 0, "low": 7},
            "span_id": 3,
            "service_name": "checkout",
            "operation_name": "pay",
            "start_time": "2024-01-05T10:00:00Z",
            "duration": {"secs": 0, "nanos": 1500000}
        }"#;
        let span: Span = serde_json::from_str(json).unwrap();
        assert_eq!(span.trace_id, TraceId::new(0, 7));
        assert!(span.tags.is_empty());
        assert!(span.process_tags.is_empty());
        assert_eq!(span.duration, Duration::from_micros(1500));
    }

    #[test]
    fn tag_values_display_as_index_strings() {
        assert_eq!(TagValue::Str("prod".to_string()).to_string(), "prod");
        assert_eq!(TagValue::I64(-4).to_string(), "-4");
        assert_eq!(TagValue::Bool(true).to_string(), "true");
        assert_eq!(TagValue::Binary(vec![0xab, 0x01]).to_string(), "ab01");
    }
}
