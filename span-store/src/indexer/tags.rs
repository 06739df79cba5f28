use span_structs::{KeyValue, TagValue};
use std::collections::HashSet;

pub const DEFAULT_MAX_TAG_KEY_CHARS: usize = 128;
pub const DEFAULT_MAX_TAG_VALUE_CHARS: usize = 256;

/// Decides which span and process tags get a tag index entry.
/// Anything rejected here is silently left out of the index.
#[derive(Debug, Clone)]
pub struct TagIndexPolicy {
    pub max_key_chars: usize,
    pub max_value_chars: usize,
    pub excluded_keys: HashSet<String>,
}

impl Default for TagIndexPolicy {
    fn default() -> Self {
        Self {
            max_key_chars: DEFAULT_MAX_TAG_KEY_CHARS,
            max_value_chars: DEFAULT_MAX_TAG_VALUE_CHARS,
            excluded_keys: HashSet::new(),
        }
    }
}

impl TagIndexPolicy {
    pub fn should_index_tag(&self, tag: &KeyValue) -> bool {
        if tag.key.is_empty() || tag.key.chars().count() > self.max_key_chars {
            return false;
        }
        if self.excluded_keys.contains(&tag.key) {
            return false;
        }
        match &tag.value {
            TagValue::Str(s) => !s.is_empty() && s.chars().count() <= self.max_value_chars,
            TagValue::Bool(_) | TagValue::I64(_) => true,
            TagValue::F64(f) => f.is_finite(),
            TagValue::Binary(_) => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn kv(key: &str, value: TagValue) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn default_policy() {
        let policy = TagIndexPolicy::default();
        assert!(policy.should_index_tag(&KeyValue::string("env", "prod")));
        assert!(policy.should_index_tag(&kv("http.status_code", TagValue::I64(500))));
        assert!(policy.should_index_tag(&kv("error", TagValue::Bool(true))));
        assert!(policy.should_index_tag(&kv("ratio", TagValue::F64(0.5))));
        assert!(!policy.should_index_tag(&kv("ratio", TagValue::F64(f64::NAN))));
        assert!(!policy.should_index_tag(&kv("payload", TagValue::Binary(vec![1, 2]))));
        assert!(!policy.should_index_tag(&KeyValue::string("", "prod")));
        assert!(!policy.should_index_tag(&KeyValue::string("env", "")));
    }

    #[test]
    fn oversized_tags_are_not_indexed() {
        let policy = TagIndexPolicy {
            max_key_chars: 3,
            max_value_chars: 4,
            ..Default::default()
        };
        assert!(policy.should_index_tag(&KeyValue::string("env", "prod")));
        assert!(!policy.should_index_tag(&KeyValue::string("envs", "prod")));
        assert!(!policy.should_index_tag(&KeyValue::string("env", "produ")));
    }

    #[test]
    fn excluded_keys_are_not_indexed() {
        let policy = TagIndexPolicy {
            excluded_keys: ["sql.query".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert!(!policy.should_index_tag(&KeyValue::string("sql.query", "select 1")));
        assert!(policy.should_index_tag(&KeyValue::string("sql.table", "users")));
    }
}
