use crate::indexer::tags::{TagIndexPolicy, DEFAULT_MAX_TAG_KEY_CHARS, DEFAULT_MAX_TAG_VALUE_CHARS};
use crate::schema::DbPath;
use std::fmt::{Debug, Formatter};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("write timeout must be greater than zero")]
    ZeroWriteTimeout,
    #[error("max_db_connections must be greater than zero")]
    ZeroDbConnections,
    #[error("tag length limits must be greater than zero")]
    ZeroTagLimit,
    #[error("db schema must not be empty")]
    EmptyDbSchema,
    #[error("db schema {0:?} must be a single name, without '.'")]
    DottedDbSchema(String),
}

#[derive(Debug, clap::Parser)]
pub struct StoreConfig {
    #[clap(flatten)]
    pub db: DbConfig,
    /// Schema every partitioned table lives in
    #[clap(long, env, default_value = "jaeger")]
    pub db_schema: String,
    /// Timeout of each bulk upsert
    #[clap(long, env, default_value_t = 10_000)]
    pub write_timeout_ms: u64,
    #[clap(long, env, default_value_t = 9091)]
    pub metrics_listen_port: u16,
    /// Log as JSON lines instead of compact text
    #[clap(long, env)]
    pub log_json: bool,
    #[clap(flatten)]
    pub tag_policy: TagPolicyConfig,
}

#[derive(clap::Parser)]
pub struct DbConfig {
    #[clap(long, env = "DATABASE_URL")]
    pub url: String,
    #[clap(long, env, default_value_t = 10)]
    pub max_db_connections: u16,
}

impl Debug for DbConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("max_db_connections", &self.max_db_connections)
            .field(
                "url",
                &self
                    .url
                    .chars()
                    .rev()
                    .take(15)
                    .collect::<String>()
                    .chars()
                    .rev()
                    .collect::<String>(),
            )
            .finish()
    }
}

#[derive(Debug, clap::Parser)]
pub struct TagPolicyConfig {
    #[clap(long, env, default_value_t = DEFAULT_MAX_TAG_KEY_CHARS)]
    pub max_tag_key_chars: usize,
    #[clap(long, env, default_value_t = DEFAULT_MAX_TAG_VALUE_CHARS)]
    pub max_tag_value_chars: usize,
    /// Tag keys never indexed, comma separated
    #[clap(long, env, value_delimiter = ',')]
    pub excluded_tag_keys: Vec<String>,
}

impl StoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::ZeroWriteTimeout);
        }
        if self.db.max_db_connections == 0 {
            return Err(ConfigError::ZeroDbConnections);
        }
        if self.tag_policy.max_tag_key_chars == 0 || self.tag_policy.max_tag_value_chars == 0 {
            return Err(ConfigError::ZeroTagLimit);
        }
        if self.db_schema.is_empty() {
            return Err(ConfigError::EmptyDbSchema);
        }
        // table names are built as `{schema}.{table}` and split back on the first '.'
        if self.db_schema.contains('.') {
            return Err(ConfigError::DottedDbSchema(self.db_schema.clone()));
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn db_path(&self) -> DbPath {
        DbPath::new(self.db_schema.clone())
    }

    pub fn tag_index_policy(&self) -> TagIndexPolicy {
        TagIndexPolicy {
            max_key_chars: self.tag_policy.max_tag_key_chars,
            max_value_chars: self.tag_policy.max_tag_value_chars,
            excluded_keys: self
                .tag_policy
                .excluded_tag_keys
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }
}
