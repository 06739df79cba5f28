use crate::dbmodel::{Row, Value};
use async_trait::async_trait;
use backtraced_error::SqlxError;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bulk upsert into {table} timed out after {timeout:?}")]
    Timeout { table: String, timeout: Duration },
    #[error("rows for {table} don't share one column layout: {reason}")]
    SchemaMismatch { table: String, reason: String },
    #[error("invalid table name {0:?}")]
    InvalidTableName(String),
    #[error("Database error")]
    Sqlx {
        #[from]
        source: SqlxError,
    },
    #[error("write to {table} rejected: {reason}")]
    Rejected { table: String, reason: String },
}

/// The backing table store. One call writes every row or fails as a whole;
/// nothing is atomic across calls.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn bulk_upsert(&self, table: &str, rows: Vec<Row>) -> Result<(), StoreError>;
}

pub struct PgTableStore {
    con: PgPool,
}

impl PgTableStore {
    pub fn new(con: PgPool) -> Self {
        Self { con }
    }
}

#[derive(Debug, PartialEq)]
enum Column {
    BigInt(Vec<i64>),
    Text(Vec<String>),
    Bytea(Vec<Vec<u8>>),
}

impl Column {
    fn for_value(value: &Value, capacity: usize) -> Self {
        match value {
            Value::Uint8(_) | Value::Uint32(_) | Value::Uint64(_) | Value::Int64(_) => {
                Column::BigInt(Vec::with_capacity(capacity))
            }
            Value::Utf8(_) => Column::Text(Vec::with_capacity(capacity)),
            Value::Bytes(_) => Column::Bytea(Vec::with_capacity(capacity)),
        }
    }

    /// false if the value doesn't belong in this column
    fn push(&mut self, value: Value) -> bool {
        match (self, value) {
            (Column::BigInt(v), Value::Uint8(x)) => v.push(i64::from(x)),
            (Column::BigInt(v), Value::Uint32(x)) => v.push(i64::from(x)),
            // hashes and ids keep their bits, the sign doesn't matter to the store
            (Column::BigInt(v), Value::Uint64(x)) => v.push(x as i64),
            (Column::BigInt(v), Value::Int64(x)) => v.push(x),
            (Column::Text(v), Value::Utf8(x)) => v.push(x),
            (Column::Bytea(v), Value::Bytes(x)) => v.push(x),
            _ => return false,
        }
        true
    }

    fn pg_array_type(&self) -> &'static str {
        match self {
            Column::BigInt(_) => "BIGINT[]",
            Column::Text(_) => "TEXT[]",
            Column::Bytea(_) => "BYTEA[]",
        }
    }
}

#[derive(Debug)]
struct ColumnarRows {
    names: Vec<&'static str>,
    key_names: Vec<&'static str>,
    columns: Vec<Column>,
}

/// Keeps the last row of each key, in first-seen key order. Postgres refuses an
/// `ON CONFLICT DO UPDATE` touching the same key twice in one statement.
fn dedup_by_key(rows: Vec<Row>) -> Vec<Row> {
    let mut positions: HashMap<Vec<Value>, usize> = HashMap::with_capacity(rows.len());
    let mut unique: Vec<Row> = Vec::with_capacity(rows.len());
    for row in rows {
        let key: Vec<Value> = row
            .fields
            .iter()
            .filter(|f| f.key)
            .map(|f| f.value.clone())
            .collect();
        match positions.get(&key) {
            Some(&pos) => unique[pos] = row,
            None => {
                positions.insert(key, unique.len());
                unique.push(row);
            }
        }
    }
    unique
}

fn rows_to_columns(table: &str, rows: Vec<Row>) -> Result<ColumnarRows, StoreError> {
    let mismatch = |reason: String| StoreError::SchemaMismatch {
        table: table.to_string(),
        reason,
    };
    let rows = dedup_by_key(rows);
    let first = rows
        .first()
        .ok_or_else(|| mismatch("no rows".to_string()))?;
    let names: Vec<&'static str> = first.fields.iter().map(|f| f.name).collect();
    let key_names: Vec<&'static str> = first
        .fields
        .iter()
        .filter(|f| f.key)
        .map(|f| f.name)
        .collect();
    let mut columns: Vec<Column> = first
        .fields
        .iter()
        .map(|f| Column::for_value(&f.value, rows.len()))
        .collect();
    for (row_idx, row) in rows.into_iter().enumerate() {
        if row.fields.len() != names.len() {
            return Err(mismatch(format!(
                "row {row_idx} has {} fields, expected {}",
                row.fields.len(),
                names.len()
            )));
        }
        for ((field, column), name) in row.fields.into_iter().zip(&mut columns).zip(&names) {
            if field.name != *name {
                return Err(mismatch(format!(
                    "row {row_idx} has field {} where {name} was expected",
                    field.name
                )));
            }
            if !column.push(field.value) {
                return Err(mismatch(format!("row {row_idx} has a mistyped {name}")));
            }
        }
    }
    Ok(ColumnarRows {
        names,
        key_names,
        columns,
    })
}

fn quote_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// `schema.table` to `"schema"."table"`
fn quote_table_name(table: &str) -> Result<String, StoreError> {
    match table.split_once('.') {
        Some((schema, name)) if !schema.is_empty() && !name.is_empty() => Ok(format!(
            "{}.{}",
            quote_identifier(schema),
            quote_identifier(name)
        )),
        None if !table.is_empty() => Ok(quote_identifier(table)),
        _ => Err(StoreError::InvalidTableName(table.to_string())),
    }
}

fn upsert_statement(table: &str, rows: &ColumnarRows) -> Result<String, StoreError> {
    let columns = rows
        .names
        .iter()
        .map(|n| quote_identifier(n))
        .collect::<Vec<_>>()
        .join(", ");
    let unnest_args = rows
        .columns
        .iter()
        .enumerate()
        .map(|(idx, c)| format!("${}::{}", idx + 1, c.pg_array_type()))
        .collect::<Vec<_>>()
        .join(", ");
    if rows.key_names.is_empty() {
        return Err(StoreError::SchemaMismatch {
            table: table.to_string(),
            reason: "rows have no key fields".to_string(),
        });
    }
    let conflict_action = {
        let updates = rows
            .names
            .iter()
            .filter(|n| !rows.key_names.contains(n))
            .map(|n| format!("{0} = excluded.{0}", quote_identifier(n)))
            .collect::<Vec<_>>();
        let keys = rows
            .key_names
            .iter()
            .map(|n| quote_identifier(n))
            .collect::<Vec<_>>()
            .join(", ");
        if updates.is_empty() {
            format!("on conflict ({keys}) do nothing")
        } else {
            format!("on conflict ({keys}) do update set {}", updates.join(", "))
        }
    };
    Ok(format!(
        "insert into {} ({columns}) select * from unnest({unnest_args}) {conflict_action};",
        quote_table_name(table)?
    ))
}

#[async_trait]
impl TableStore for PgTableStore {
    #[instrument(skip_all, fields(table = %table, rows = rows.len()))]
    async fn bulk_upsert(&self, table: &str, rows: Vec<Row>) -> Result<(), StoreError> {
        if rows.is_empty() {
            debug!("No rows to upsert");
            return Ok(());
        }
        let columnar = rows_to_columns(table, rows)?;
        let statement = upsert_statement(table, &columnar)?;
        let mut query = sqlx::query(&statement);
        for column in columnar.columns {
            query = match column {
                Column::BigInt(values) => query.bind(values),
                Column::Text(values) => query.bind(values),
                Column::Bytea(values) => query.bind(values),
            };
        }
        let res = query
            .execute(&self.con)
            .await
            .map_err(|e| SqlxError::from_sqlx_error(e, format!("bulk upsert into {table}")))?;
        debug!("Upserted ({} rows)", res.rows_affected());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dbmodel::Field;

    fn row(id: u64, name: &str) -> Row {
        Row::new(vec![
            Field::key("id", Value::Uint64(id)),
            Field::key("uniq", Value::Uint32(7)),
            Field::value("name", Value::Utf8(name.to_string())),
            Field::value("payload", Value::Bytes(vec![1])),
        ])
    }

    #[test]
    fn rows_become_typed_columns() {
        let columnar = rows_to_columns("s.t", vec![row(u64::MAX, "a"), row(2, "b")]).unwrap();
        assert_eq!(columnar.names, vec!["id", "uniq", "name", "payload"]);
        assert_eq!(columnar.key_names, vec!["id", "uniq"]);
        assert_eq!(columnar.columns[0], Column::BigInt(vec![-1, 2]));
        assert_eq!(columnar.columns[1], Column::BigInt(vec![7, 7]));
        assert_eq!(
            columnar.columns[2],
            Column::Text(vec!["a".to_string(), "b".to_string()])
        );
        assert_eq!(columnar.columns[3], Column::Bytea(vec![vec![1], vec![1]]));
    }

    #[test]
    fn repeated_keys_keep_the_last_row() {
        let columnar = rows_to_columns(
            "s.t",
            vec![row(1, "first"), row(2, "b"), row(1, "again")],
        )
        .unwrap();
        assert_eq!(columnar.columns[0], Column::BigInt(vec![1, 2]));
        assert_eq!(
            columnar.columns[2],
            Column::Text(vec!["again".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn rows_with_a_different_uniq_are_both_kept() {
        let mut other_uniq = row(1, "a");
        other_uniq.fields[1].value = Value::Uint32(8);
        let columnar = rows_to_columns("s.t", vec![row(1, "a"), other_uniq]).unwrap();
        assert_eq!(columnar.columns[1], Column::BigInt(vec![7, 8]));
    }

    #[test]
    fn mismatched_rows_are_rejected() {
        let mut odd = row(1, "a");
        odd.fields[2].value = Value::Int64(3);
        assert!(matches!(
            rows_to_columns("s.t", vec![row(1, "a"), odd]),
            Err(StoreError::SchemaMismatch { .. })
        ));
        let mut short = row(1, "a");
        short.fields.pop();
        assert!(matches!(
            rows_to_columns("s.t", vec![row(1, "a"), short]),
            Err(StoreError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn upsert_statement_shape() {
        let columnar = rows_to_columns("jaeger.traces_20240105_1", vec![row(1, "a")]).unwrap();
        let statement = upsert_statement("jaeger.traces_20240105_1", &columnar).unwrap();
        assert_eq!(
            statement,
            "insert into \"jaeger\".\"traces_20240105_1\" (\"id\", \"uniq\", \"name\", \"payload\") \
             select * from unnest($1::BIGINT[], $2::BIGINT[], $3::TEXT[], $4::BYTEA[]) \
             on conflict (\"id\", \"uniq\") do update set \"name\" = excluded.\"name\", \"payload\" = excluded.\"payload\";"
        );
    }

    #[test]
    fn all_key_rows_do_nothing_on_conflict() {
        let rows = vec![Row::new(vec![Field::key("id", Value::Int64(1))])];
        let columnar = rows_to_columns("s.t", rows).unwrap();
        let statement = upsert_statement("s.t", &columnar).unwrap();
        assert!(statement.ends_with("on conflict (\"id\") do nothing;"));
    }

    #[test]
    fn table_names_are_quoted() {
        assert_eq!(quote_table_name("a.b").unwrap(), "\"a\".\"b\"");
        assert_eq!(quote_table_name("b").unwrap(), "\"b\"");
        assert_eq!(quote_table_name("we\"ird.t").unwrap(), "\"we\"\"ird\".\"t\"");
        assert!(quote_table_name(".t").is_err());
        assert!(quote_table_name("").is_err());
    }
}
