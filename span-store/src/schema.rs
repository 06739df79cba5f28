//! Physical layout: which table shard a timestamp lands in and what that table is called.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use std::fmt::{Display, Formatter};

/// Each calendar day (UTC) is split into this many equally sized partitions
pub const PARTITIONS_PER_DAY: u32 = 4;
const HOURS_PER_PARTITION: u32 = 24 / PARTITIONS_PER_DAY;
const PARTITION_DATE_FORMAT: &str = "%Y%m%d";

/// Round-robin buckets per logical index row, same for every index table
pub const NUM_INDEX_BUCKETS: u8 = 10;

pub const TBL_TRACES: &str = "traces";
pub const TBL_TAG_INDEX: &str = "idx_tag";
pub const TBL_SERVICE_NAME_INDEX: &str = "idx_service_name";
pub const TBL_SERVICE_OPERATION_INDEX: &str = "idx_service_op";
pub const TBL_DURATION_INDEX: &str = "idx_duration";

/// Storage namespace all tables live under (a Postgres schema)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbPath(String);

impl DbPath {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Self(path.into())
    }
}

impl Display for DbPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub date: NaiveDate,
    pub num: u8,
}

impl PartitionKey {
    pub fn suffix(&self) -> String {
        format!("{}_{}", self.date.format(PARTITION_DATE_FORMAT), self.num)
    }

    pub fn build_full_table_name(&self, db_path: &DbPath, table: &str) -> String {
        format!("{}.{}_{}", db_path, table, self.suffix())
    }
}

impl Display for PartitionKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.suffix())
    }
}

pub fn partition_from_time(ts: DateTime<Utc>) -> PartitionKey {
    PartitionKey {
        date: ts.date_naive(),
        num: (ts.hour() / HOURS_PER_PARTITION) as u8,
    }
}

pub fn build_full_table_name(db_path: &DbPath, key: PartitionKey, table: &str) -> String {
    key.build_full_table_name(db_path, table)
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn partition_boundaries() {
        let first = partition_from_time(at(2024, 1, 5, 0, 0));
        assert_eq!(first, partition_from_time(at(2024, 1, 5, 5, 59)));
        assert_ne!(first, partition_from_time(at(2024, 1, 5, 6, 0)));
        assert_eq!(partition_from_time(at(2024, 1, 5, 23, 59)).num, 3);
        assert_ne!(
            partition_from_time(at(2024, 1, 5, 23, 59)),
            partition_from_time(at(2024, 1, 6, 0, 0))
        );
    }

    #[test]
    fn full_table_name() {
        let key = partition_from_time(at(2024, 1, 5, 7, 30));
        let path = DbPath::new("jaeger");
        assert_eq!(
            build_full_table_name(&path, key, TBL_TRACES),
            "jaeger.traces_20240105_1"
        );
        assert_eq!(
            key.build_full_table_name(&path, TBL_TAG_INDEX),
            "jaeger.idx_tag_20240105_1"
        );
    }

    #[test]
    fn epoch_has_a_well_defined_key() {
        let key = partition_from_time(Utc.timestamp_opt(0, 0).unwrap());
        assert_eq!(key.suffix(), "19700101_0");
    }

    fn any_time() -> impl Strategy<Value = DateTime<Utc>> {
        // 1970..2200
        (0i64..7_258_118_400).prop_map(|secs| Utc.timestamp_opt(secs, 0).unwrap())
    }

    proptest! {
        #[test]
        fn partition_is_monotonic(a in any_time(), b in any_time()) {
            let (early, late) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(partition_from_time(early) <= partition_from_time(late));
        }

        #[test]
        fn same_window_same_key(t in any_time(), offset_secs in 0i64..(HOURS_PER_PARTITION as i64 * 3600)) {
            let window_secs = HOURS_PER_PARTITION as i64 * 3600;
            let start = t - Duration::seconds(t.timestamp().rem_euclid(window_secs));
            prop_assert_eq!(
                partition_from_time(start),
                partition_from_time(start + Duration::seconds(offset_secs))
            );
            prop_assert_ne!(
                partition_from_time(start),
                partition_from_time(start + Duration::seconds(window_secs))
            );
        }
    }
}
