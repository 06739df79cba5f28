use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

pub const NANOS_IN_1_MS: u64 = 1_000_000;
pub const NANOS_IN_1_SEC: u64 = 1_000_000_000;

/// None outside the range representable as i64 nanos (roughly 1677 to 2262)
pub fn time_to_nanos_i64(time: DateTime<Utc>) -> Option<i64> {
    time.timestamp_nanos_opt()
}

// doesnt panic
pub fn time_from_nanos(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

pub fn duration_to_nanos_i64(duration: Duration) -> Option<i64> {
    i64::try_from(duration.as_nanos()).ok()
}

/// Floors `time` to a multiple of `window_secs` since the Unix epoch, returning Unix seconds
pub fn truncate_to_window_secs(time: DateTime<Utc>, window_secs: i64) -> i64 {
    let secs = time.timestamp();
    secs - secs.rem_euclid(window_secs)
}

pub fn truncate_duration_to_millis(duration: Duration) -> Duration {
    Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

#[test]
fn time_from_nanos_doesnt_panic() {
    println!("{}", time_from_nanos(i64::MAX));
    println!("{}", time_from_nanos(i64::MIN));
    println!("{}", time_from_nanos(0));
}

#[test]
fn truncation_floors_negative_timestamps() {
    let before_epoch = time_from_nanos(-1);
    assert_eq!(truncate_to_window_secs(before_epoch, 5), -5);
    let t = Utc.with_ymd_and_hms(2024, 1, 5, 10, 0, 7).unwrap();
    assert_eq!(truncate_to_window_secs(t, 5), t.timestamp() - 2);
}

#[test]
fn out_of_range_times_have_no_nanos() {
    let far_future = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(time_to_nanos_i64(far_future), None);
    assert_eq!(duration_to_nanos_i64(Duration::MAX), None);
    assert_eq!(
        truncate_duration_to_millis(Duration::from_nanos(2_999_999)),
        Duration::from_millis(2)
    );
}
