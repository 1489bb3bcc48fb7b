//! Weekly leaderboard reset calendar

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

/// First `weekday` at `hour`:00 UTC strictly after `after`
pub fn next_reset(after: DateTime<Utc>, weekday: Weekday, hour: u32) -> DateTime<Utc> {
    let target = i64::from(weekday.num_days_from_monday());
    let today = i64::from(after.weekday().num_days_from_monday());
    let days_ahead = (target - today).rem_euclid(7);

    let day = after.date_naive() + Duration::days(days_ahead);
    let candidate =
        (day.and_time(NaiveTime::MIN) + Duration::hours(i64::from(hour))).and_utc();

    if candidate > after {
        candidate
    } else {
        candidate + Duration::weeks(1)
    }
}
