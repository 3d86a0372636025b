//! Shop-local scheduling math.

use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::config::SCAN_LOCAL_HOUR;

/// Parses an IANA zone name, falling back to UTC.
pub fn resolve_tz(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("[SCAN] unknown timezone `{tz_name}`, scheduling in UTC");
            chrono_tz::UTC
        }
    }
}

/// Maps a wall-clock time to an instant. Ambiguous times (clocks falling back) take the
/// earlier instant; nonexistent times (clocks springing forward) take the first valid
/// minute after the gap.
pub(crate) fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>> {
    let mut probe = naive;
    // Real-world gaps are at most a few hours.
    for _ in 0..=24 * 60 {
        match tz.from_local_datetime(&probe) {
            LocalResult::Single(t) => return Some(t),
            LocalResult::Ambiguous(earliest, _) => return Some(earliest),
            LocalResult::None => probe += Duration::minutes(1),
        }
    }
    None
}

/// First shop-local `SCAN_LOCAL_HOUR`:00 strictly after `now`.
pub fn next_run_at(tz_name: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let tz = resolve_tz(tz_name);
    let today = now.with_timezone(&tz).date_naive();
    let at = NaiveTime::from_hms_opt(SCAN_LOCAL_HOUR, 0, 0).unwrap_or(NaiveTime::MIN);

    let mut day = today;
    for _ in 0..3 {
        if let Some(t) = resolve_local(tz, day.and_time(at)) {
            let t = t.with_timezone(&Utc);
            if t > now {
                return t;
            }
        }
        day = day.succ_opt().unwrap_or(day);
    }
    // Only reachable for a date at the end of chrono's range.
    now + Duration::days(1)
}

/// Shop-local calendar day (`YYYY-MM-DD`) used as the digest idempotency key.
pub fn local_day_key(tz_name: &str, now: DateTime<Utc>) -> String {
    now.with_timezone(&resolve_tz(tz_name)).format("%Y-%m-%d").to_string()
}
