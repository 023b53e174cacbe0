//! Window boundaries and timestamp normalization
//!
//! Quota windows roll over at the user's local midnight (daily) or local
//! Monday 00:00 (weekly). Rollover is computed from `now` at read/write
//! time, never by a scheduled job, so outages cannot skew windows.

use crate::catalog::WindowKind;
use time::format_description::well_known::Rfc3339;
use time::{Date, Duration, OffsetDateTime, Time, UtcOffset};

/// Product default: UTC+8
pub const DEFAULT_TZ_OFFSET_MINUTES: i32 = 480;

#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    #[error("unparseable store timestamp: {0}")]
    Unparseable(String),
}

/// Build a `UtcOffset` from the per-user stored minutes, clamped to the
/// valid UTC offset range. Invalid rows fall back to the product default.
pub fn user_offset(tz_offset_minutes: i32) -> UtcOffset {
    let minutes = tz_offset_minutes.clamp(-12 * 60, 14 * 60);
    UtcOffset::from_whole_seconds(minutes * 60)
        .unwrap_or(UtcOffset::UTC)
}

/// The next window boundary strictly after `now` for the given kind,
/// evaluated in the user's local zone.
pub fn next_reset(now: OffsetDateTime, offset: UtcOffset, kind: WindowKind) -> OffsetDateTime {
    let local = now.to_offset(offset);
    let date = match kind {
        WindowKind::Daily => local.date().next_day(),
        WindowKind::Weekly => {
            // Start of next ISO week: Monday 00:00 local. From a Monday the
            // boundary is the following Monday, keeping reset_at strictly
            // in the future.
            let days_ahead = 7 - i64::from(local.weekday().number_days_from_monday());
            local.date().checked_add(Duration::days(days_ahead))
        }
    };
    // Date overflow is unreachable for timestamps this side of year 9999
    let date = date.unwrap_or(local.date());
    midnight(date, offset)
}

fn midnight(date: Date, offset: UtcOffset) -> OffsetDateTime {
    OffsetDateTime::new_in_offset(date, Time::MIDNIGHT, offset)
}

/// Normalize a timestamp as it comes back from the store or a gateway.
///
/// Accepts RFC3339 (`2024-03-01T12:00:00+08:00`) and the space-separated
/// form Postgres text casts produce (`2024-03-01 12:00:00.123456+08`,
/// with or without fractional seconds or an offset). Naive values are
/// treated as UTC. Anything else is an error; callers surface it as
/// `store_unavailable` rather than doing arithmetic on mixed types.
pub fn parse_store_timestamp(raw: &str) -> Result<OffsetDateTime, TimestampError> {
    let s = raw.trim();
    if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(ts);
    }

    let mut candidate = s.replacen(' ', "T", 1);
    // Postgres emits short offsets ("+08"); RFC3339 wants "+08:00"
    if let Some(idx) = candidate.rfind(['+', '-']) {
        if idx > 10 {
            let tail = &candidate[idx + 1..];
            if tail.len() == 2 && tail.bytes().all(|b| b.is_ascii_digit()) {
                candidate.push_str(":00");
            }
        }
    }
    if let Ok(ts) = OffsetDateTime::parse(&candidate, &Rfc3339) {
        return Ok(ts);
    }

    // Naive timestamp: assume UTC
    let assumed_utc = format!("{candidate}Z");
    OffsetDateTime::parse(&assumed_utc, &Rfc3339)
        .map_err(|_| TimestampError::Unparseable(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::WindowKind;
    use time::macros::datetime;

    fn cst() -> UtcOffset {
        user_offset(DEFAULT_TZ_OFFSET_MINUTES)
    }

    #[test]
    fn daily_reset_is_next_local_midnight() {
        // 23:59 local on 2024-03-01 (+8) is 15:59 UTC
        let now = datetime!(2024-03-01 15:59:00 UTC);
        let reset = next_reset(now, cst(), WindowKind::Daily);
        assert_eq!(reset, datetime!(2024-03-02 00:00:00 +8));
        assert_eq!(reset.to_offset(UtcOffset::UTC), datetime!(2024-03-01 16:00:00 UTC));
    }

    #[test]
    fn daily_reset_at_exact_local_midnight_moves_forward() {
        // Exactly local midnight: the window that just opened runs to the
        // following midnight.
        let now = datetime!(2024-03-01 16:00:00 UTC); // 2024-03-02 00:00 +8
        let reset = next_reset(now, cst(), WindowKind::Daily);
        assert_eq!(reset, datetime!(2024-03-03 00:00:00 +8));
    }

    #[test]
    fn weekly_reset_is_next_local_monday() {
        // 2024-03-01 is a Friday
        let now = datetime!(2024-03-01 04:00:00 UTC); // Friday noon local
        let reset = next_reset(now, cst(), WindowKind::Weekly);
        assert_eq!(reset, datetime!(2024-03-04 00:00:00 +8));
    }

    #[test]
    fn weekly_reset_from_monday_is_following_monday() {
        // 2024-03-04 00:00 +8 is exactly Monday midnight local
        let now = datetime!(2024-03-03 16:00:00 UTC);
        let reset = next_reset(now, cst(), WindowKind::Weekly);
        assert_eq!(reset, datetime!(2024-03-11 00:00:00 +8));
    }

    #[test]
    fn utc_user_daily_reset() {
        let now = datetime!(2024-03-01 10:00:00 UTC);
        let reset = next_reset(now, UtcOffset::UTC, WindowKind::Daily);
        assert_eq!(reset, datetime!(2024-03-02 00:00:00 UTC));
    }

    #[test]
    fn parses_rfc3339() {
        let ts = parse_store_timestamp("2024-03-01T12:00:00+08:00").unwrap();
        assert_eq!(ts, datetime!(2024-03-01 12:00:00 +8));
    }

    #[test]
    fn parses_postgres_text_cast() {
        let ts = parse_store_timestamp("2024-03-01 12:00:00.123456+08").unwrap();
        assert_eq!(ts.to_offset(UtcOffset::UTC), datetime!(2024-03-01 04:00:00.123456 UTC));
    }

    #[test]
    fn parses_naive_as_utc() {
        let ts = parse_store_timestamp("2024-03-01 12:00:00").unwrap();
        assert_eq!(ts, datetime!(2024-03-01 12:00:00 UTC));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_store_timestamp("not a timestamp").is_err());
        assert!(parse_store_timestamp("").is_err());
    }

    #[test]
    fn offset_clamping() {
        assert_eq!(user_offset(480), UtcOffset::from_whole_seconds(8 * 3600).unwrap());
        assert_eq!(user_offset(100_000), UtcOffset::from_whole_seconds(14 * 3600).unwrap());
        assert_eq!(user_offset(-100_000), UtcOffset::from_whole_seconds(-12 * 3600).unwrap());
    }
}
