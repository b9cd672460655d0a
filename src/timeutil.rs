// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Local-day to UTC window conversion.
//!
//! All stored times are UTC; only the API boundary speaks local days. A date
//! query carries `date_str=YYYY-MM-DD` plus an optional `tz` (IANA name such
//! as `Europe/Berlin`, or a numeric `+0200` offset). The zone comes from the
//! caller so server-TZ drift cannot skew the window.

use chrono::{DateTime, Duration, FixedOffset, LocalResult, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{NvrError, Result};

/// Caller-supplied time zone.
#[derive(Debug, Clone, Copy)]
pub enum TzSpec {
    Named(Tz),
    Fixed(FixedOffset),
}

impl TzSpec {
    /// Parse an IANA name (`Europe/Berlin`) or a `±HHMM` / `±HH:MM` offset.
    /// `None` on anything else.
    pub fn parse(s: &str) -> Option<TzSpec> {
        if let Ok(tz) = s.parse::<Tz>() {
            return Some(TzSpec::Named(tz));
        }
        parse_offset(s).map(TzSpec::Fixed)
    }

    /// The server's local zone, used when the caller sends none.
    pub fn server_local() -> TzSpec {
        TzSpec::Fixed(*chrono::Local::now().offset())
    }
}

fn parse_offset(s: &str) -> Option<FixedOffset> {
    let (sign, rest) = match s.as_bytes().first()? {
        b'+' => (1i32, &s[1..]),
        b'-' => (-1i32, &s[1..]),
        _ => return None,
    };
    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let mins: i32 = digits[2..].parse().ok()?;
    if hours > 14 || mins > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + mins * 60))
}

/// Convert a local calendar day into a half-open UTC interval `[start, end)`.
///
/// Across DST transitions the interval is 23 or 25 hours long; a local
/// midnight that does not exist (spring-forward gap) resolves to the earliest
/// valid instant after it.
pub fn local_day_utc_range(date_str: &str, tz: &TzSpec) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|e| NvrError::Validation(format!("invalid date_str '{date_str}': {e}")))?;
    let next = date
        .succ_opt()
        .ok_or_else(|| NvrError::Validation("date out of range".into()))?;
    Ok((day_start_utc(date, tz)?, day_start_utc(next, tz)?))
}

fn day_start_utc(date: NaiveDate, tz: &TzSpec) -> Result<DateTime<Utc>> {
    let naive = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| NvrError::Validation("date out of range".into()))?;
    let resolved = match tz {
        TzSpec::Named(z) => {
            resolve_local(z.from_local_datetime(&naive)).map(|dt| dt.with_timezone(&Utc))
        }
        TzSpec::Fixed(off) => {
            resolve_local(off.from_local_datetime(&naive)).map(|dt| dt.with_timezone(&Utc))
        }
    };
    resolved.ok_or_else(|| NvrError::Validation("date not representable in zone".into()))
}

fn resolve_local<T: TimeZone>(res: LocalResult<DateTime<T>>) -> Option<DateTime<T>> {
    match res {
        LocalResult::Single(dt) => Some(dt),
        // Fall-back overlap: take the first occurrence.
        LocalResult::Ambiguous(first, _) => Some(first),
        // Spring-forward gap: midnight was skipped, probe forward an hour.
        LocalResult::None => None,
    }
}

/// Like [`local_day_utc_range`] but tolerates a skipped local midnight by
/// probing forward in 15-minute steps (some zones shift at 00:00).
pub fn local_day_utc_range_lenient(
    date_str: &str,
    tz: &TzSpec,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    match local_day_utc_range(date_str, tz) {
        Ok(r) => Ok(r),
        Err(_) => {
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                .map_err(|e| NvrError::Validation(format!("invalid date_str '{date_str}': {e}")))?;
            let start = probe_day_start(date, tz)?;
            let next = date
                .succ_opt()
                .ok_or_else(|| NvrError::Validation("date out of range".into()))?;
            let end = probe_day_start(next, tz)?;
            Ok((start, end))
        }
    }
}

fn probe_day_start(date: NaiveDate, tz: &TzSpec) -> Result<DateTime<Utc>> {
    for quarter in 0..8 {
        let naive = date.and_hms_opt(0, 0, 0).unwrap_or_default()
            + Duration::minutes(15 * quarter);
        let resolved = match tz {
            TzSpec::Named(z) => {
                resolve_local(z.from_local_datetime(&naive)).map(|dt| dt.with_timezone(&Utc))
            }
            TzSpec::Fixed(off) => {
                resolve_local(off.from_local_datetime(&naive)).map(|dt| dt.with_timezone(&Utc))
            }
        };
        if let Some(dt) = resolved {
            return Ok(dt);
        }
    }
    Err(NvrError::Validation("date not representable in zone".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utc_day_is_24h() {
        let tz = TzSpec::parse("+0000").unwrap();
        let (start, end) = local_day_utc_range("2026-03-10", &tz).unwrap();
        assert_eq!((end - start).num_hours(), 24);
        assert_eq!(start.to_rfc3339(), "2026-03-10T00:00:00+00:00");
    }

    #[test]
    fn fixed_offset_shifts_window() {
        let tz = TzSpec::parse("+0200").unwrap();
        let (start, _) = local_day_utc_range("2026-03-10", &tz).unwrap();
        assert_eq!(start.to_rfc3339(), "2026-03-09T22:00:00+00:00");
    }

    #[test]
    fn dst_spring_forward_day_is_23h() {
        // Europe/Berlin 2026-03-29: clocks jump 02:00 → 03:00.
        let tz = TzSpec::parse("Europe/Berlin").unwrap();
        let (start, end) = local_day_utc_range_lenient("2026-03-29", &tz).unwrap();
        assert_eq!((end - start).num_hours(), 23);
    }

    #[test]
    fn dst_fall_back_day_is_25h() {
        // Europe/Berlin 2026-10-25: clocks fall 03:00 → 02:00.
        let tz = TzSpec::parse("Europe/Berlin").unwrap();
        let (start, end) = local_day_utc_range_lenient("2026-10-25", &tz).unwrap();
        assert_eq!((end - start).num_hours(), 25);
    }

    #[test]
    fn rejects_garbage() {
        assert!(TzSpec::parse("not-a-zone").is_none());
        let tz = TzSpec::parse("+0000").unwrap();
        assert!(local_day_utc_range("2026-13-40", &tz).is_err());
    }
}
