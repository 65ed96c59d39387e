//!  Skyfare Crawler
//!
//!  Copyright (C) 2026  Mamy Ratsimbazafy
//!
//!  This program is free software: you can redistribute it and/or modify
//!  it under the terms of the GNU Affero General Public License as published by
//!  the Free Software Foundation, either version 3 of the License, or
//!  (at your option) any later version.
//!
//!  This program is distributed in the hope that it will be useful,
//!  but WITHOUT ANY WARRANTY; without even the implied warranty of
//!  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
//!  GNU Affero General Public License for more details.
//!
//!  You should have received a copy of the GNU Affero General Public License
//!  along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! # Normalization Helpers
//!
//! Small pure functions shared by the response parsers: local-time to UTC
//! tagging, duration arithmetic, and the handful of date/time formats the
//! carrier APIs use.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

/// Tag a carrier-local wall-clock datetime as UTC after applying the
/// airport's known offset. Parsers that do not know the offset pass 0,
/// leaving the local time as a neutral UTC marker.
pub fn local_to_utc(naive: NaiveDateTime, utc_offset_hours: i64) -> DateTime<Utc> {
    (naive - Duration::hours(utc_offset_hours)).and_utc()
}

/// `arrival - departure` in minutes, wrapped into [0, 1440) when the raw
/// delta is negative (next-day arrival expressed in wall-clock times).
pub fn duration_minutes_mod24(
    departure: DateTime<Utc>,
    arrival: DateTime<Utc>,
) -> i64 {
    let delta = (arrival - departure).num_minutes();
    if delta >= 0 { delta } else { delta.rem_euclid(1440) }
}

static ISO_DURATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^PT(?:(\d+)H)?(?:(\d+)M)?$").unwrap());

/// ISO-8601 `PTnHnM` durations to integer minutes.
pub fn parse_iso8601_minutes(s: &str) -> Option<i64> {
    let caps = ISO_DURATION_RE.captures(s.trim())?;
    let hours: i64 = caps.get(1).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    let minutes: i64 = caps.get(2).map_or(0, |m| m.as_str().parse().unwrap_or(0));
    if caps.get(1).is_none() && caps.get(2).is_none() {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// `"HHMM"` or `"HH:MM"` to a time of day.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let cleaned: String = s.chars().filter(|c| c.is_ascii_digit()).collect();
    if cleaned.len() != 4 {
        return None;
    }
    let hour: u32 = cleaned[..2].parse().ok()?;
    let minute: u32 = cleaned[2..].parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// `"YYYYMMDD"` to a date.
pub fn parse_yyyymmdd(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y%m%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn local_times_shift_by_offset() {
        let naive = NaiveDate::from_ymd_opt(2026, 3, 15)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        // 09:00 KST == 00:00 UTC
        let utc = local_to_utc(naive, 9);
        assert_eq!(utc, Utc.with_ymd_and_hms(2026, 3, 15, 0, 0, 0).unwrap());
        // Offset 0 keeps the wall clock as a neutral marker.
        assert_eq!(
            local_to_utc(naive, 0),
            Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn durations_wrap_across_midnight() {
        let dep = Utc.with_ymd_and_hms(2026, 3, 15, 23, 30, 0).unwrap();
        let arr = Utc.with_ymd_and_hms(2026, 3, 15, 1, 10, 0).unwrap();
        // Wall-clock arrival before departure: 1h40m, not negative.
        assert_eq!(duration_minutes_mod24(dep, arr), 100);

        let arr_next = Utc.with_ymd_and_hms(2026, 3, 16, 1, 10, 0).unwrap();
        assert_eq!(duration_minutes_mod24(dep, arr_next), 100);
    }

    #[test]
    fn iso8601_durations() {
        assert_eq!(parse_iso8601_minutes("PT7H25M"), Some(445));
        assert_eq!(parse_iso8601_minutes("PT45M"), Some(45));
        assert_eq!(parse_iso8601_minutes("PT2H"), Some(120));
        assert_eq!(parse_iso8601_minutes("P1DT2H"), None);
        assert_eq!(parse_iso8601_minutes("garbage"), None);
    }

    #[test]
    fn hhmm_variants() {
        assert_eq!(parse_hhmm("0830"), NaiveTime::from_hms_opt(8, 30, 0));
        assert_eq!(parse_hhmm("08:30"), NaiveTime::from_hms_opt(8, 30, 0));
        assert_eq!(parse_hhmm("2460"), None);
        assert_eq!(parse_hhmm(""), None);
    }

    #[test]
    fn yyyymmdd_dates() {
        assert_eq!(
            parse_yyyymmdd("20260301"),
            NaiveDate::from_ymd_opt(2026, 3, 1)
        );
        assert_eq!(parse_yyyymmdd("2026-03-01"), None);
    }
}
