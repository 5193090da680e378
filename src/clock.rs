//! Wall-clock view of an instant in the reference timezone (America/New_York).
//!
//! Every scheduling decision reads these fields instead of the server's local
//! time, so a UTC host and an ET host make identical decisions.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike, Utc,
};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

pub const ZONE: Tz = New_York;

/// Civil-time fields of one instant in ET.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EtFields {
    pub hour: u32,
    pub minute: u32,
    pub date: NaiveDate,
    /// 0 = Sunday .. 6 = Saturday
    pub weekday: u32,
}

pub fn et_fields(instant: DateTime<Utc>) -> EtFields {
    let local = instant.with_timezone(&ZONE);
    EtFields {
        hour: local.hour(),
        minute: local.minute(),
        date: local.date_naive(),
        weekday: local.weekday().num_days_from_sunday(),
    }
}

pub fn et_hour(instant: DateTime<Utc>) -> u32 {
    et_fields(instant).hour
}

pub fn et_minute(instant: DateTime<Utc>) -> u32 {
    et_fields(instant).minute
}

/// ISO calendar date (YYYY-MM-DD) in ET.
pub fn et_date_string(instant: DateTime<Utc>) -> String {
    et_fields(instant).date.format("%Y-%m-%d").to_string()
}

pub fn et_weekday(instant: DateTime<Utc>) -> u32 {
    et_fields(instant).weekday
}

pub fn is_weekday(instant: DateTime<Utc>) -> bool {
    is_weekday_date(et_fields(instant).date)
}

pub fn is_weekday_date(date: NaiveDate) -> bool {
    !matches!(date.weekday().num_days_from_sunday(), 0 | 6)
}

/// The ET instant for a civil date and time, tagged with the offset in force then.
///
/// Ambiguous times (fall-back hour) resolve to the earlier instant. Times inside a
/// spring-forward gap resolve to the first valid minute after the gap.
pub fn local_at(date: NaiveDate, hour: u32, minute: u32, second: u32) -> DateTime<FixedOffset> {
    let time = NaiveTime::from_hms_opt(hour, minute, second).unwrap_or(NaiveTime::MIN);
    let mut naive = NaiveDateTime::new(date, time);
    // A DST gap never exceeds one hour in this zone; the bound keeps the loop finite.
    for _ in 0..=60 {
        match ZONE.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt.fixed_offset(),
            LocalResult::Ambiguous(earliest, _) => return earliest.fixed_offset(),
            LocalResult::None => naive += Duration::minutes(1),
        }
    }
    // Unreachable for America/New_York; fall back to the UTC reading.
    Utc.from_utc_datetime(&naive).fixed_offset()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn spring_forward_hours() {
        assert_eq!(et_hour(utc(2024, 3, 9, 14, 0)), 9);
        assert_eq!(et_hour(utc(2024, 3, 11, 14, 0)), 10);
    }

    #[test]
    fn fall_back_hours() {
        assert_eq!(et_hour(utc(2024, 11, 2, 13, 0)), 9);
        assert_eq!(et_hour(utc(2024, 11, 4, 13, 0)), 8);
    }

    #[test]
    fn transition_day_itself() {
        // 2024-03-10 06:59Z is 01:59 EST, 07:00Z is 03:00 EDT.
        assert_eq!(et_hour(utc(2024, 3, 10, 6, 59)), 1);
        assert_eq!(et_hour(utc(2024, 3, 10, 7, 0)), 3);
        // 2024-11-03 05:30Z is 01:30 EDT, 06:30Z is 01:30 EST.
        assert_eq!(et_hour(utc(2024, 11, 3, 5, 30)), 1);
        assert_eq!(et_hour(utc(2024, 11, 3, 6, 30)), 1);
    }

    #[test]
    fn minute_and_date_cross_midnight() {
        // 04:01Z on Jan 16 is still Jan 15 23:01 EST.
        let t = utc(2024, 1, 16, 4, 1);
        assert_eq!(et_minute(t), 1);
        assert_eq!(et_date_string(t), "2024-01-15");
        assert_eq!(et_date_string(utc(2024, 1, 16, 5, 1)), "2024-01-16");
    }

    #[test]
    fn weekday_across_dst_boundaries() {
        // Fri Mar 8, Sat Mar 9, Sun Mar 10, Mon Mar 11 2024 at local noon.
        assert!(is_weekday(utc(2024, 3, 8, 17, 0)));
        assert!(!is_weekday(utc(2024, 3, 9, 17, 0)));
        assert!(!is_weekday(utc(2024, 3, 10, 16, 0)));
        assert!(is_weekday(utc(2024, 3, 11, 16, 0)));
        // Sat Nov 2, Sun Nov 3, Mon Nov 4 2024.
        assert!(!is_weekday(utc(2024, 11, 2, 16, 0)));
        assert!(!is_weekday(utc(2024, 11, 3, 17, 0)));
        assert!(is_weekday(utc(2024, 11, 4, 17, 0)));
        // Late Friday evening ET is already Saturday in UTC.
        assert!(is_weekday(utc(2024, 3, 9, 3, 0)));
        assert_eq!(et_weekday(utc(2024, 3, 9, 3, 0)), 5);
    }

    #[test]
    fn local_at_tags_offsets() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
        assert_eq!(local_at(d, 22, 0, 0).offset().local_minus_utc(), -5 * 3600);
        let d = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(local_at(d, 23, 59, 59).offset().local_minus_utc(), -4 * 3600);
    }

    #[test]
    fn local_at_skips_gap_and_takes_earlier_in_overlap() {
        let gap = local_at(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(), 2, 30, 0);
        assert_eq!(gap.with_timezone(&Utc), utc(2024, 3, 10, 7, 0));
        let overlap = local_at(NaiveDate::from_ymd_opt(2024, 11, 3).unwrap(), 1, 30, 0);
        assert_eq!(overlap.with_timezone(&Utc), utc(2024, 11, 3, 5, 30));
    }
}
