// Time/MJD service: conversion between wall-clock instants and Modified
// Julian Date, plus the UT-formatted strings FITS headers need.
//
// The day-to-MJD step follows Hatcher's algorithm (D. A. Hatcher, "Simple
// Formulae for Julian Day Numbers and Calendar Dates", Quarterly Journal
// of the RAS, Vol 25 No 1, 1984), the same algorithm the original
// NGAT_Astro_Year_Month_Day_To_MJD used. The day-fraction step takes an
// explicit leap-second correction in {-1, 0, +1} rather than consulting
// an online leap-second table, per the open question in the design.

use chrono::{DateTime, Datelike, Timelike, Utc};
use std::time::SystemTime;

use crate::error::invariant_violation;
use canonical_error::CanonicalError;

/// Converts a Gregorian calendar date to the Modified Julian Date at
/// 00:00 UT on that day.
pub fn year_month_day_to_mjd(year: i32, month: u32, day: u32) -> Result<f64, CanonicalError> {
    if year < -4712 {
        return Err(invariant_violation(&format!("year {} out of range", year)));
    }
    if !(1..=12).contains(&month) {
        return Err(invariant_violation(&format!("month {} out of range (1..12)", month)));
    }
    let days_in_month = days_in_month(year, month);
    if day < 1 || day > days_in_month {
        return Err(invariant_violation(
            &format!("day {} out of range (1..{})", day, days_in_month)));
    }

    // a_dash: march-centred year (one less than the calendar year in
    // January/February).
    let a_dash = year as f64 - ((12 - month as i64) / 10) as f64;
    // m_dash: march-centred month number.
    let m_dash = (month as i64 + 9) % 12;

    let y = (365.25 * (a_dash + 4712.0)).floor() as i64;
    let d1 = 30.6 * (m_dash as f64) + 0.5;
    let d = d1.floor() as i64;
    let n = y + d + day as i64 + 59;

    let g1 = a_dash / 100.0;
    let g2 = (g1 + 49.0).floor() as i64;
    let g3 = (g2 as f64) * 0.75;
    let g = g3.floor() as i64 - 38;

    Ok(((n - g) as f64 - 2_400_000.5).floor())
}

fn days_in_month(year: i32, month: u32) -> u32 {
    const DAYS: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    if month == 2 && is_leap_year(year) {
        29
    } else {
        DAYS[(month - 1) as usize]
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0) && (year % 100 != 0 || year % 400 == 0)
}

/// Converts a time-of-day to the fraction of a day elapsed, allowing for
/// a day whose final minute has 59, 60, or 61 seconds.
pub fn hour_minute_second_to_day_fraction(
    hour: u32, minute: u32, second: u32, nanos: u32,
    leap_second_correction: i8,
) -> Result<f64, CanonicalError> {
    if hour > 23 {
        return Err(invariant_violation(&format!("hour {} out of range (0..23)", hour)));
    }
    if minute > 59 {
        return Err(invariant_violation(&format!("minute {} out of range (0..59)", minute)));
    }
    if second > 61 {
        return Err(invariant_violation(&format!("second {} out of range (0..61)", second)));
    }
    if !(-1..=1).contains(&leap_second_correction) {
        return Err(invariant_violation(
            &format!("leap second correction {} out of range (-1..1)", leap_second_correction)));
    }
    let seconds_in_day = 86400.0 + leap_second_correction as f64;
    let elapsed_seconds =
        (hour as f64) * 3600.0 + (minute as f64) * 60.0 + second as f64 + (nanos as f64) / 1.0e9;
    Ok(elapsed_seconds / seconds_in_day)
}

/// Converts a wall-clock instant to Modified Julian Date.
/// `leap_second_correction` is normally 0; pass 1 or -1 only when a
/// positive or negative leap second is known to occur on this UTC day.
pub fn timespec_to_mjd(
    time: SystemTime, leap_second_correction: i8,
) -> Result<f64, CanonicalError> {
    let dt: DateTime<Utc> = time.into();
    let mjd_at_midnight =
        year_month_day_to_mjd(dt.year(), dt.month(), dt.day())?;
    let day_fraction = hour_minute_second_to_day_fraction(
        dt.hour(), dt.minute(), dt.second(), dt.timestamp_subsec_nanos(),
        leap_second_correction)?;
    Ok(mjd_at_midnight + day_fraction)
}

/// Formats a UTC instant as `HH:MM:SS.sss`, for the `UTSTART` FITS card.
pub fn format_utstart(time: SystemTime) -> String {
    let dt: DateTime<Utc> = time.into();
    format!("{:02}:{:02}:{:02}.{:03}",
            dt.hour(), dt.minute(), dt.second(),
            dt.timestamp_subsec_millis())
}

/// Formats a UTC instant as `YYYY-MM-DDTHH:MM:SS.sss`, for the
/// `DATE-OBS` FITS card.
pub fn format_date_obs(time: SystemTime) -> String {
    let dt: DateTime<Utc> = time.into();
    format!("{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}",
            dt.year(), dt.month(), dt.day(),
            dt.hour(), dt.minute(), dt.second(),
            dt.timestamp_subsec_millis())
}

/// The integer `yyyymmdd` "night date" for an instant: the observing
/// night is the 24h period starting at local noon, but this server
/// operates purely in UT, so the convention is: hours 0-11 UT of day D
/// belong to night D-1. Concretely: subtract 12 hours before breaking
/// the instant into calendar fields.
pub fn night_date(time: SystemTime) -> u32 {
    let dt: DateTime<Utc> = time.into();
    let shifted = dt - chrono::Duration::hours(12);
    (shifted.year() as u32) * 10_000 + shifted.month() * 100 + shifted.day()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::time::Duration;

    #[test]
    fn mjd_epoch_reference() {
        // 1858-11-17 00:00 UT is MJD 0 by definition.
        let mjd = year_month_day_to_mjd(1858, 11, 17).unwrap();
        assert_abs_diff_eq!(mjd, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn mjd_known_date() {
        // 2000-01-01 00:00 UT is MJD 51544.
        let mjd = year_month_day_to_mjd(2000, 1, 1).unwrap();
        assert_abs_diff_eq!(mjd, 51544.0, epsilon = 1e-9);
    }

    #[test]
    fn mjd_rejects_bad_month() {
        assert!(year_month_day_to_mjd(2024, 13, 1).is_err());
    }

    #[test]
    fn mjd_rejects_bad_day_for_february() {
        assert!(year_month_day_to_mjd(2023, 2, 29).is_err());
        assert!(year_month_day_to_mjd(2024, 2, 29).is_ok());
    }

    #[test]
    fn day_fraction_noon_is_half() {
        let frac = hour_minute_second_to_day_fraction(12, 0, 0, 0, 0).unwrap();
        assert_abs_diff_eq!(frac, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn day_fraction_with_positive_leap_second() {
        // 23:59:60.5 on a day with one extra leap second: the day has
        // 86401 seconds, and we're 86400.5s into it.
        let frac = hour_minute_second_to_day_fraction(23, 59, 60, 500_000_000, 1).unwrap();
        assert_abs_diff_eq!(frac, 86400.5 / 86401.0, epsilon = 1e-12);
    }

    #[test]
    fn timespec_to_mjd_monotonic() {
        let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let t1 = t0 + Duration::from_secs(3600);
        let mjd0 = timespec_to_mjd(t0, 0).unwrap();
        let mjd1 = timespec_to_mjd(t1, 0).unwrap();
        assert!(mjd1 > mjd0);
        assert_abs_diff_eq!(mjd1 - mjd0, 1.0 / 24.0, epsilon = 1e-6);
    }

    #[test]
    fn night_date_before_noon_belongs_to_previous_day() {
        // 2024-03-15 05:00 UT belongs to night 20240314.
        let t = DateTime::parse_from_rfc3339("2024-03-15T05:00:00Z").unwrap();
        let nd = night_date(t.with_timezone(&Utc).into());
        assert_eq!(nd, 20240314);
    }

    #[test]
    fn night_date_after_noon_belongs_to_same_day() {
        let t = DateTime::parse_from_rfc3339("2024-03-15T13:00:00Z").unwrap();
        let nd = night_date(t.with_timezone(&Utc).into());
        assert_eq!(nd, 20240315);
    }
}
