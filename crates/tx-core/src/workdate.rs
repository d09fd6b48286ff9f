//! Which calendar day an export covers.
//!
//! The previous working day is yesterday, except on Monday where it is the
//! preceding Friday.

use chrono::{Datelike, Duration, Local, NaiveDate, Weekday};

/// Format used by the tracker for `spent_on` and by callback payloads.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Number of dates offered in the date-selection menu.
pub const RECENT_DATES: usize = 5;

/// Previous working day relative to `today`, shifted by `offset_days`.
pub fn resolve_from(today: NaiveDate, offset_days: i64) -> NaiveDate {
    let back = if today.weekday() == Weekday::Mon { 3 } else { 1 };
    today - Duration::days(back) + Duration::days(offset_days)
}

/// Previous working day relative to the local clock.
pub fn resolve(offset_days: i64) -> NaiveDate {
    resolve_from(today(), offset_days)
}

/// `today-1 ... today-count`, newest first.
pub fn recent_dates_from(today: NaiveDate, count: usize) -> Vec<NaiveDate> {
    (1..=count as i64)
        .map(|d| today - Duration::days(d))
        .collect()
}

pub fn recent_dates(count: usize) -> Vec<NaiveDate> {
    recent_dates_from(today(), count)
}

pub fn format_date(d: NaiveDate) -> String {
    d.format(DATE_FORMAT).to_string()
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT).ok()
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn monday_maps_back_to_friday() {
        assert_eq!(resolve_from(d("2024-06-10"), 0), d("2024-06-07"));
    }

    #[test]
    fn other_weekdays_map_to_yesterday() {
        // Tue 2024-06-11 .. Sun 2024-06-16
        for (today, expected) in [
            ("2024-06-11", "2024-06-10"),
            ("2024-06-12", "2024-06-11"),
            ("2024-06-13", "2024-06-12"),
            ("2024-06-14", "2024-06-13"),
            ("2024-06-15", "2024-06-14"),
            ("2024-06-16", "2024-06-15"),
        ] {
            assert_eq!(resolve_from(d(today), 0), d(expected), "today={today}");
        }
    }

    #[test]
    fn offset_shifts_the_resolved_day() {
        for today in ["2024-06-10", "2024-06-12", "2024-01-01"] {
            let base = resolve_from(d(today), 0);
            for offset in [-7, -3, -1, 1, 2] {
                assert_eq!(
                    resolve_from(d(today), offset),
                    base + Duration::days(offset)
                );
            }
        }
    }

    #[test]
    fn monday_offset_crosses_month_boundary() {
        // Mon 2024-07-01 -> Fri 2024-06-28, one more back -> Thu 2024-06-27
        assert_eq!(resolve_from(d("2024-07-01"), -1), d("2024-06-27"));
    }

    #[test]
    fn recent_dates_are_the_five_preceding_days() {
        let got = recent_dates_from(d("2024-06-10"), RECENT_DATES);
        let want: Vec<_> = ["2024-06-09", "2024-06-08", "2024-06-07", "2024-06-06", "2024-06-05"]
            .into_iter()
            .map(d)
            .collect();
        assert_eq!(got, want);
    }

    #[test]
    fn date_format_round_trips_through_text() {
        assert_eq!(format_date(d("2024-06-07")), "2024-06-07");
        assert!(parse_date("07.06.2024").is_none());
    }
}
