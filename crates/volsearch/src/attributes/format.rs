//! Display strings for attribute values.

use std::fmt;

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};

/// Shown in place of a size that is unknown or not applicable.
pub const SIZE_PLACEHOLDER: &str = "—";
/// Shown in place of a date while its fetch is in flight.
pub const DATE_PLACEHOLDER: &str = "Fetching...";

const DATE_FORMAT: &str = "%b %d, %Y at %I:%M %p";

/// Decimal units, one decimal below 10 for MB and GB. The unit is chosen
/// after rounding, so nothing renders as `1000 MB`.
pub fn human_size(bytes: u64) -> String {
    match bytes {
        0..=999 => format!("{bytes}  B"),
        1_000..=999_999 => format!("{} KB", bytes / 1_000),
        _ => {
            let megabytes = bytes as f64 / 1e6;
            if megabytes.round() < 1_000.0 {
                scaled(megabytes, "MB")
            } else {
                scaled(bytes as f64 / 1e9, "GB")
            }
        }
    }
}

fn scaled(value: f64, unit: &str) -> String {
    let tenths = (value * 10.0).round() / 10.0;
    if tenths < 10.0 {
        format!("{tenths:.1} {unit}")
    } else {
        format!("{} {unit}", value.round() as u64)
    }
}

/// `Feb 03, 2025 at 09:41 AM` in the timezone of `date`.
pub fn format_date<Tz>(date: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    date.format(DATE_FORMAT).to_string()
}

pub fn format_local_date(date: DateTime<Utc>) -> String {
    format_date(&date.with_timezone(&Local))
}

pub fn iso_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_use_decimal_units() {
        assert_eq!(human_size(0), "0  B");
        assert_eq!(human_size(999), "999  B");
        assert_eq!(human_size(1_000), "1 KB");
        assert_eq!(human_size(999_999), "999 KB");
        assert_eq!(human_size(1_500_000), "1.5 MB");
        assert_eq!(human_size(12_600_000), "13 MB");
        assert_eq!(human_size(2_340_000_000), "2.3 GB");
        assert_eq!(human_size(250_000_000_000), "250 GB");
    }

    #[test]
    fn units_are_chosen_after_rounding() {
        assert_eq!(human_size(999_999_999), "1.0 GB");
        assert_eq!(human_size(999_499_999), "999 MB");
        assert_eq!(human_size(9_960_000), "10 MB");
        assert_eq!(human_size(9_940_000), "9.9 MB");
        assert_eq!(human_size(9_960_000_000), "10 GB");
    }

    #[test]
    fn dates_render_in_display_and_iso_forms() {
        let date = Utc.with_ymd_and_hms(2025, 2, 3, 21, 41, 5).unwrap();
        assert_eq!(format_date(&date), "Feb 03, 2025 at 09:41 PM");
        assert_eq!(iso_date(date), "2025-02-03T21:41:05Z");
    }
}
