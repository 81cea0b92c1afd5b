//! Date-format tokens and duration strings used by the time directives.
//!
//! Formats use a token mini-language instead of strftime: `yyyy` year,
//! `MM` month, `dd` day, `HH` 24-hour, `hh` 12-hour, `mm` minute,
//! `ss` second, `sss` millisecond. Everything else is copied through.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeDelta, TimeZone, Timelike};
use regex::{Captures, Regex};

pub const DEFAULT_DATE_FORMAT: &str = "yyyy-MM-dd HH:mm:ss.sss";
pub const DEFAULT_TIME_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";

static TOKENS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i:yyyy)|MM|(?i:dd)|HH|hh|mm|(?i:sss)|(?i:ss)").ok());

#[must_use]
pub fn format_date(t: &DateTime<Local>, layout: &str) -> String {
    let Some(re) = TOKENS.as_ref() else {
        return layout.to_string();
    };
    re.replace_all(layout, |caps: &Captures<'_>| {
        let token = &caps[0];
        match token {
            "MM" => format!("{:02}", t.month()),
            "HH" => format!("{:02}", t.hour()),
            "hh" => format!("{:02}", t.hour12().1),
            "mm" => format!("{:02}", t.minute()),
            _ if token.len() == 4 => format!("{:04}", t.year()),
            _ if token.eq_ignore_ascii_case("dd") => format!("{:02}", t.day()),
            _ if token.len() == 3 => format!("{:03}", t.timestamp_subsec_millis()),
            _ => format!("{:02}", t.second()),
        }
    })
    .into_owned()
}

/// Parses `300ms`, `-1.5h`, `2h45m`, `7d`. A bare `0` (or empty input) is zero.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn parse_duration(input: &str) -> Option<TimeDelta> {
    let s = input.trim();
    if s.is_empty() || s == "0" {
        return Some(TimeDelta::zero());
    }
    let (negative, mut rest) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };
    if rest.is_empty() {
        return None;
    }

    let mut total_nanos: f64 = 0.0;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let value: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3_600e9,
            "d" => 86_400e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += value * nanos_per_unit;
    }

    let nanos = if negative { -total_nanos } else { total_nanos };
    Some(TimeDelta::nanoseconds(nanos as i64))
}

/// Truncates a local time down to a multiple of `step`, measured on the wall clock.
#[must_use]
pub fn truncate(t: DateTime<Local>, step: TimeDelta) -> DateTime<Local> {
    let Some(step_nanos) = step.num_nanoseconds().filter(|n| *n > 0) else {
        return t;
    };
    let naive = t.naive_local();
    let Some(nanos) = naive.and_utc().timestamp_nanos_opt() else {
        return t;
    };
    let floored = nanos - nanos.rem_euclid(step_nanos);
    let truncated: NaiveDateTime = DateTime::from_timestamp_nanos(floored).naive_utc();
    Local
        .from_local_datetime(&truncated)
        .earliest()
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn formats_tokens() {
        let t = at(2024, 3, 5, 14, 7, 9) + TimeDelta::milliseconds(42);
        assert_eq!(format_date(&t, "yyyy-MM-dd"), "2024-03-05");
        assert_eq!(format_date(&t, "HH:mm:ss.sss"), "14:07:09.042");
        assert_eq!(format_date(&t, "hh:mm"), "02:07");
        assert_eq!(format_date(&t, "YYYY/DD"), "2024/05");
    }

    #[test]
    fn literal_text_passes_through() {
        let t = at(2024, 1, 2, 3, 4, 5);
        assert_eq!(format_date(&t, "day dd at HH"), "day 02 at 03");
    }

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("300ms"), Some(TimeDelta::milliseconds(300)));
        assert_eq!(parse_duration("-24h"), Some(TimeDelta::hours(-24)));
        assert_eq!(parse_duration("1h30m"), Some(TimeDelta::minutes(90)));
        assert_eq!(parse_duration("1.5s"), Some(TimeDelta::milliseconds(1500)));
        assert_eq!(parse_duration("2d"), Some(TimeDelta::days(2)));
        assert_eq!(parse_duration(""), Some(TimeDelta::zero()));
        assert_eq!(parse_duration("10"), None);
        assert_eq!(parse_duration("abc"), None);
    }

    #[test]
    fn truncates_to_step() {
        let t = at(2024, 3, 5, 14, 37, 9);
        assert_eq!(truncate(t, TimeDelta::hours(1)), at(2024, 3, 5, 14, 0, 0));
        assert_eq!(truncate(t, TimeDelta::minutes(15)), at(2024, 3, 5, 14, 30, 0));
        assert_eq!(truncate(t, TimeDelta::days(1)), at(2024, 3, 5, 0, 0, 0));
        assert_eq!(truncate(t, TimeDelta::zero()), t);
    }
}
