use chrono::{NaiveTime, Timelike};

use crate::error::AlarmError;

const TWELVE_HOUR: &str = "%I:%M %p";
const TWENTY_FOUR_HOUR: &str = "%H:%M";

/// Parses an alarm's display time into `(hour, minute)`.
///
/// Accepts "h:mm a" ("7:30 AM") and "HH:mm" ("07:30"). Platform formatters
/// sometimes emit a narrow or non-breaking space before the meridiem, so those
/// are normalized first.
pub fn parse_display_time(raw: &str) -> Result<(u32, u32), AlarmError> {
    let normalized: String = raw
        .trim()
        .chars()
        .map(|c| match c {
            '\u{202F}' | '\u{00A0}' => ' ',
            other => other,
        })
        .collect();

    NaiveTime::parse_from_str(&normalized, TWELVE_HOUR)
        .or_else(|_| NaiveTime::parse_from_str(&normalized, TWENTY_FOUR_HOUR))
        .map(|t| (t.hour(), t.minute()))
        .map_err(|_| AlarmError::ParseFailure(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_formats_parse_to_the_same_time() {
        assert_eq!(parse_display_time("7:30 AM").unwrap(), (7, 30));
        assert_eq!(parse_display_time("07:30").unwrap(), (7, 30));
    }

    #[test]
    fn afternoon_twelve_hour_times_map_to_24h() {
        assert_eq!(parse_display_time("9:05 PM").unwrap(), (21, 5));
        assert_eq!(parse_display_time("12:00 AM").unwrap(), (0, 0));
        assert_eq!(parse_display_time("12:15 pm").unwrap(), (12, 15));
        assert_eq!(parse_display_time("23:59").unwrap(), (23, 59));
    }

    #[test]
    fn narrow_no_break_space_is_accepted() {
        assert_eq!(parse_display_time("6:45\u{202F}AM").unwrap(), (6, 45));
    }

    #[test]
    fn garbage_is_a_parse_failure() {
        assert!(matches!(
            parse_display_time("garbage"),
            Err(AlarmError::ParseFailure(s)) if s == "garbage"
        ));
        assert!(parse_display_time("").is_err());
        assert!(parse_display_time("25:00").is_err());
    }
}
