//! Lookup tables and labels used when rendering a forecast.

use chrono::NaiveDate;

/// Icon for a WMO weather code, `None` for codes the table does not know.
pub fn weather_icon(code: u8) -> Option<&'static str> {
    let icon = match code {
        0 => "☀️",
        1 => "🌤",
        2 => "⛅️",
        3 => "☁️",
        45 | 48 => "🌫",
        51 | 56 | 61 | 66 | 80 => "🌦",
        53 | 55 | 57 | 63 | 65 | 67 | 81 | 82 => "🌧",
        71 | 73 | 75 | 77 | 85 | 86 => "🌨",
        95 => "🌩",
        96 | 99 => "⛈",
        _ => return None,
    };
    Some(icon)
}

/// "Today" for the first entry, short weekday name otherwise.
pub fn day_label(index: usize, date: NaiveDate) -> String {
    if index == 0 {
        "Today".to_string()
    } else {
        date.format("%a").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_have_icons() {
        assert_eq!(weather_icon(0), Some("☀️"));
        assert_eq!(weather_icon(48), Some("🌫"));
        assert_eq!(weather_icon(80), Some("🌦"));
        assert_eq!(weather_icon(82), Some("🌧"));
        assert_eq!(weather_icon(86), Some("🌨"));
        assert_eq!(weather_icon(99), Some("⛈"));
    }

    #[test]
    fn unknown_code_has_no_icon() {
        assert_eq!(weather_icon(4), None);
        assert_eq!(weather_icon(200), None);
    }

    #[test]
    fn first_day_is_today_others_are_weekdays() {
        // 2024-05-01 was a Wednesday.
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date");
        assert_eq!(day_label(0, date), "Today");
        assert_eq!(day_label(1, date), "Wed");
        assert_eq!(day_label(3, date.succ_opt().expect("valid date")), "Thu");
    }
}
