//! Meeting-window validation against tenant availability rules.

use crate::config::AvailabilityConfig;
use crate::timezone;
use chrono::{Datelike, Duration, NaiveTime, Weekday};
use chrono_tz::Tz;

/// Validate a proposed `[start, end)` window. Returns a human-readable
/// rejection reason, or `None` when the window is bookable.
pub fn validate_schedule(
    start: &str,
    end: &str,
    rules: &AvailabilityConfig,
    tz: Tz,
) -> Option<String> {
    let Some(start_local) = timezone::local_datetime(start, tz) else {
        return Some(format!("the proposed start time '{}' could not be understood", start));
    };
    let Some(end_local) = timezone::local_datetime(end, tz) else {
        return Some(format!("the proposed end time '{}' could not be understood", end));
    };

    if end_local <= start_local {
        return Some("the meeting end must be after its start".to_string());
    }

    let now = timezone::now_in(tz);
    if start_local < now {
        return Some("the proposed time is already in the past".to_string());
    }
    if start_local > now + Duration::days(rules.max_days_ahead) {
        return Some(format!(
            "meetings can only be booked up to {} days ahead",
            rules.max_days_ahead
        ));
    }

    let weekday = weekday_key(start_local.weekday());
    if !rules.weekdays.iter().any(|d| d == weekday) {
        return Some(format!("meetings are not available on {}", weekday_name(start_local.weekday())));
    }

    let day_start = parse_time(&rules.day_start).unwrap_or(NaiveTime::MIN);
    let day_end = parse_time(&rules.day_end)
        .unwrap_or_else(|| NaiveTime::from_hms_opt(23, 59, 59).unwrap());

    let start_time = start_local.time();
    let end_time = end_local.time();
    if start_time < day_start || end_time > day_end || end_local.date_naive() != start_local.date_naive() {
        return Some(format!(
            "meetings must fit between {} and {} on a single day",
            rules.day_start, rules.day_end
        ));
    }

    None
}

fn parse_time(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw.trim(), "%H:%M:%S"))
        .ok()
}

fn weekday_key(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "mon",
        Weekday::Tue => "tue",
        Weekday::Wed => "wed",
        Weekday::Thu => "thu",
        Weekday::Fri => "fri",
        Weekday::Sat => "sat",
        Weekday::Sun => "sun",
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mondays",
        Weekday::Tue => "Tuesdays",
        Weekday::Wed => "Wednesdays",
        Weekday::Thu => "Thursdays",
        Weekday::Fri => "Fridays",
        Weekday::Sat => "Saturdays",
        Weekday::Sun => "Sundays",
    }
}
