//! Human-readable rendering for function listings.

use chrono::{Datelike, NaiveDateTime};

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
const RELATIVE_DAYS: i64 = 3;

pub fn format_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", SIZE_UNITS[unit])
}

/// Describes `then` relative to `now`: "Just now", "10 seconds ago",
/// "1 day from now", falling back to a calendar date past a few days.
pub fn humanize_time(then: NaiveDateTime, now: NaiveDateTime) -> String {
    let delta = now.signed_duration_since(then);
    let in_future = delta.num_seconds() < 0;
    let seconds = delta.num_seconds().abs();

    if seconds == 0 {
        return "Just now".to_string();
    }

    let days = seconds / 86_400;
    if days >= RELATIVE_DAYS {
        return if then.year() == now.year() {
            then.format("%B %e").to_string()
        } else {
            then.format("%B %d, %Y").to_string()
        };
    }

    let amount = if seconds < 60 {
        plural(seconds, "second")
    } else if seconds < 3_600 {
        plural(seconds / 60, "minute")
    } else if seconds < 86_400 {
        plural(seconds / 3_600, "hour")
    } else {
        plural(days, "day")
    };

    if in_future {
        format!("{amount} from now")
    } else {
        format!("{amount} ago")
    }
}

fn plural(count: i64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}
