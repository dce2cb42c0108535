use chrono::{DateTime, Utc};

/// Compact duration such as `3d 2h`, `4m 10s` or `12s`.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (days, hours, minutes, seconds) = (
        secs / 86_400,
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
    );
    if days > 0 {
        format!("{days}d {hours}h")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

pub fn relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (ts - now).num_seconds();
    match delta {
        0 => "just now".to_string(),
        d if d > 0 => format!("in {}", format_duration(d)),
        d => format!("{} ago", format_duration(-d)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn picks_two_most_significant_units() {
        assert_eq!(format_duration(12), "12s");
        assert_eq!(format_duration(250), "4m 10s");
        assert_eq!(format_duration(7_500), "2h 5m");
        assert_eq!(format_duration(266_400), "3d 2h");
        assert_eq!(format_duration(-5), "0s");
    }

    #[test]
    fn relative_marks_direction() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(relative(now + Duration::seconds(130), now), "in 2m 10s");
        assert_eq!(relative(now - Duration::seconds(300), now), "5m 0s ago");
        assert_eq!(relative(now, now), "just now");
    }
}
