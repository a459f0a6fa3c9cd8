//! CPU-time and duration parsing for sacct output.

use once_cell::sync::Lazy;
use regex::Regex;

static CPU_TIME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^((?P<days>\d+)-)?((?P<hours>\d+):)?(?P<mins>\d+):(?P<secs>\d+)\.(?P<usec>\d+)$")
        .expect("cpu time regex")
});

/// Convert a sacct TotalCPU string ("[D-][H:]M:S.ff") into microseconds.
///
/// Returns None when the string does not match the format, e.g. for the
/// empty TotalCPU of a job that never ran a step.
pub fn usec_from_str(time_str: &str) -> Option<u64> {
    let caps = CPU_TIME_RE.captures(time_str.trim())?;
    let group = |name: &str| {
        caps.name(name)
            .map(|m| m.as_str().parse::<u64>().unwrap_or(0))
            .unwrap_or(0)
    };
    let mut usec = group("usec");
    usec += group("secs") * 1_000_000;
    usec += group("mins") * 1_000_000 * 60;
    usec += group("hours") * 1_000_000 * 3600;
    usec += group("days") * 1_000_000 * 86400;
    Some(usec)
}

/// Format a number of seconds as "D-HH:MM:SS" (or "HH:MM:SS" under a day),
/// matching the wallclock rendering in the e-mail templates.
pub fn format_duration(seconds: u64) -> String {
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usec_from_str() {
        // 4 days, 3 hours, 2 minutes
        assert_eq!(usec_from_str("4-3:2:0.0"), Some(356_520_000_000));
        assert_eq!(usec_from_str("00:00.123"), Some(123));
        assert_eq!(usec_from_str("1:30:00.0"), Some(5_400_000_000));
        assert_eq!(usec_from_str("02:15.5"), Some(135_000_005));
    }

    #[test]
    fn test_usec_from_str_invalid() {
        assert_eq!(usec_from_str(""), None);
        assert_eq!(usec_from_str("INVALID"), None);
        // no fractional part
        assert_eq!(usec_from_str("1:00"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00:00");
        assert_eq!(format_duration(5400), "01:30:00");
        assert_eq!(format_duration(90061), "1-01:01:01");
    }
}
