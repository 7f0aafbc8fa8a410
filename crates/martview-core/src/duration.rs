//! Human-friendly duration strings ("500ms", "30s", "10m", "24h", "7d").

use std::time::Duration;

/// Parse a duration string. A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().and_then(|m| scaled(m, 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().and_then(|h| scaled(h, 3600))
    } else if let Some(days) = s.strip_suffix('d') {
        days.trim().parse::<u64>().ok().and_then(|d| scaled(d, 86_400))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// `None` when the value does not fit in `u64` seconds.
fn scaled(count: u64, unit_secs: u64) -> Option<Duration> {
    count.checked_mul(unit_secs).map(Duration::from_secs)
}
