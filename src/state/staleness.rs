use chrono::{DateTime, Duration, Utc};

/// Default retention window for unresponsive endpoints
pub const STALENESS_WINDOW_DAYS: i64 = 90;

/// Dual staleness condition shared by summary and detail endpoints
///
/// An entry is eligible for pruning only when its last confirmed success (or
/// first sighting, if it never succeeded) AND its last sighting are both
/// strictly older than `window` at `now`. A window reaching past the start
/// of representable time never makes anything stale.
pub fn is_stale(
    reference: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    now: DateTime<Utc>,
    window: Duration,
) -> bool {
    let Some(cutoff) = now.checked_sub_signed(window) else {
        return false;
    };
    reference < cutoff && last_seen < cutoff
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_window_boundary_is_exclusive() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let window = Duration::days(STALENESS_WINDOW_DAYS);
        let exactly = now - window;
        let beyond = exactly - Duration::seconds(1);

        assert!(!is_stale(exactly, exactly, now, window));
        assert!(is_stale(beyond, beyond, now, window));
        assert!(!is_stale(beyond, exactly, now, window));
        assert!(!is_stale(exactly, beyond, now, window));
    }

    #[test]
    fn test_oversized_window_never_stale() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let ancient = DateTime::<Utc>::MIN_UTC;
        assert!(!is_stale(ancient, ancient, now, Duration::MAX));
    }
}
