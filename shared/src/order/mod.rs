//! Order domain model: owner classes, order kinds, line items, the
//! status state machine, and the cancellation-window arithmetic.

mod types;
pub use types::*;

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Remaining cancellation window at `now`.
///
/// Always recomputed from the absolute confirmation timestamp so a
/// suspended or restarted client resumes with the correct value. Never
/// derived from a counted-down integer.
pub fn remaining_window(
    confirmed_at: DateTime<Utc>,
    window: Duration,
    now: DateTime<Utc>,
) -> Duration {
    let elapsed = now.signed_duration_since(confirmed_at);
    let elapsed = match elapsed.to_std() {
        Ok(d) => d,
        // now precedes confirmed_at (clock skew): full window remains
        Err(_) => return window,
    };
    window.saturating_sub(elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    const WINDOW: Duration = Duration::from_secs(300);

    #[test]
    fn test_remaining_counts_from_absolute_timestamp() {
        let confirmed = Utc::now();
        let later = confirmed + TimeDelta::seconds(250);
        assert_eq!(
            remaining_window(confirmed, WINDOW, later),
            Duration::from_secs(50)
        );
    }

    #[test]
    fn test_remaining_clamps_at_zero() {
        let confirmed = Utc::now();
        let later = confirmed + TimeDelta::seconds(301);
        assert_eq!(remaining_window(confirmed, WINDOW, later), Duration::ZERO);
        let much_later = confirmed + TimeDelta::hours(4);
        assert_eq!(
            remaining_window(confirmed, WINDOW, much_later),
            Duration::ZERO
        );
    }

    #[test]
    fn test_remaining_with_clock_skew() {
        let confirmed = Utc::now();
        let earlier = confirmed - TimeDelta::seconds(10);
        assert_eq!(remaining_window(confirmed, WINDOW, earlier), WINDOW);
    }
}
