//! Cancellation window countdown
//!
//! The displayed remaining time is always recomputed from the absolute
//! confirmation timestamp, once per tick. A client that suspends for a
//! minute and resumes shows the true remaining window, never a stale
//! counted-down integer.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Ticking view of an order's remaining cancellation window
pub struct Countdown {
    rx: watch::Receiver<Duration>,
    task: JoinHandle<()>,
}

impl Countdown {
    /// Start ticking against the given confirmation instant and window
    pub fn start(confirmed_at: DateTime<Utc>, window: Duration) -> Self {
        Self::with_tick(confirmed_at, window, Duration::from_secs(1))
    }

    fn with_tick(confirmed_at: DateTime<Utc>, window: Duration, tick: Duration) -> Self {
        let initial = shared::order::remaining_window(confirmed_at, window, Utc::now());
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let remaining = shared::order::remaining_window(confirmed_at, window, Utc::now());
                if tx.send(remaining).is_err() {
                    return;
                }
                if remaining.is_zero() {
                    return;
                }
            }
        });

        Self { rx, task }
    }

    /// Current remaining window; zero once expired
    pub fn remaining(&self) -> Duration {
        *self.rx.borrow()
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Watch handle for UI code that wants push updates per tick
    pub fn watch(&self) -> watch::Receiver<Duration> {
        self.rx.clone()
    }

    /// Stop ticking, e.g. once the order reaches a terminal status
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remaining_recomputed_from_absolute_timestamp() {
        // Confirmed two seconds ago with a five second window
        let confirmed_at = Utc::now() - chrono::Duration::seconds(2);
        let countdown = Countdown::start(confirmed_at, Duration::from_secs(5));

        let remaining = countdown.remaining();
        assert!(remaining <= Duration::from_secs(3));
        assert!(remaining > Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_expired_window_reads_zero() {
        let confirmed_at = Utc::now() - chrono::Duration::seconds(10);
        let countdown = Countdown::start(confirmed_at, Duration::from_secs(5));

        assert_eq!(countdown.remaining(), Duration::ZERO);
        assert!(countdown.is_expired());
    }

    #[tokio::test]
    async fn test_ticks_toward_zero() {
        let confirmed_at = Utc::now();
        let countdown =
            Countdown::with_tick(confirmed_at, Duration::from_millis(80), Duration::from_millis(20));

        let mut rx = countdown.watch();
        loop {
            rx.changed().await.unwrap();
            if rx.borrow().is_zero() {
                break;
            }
        }
        assert!(countdown.is_expired());
    }

    #[tokio::test]
    async fn test_stop_halts_ticking() {
        let countdown = Countdown::start(Utc::now(), Duration::from_secs(300));
        countdown.stop();
        // Aborted task must not panic the runtime; remaining stays readable
        let _ = countdown.remaining();
    }
}
