// src/utils/clock.rs
//! Time sources
//!
//! Two concerns live here:
//!
//! - **Wall time for records**: `unix_nanos_now()` anchors the system clock
//!   once per process and advances it with a monotonic `Instant`, so record
//!   timestamps never step backwards when NTP adjusts the system clock.
//! - **Scheduling time for retries**: the `Clock` trait lets the exporter's
//!   backoff loop run against tokio time in production and a recording clock
//!   in tests.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::time::{Duration, Instant as StdInstant, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

static WALL_ANCHOR: Lazy<(u64, StdInstant)> = Lazy::new(|| {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    (wall, StdInstant::now())
});

/// Nanoseconds since the Unix epoch, UTC, never decreasing within a process
pub fn unix_nanos_now() -> u64 {
    let (wall, anchor) = *WALL_ANCHOR;
    wall.saturating_add(anchor.elapsed().as_nanos() as u64)
}

/// Source of "now" and of cancellable sleeps for retry scheduling
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Current instant
    fn now(&self) -> Instant;

    /// Sleep for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Clock backed by tokio's timer (honours `tokio::time::pause`)
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::RecordingClock;
    use super::*;

    #[test]
    fn test_unix_nanos_monotonic() {
        let mut last = unix_nanos_now();
        for _ in 0..1000 {
            let now = unix_nanos_now();
            assert!(now >= last);
            last = now;
        }
    }

    #[test]
    fn test_unix_nanos_close_to_system_time() {
        let system = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos() as u64;
        let ours = unix_nanos_now();
        let diff = system.abs_diff(ours);
        assert!(diff < Duration::from_secs(5).as_nanos() as u64);
    }

    #[tokio::test]
    async fn test_recording_clock_advances() {
        let clock = RecordingClock::new();
        let t0 = clock.now();
        clock.sleep(Duration::from_millis(100)).await;
        clock.sleep(Duration::from_millis(200)).await;
        assert_eq!(clock.now() - t0, Duration::from_millis(300));
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_sleep() {
        let clock = TokioClock;
        let t0 = clock.now();
        clock.sleep(Duration::from_secs(3)).await;
        assert!(clock.now() - t0 >= Duration::from_secs(3));
    }
}
