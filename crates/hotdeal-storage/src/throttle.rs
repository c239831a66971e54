use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Enforces a minimum spacing between consecutive task starts. There are no
/// bursts: every caller waits until `spacing` has passed since the previous start.
#[derive(Debug)]
pub struct StartThrottle {
    spacing: Duration,
    next_start: Mutex<Option<Instant>>,
}

impl StartThrottle {
    pub fn new(spacing: Duration) -> Self {
        Self {
            spacing,
            next_start: Mutex::new(None),
        }
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Wait for this caller's start slot.
    pub async fn wait_turn(&self) {
        if self.spacing.is_zero() {
            return;
        }
        // The slot is reserved under the lock; the sleep happens after releasing it.
        let slot = {
            let mut next = self.next_start.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.spacing);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn consecutive_starts_are_spaced() {
        let throttle = StartThrottle::new(Duration::from_millis(100));
        let begin = Instant::now();
        throttle.wait_turn().await;
        throttle.wait_turn().await;
        throttle.wait_turn().await;
        assert!(begin.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_spacing_never_waits() {
        let throttle = StartThrottle::new(Duration::ZERO);
        let begin = Instant::now();
        for _ in 0..10 {
            throttle.wait_turn().await;
        }
        assert_eq!(begin.elapsed(), Duration::ZERO);
    }
}
