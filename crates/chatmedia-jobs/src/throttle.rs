//! Per-host request spacing.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::trace;

/// Keeps at least `delay` between the start of two requests to the same host.
///
/// Slots are reserved under a short lock and waited for outside it, so
/// concurrent workers hitting one host queue up in order while requests to
/// other hosts proceed.
#[derive(Debug)]
pub struct HostThrottle {
    delay: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl HostThrottle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Wait until a request to `host` may start.
    pub async fn wait(&self, host: &str) {
        if self.delay.is_zero() {
            return;
        }
        let slot = {
            let mut slots = self.next_slot.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let slot = slots.get(host).copied().map_or(now, |next| next.max(now));
            slots.insert(host.to_string(), slot + self.delay);
            slot
        };
        if slot > Instant::now() {
            trace!(host, wait_ms = (slot - Instant::now()).as_millis() as u64, "Throttling request");
            sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_request_is_immediate() {
        let throttle = HostThrottle::new(Duration::from_millis(1500));
        let start = Instant::now();
        throttle.wait("a.example").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_host_is_spaced() {
        let throttle = HostThrottle::new(Duration::from_millis(1500));
        let start = Instant::now();
        throttle.wait("a.example").await;
        throttle.wait("a.example").await;
        throttle.wait("a.example").await;
        assert!(start.elapsed() >= Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hosts_are_independent() {
        let throttle = HostThrottle::new(Duration::from_millis(1500));
        let start = Instant::now();
        throttle.wait("a.example").await;
        throttle.wait("b.example").await;
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_zero_delay_never_waits() {
        let throttle = HostThrottle::new(Duration::ZERO);
        for _ in 0..100 {
            throttle.wait("a.example").await;
        }
    }
}
