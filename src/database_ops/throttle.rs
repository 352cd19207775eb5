use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};

use crate::util::env::env_parse;

/// Rate budget for one class of external source (stream search, storefront, catalog).
#[derive(Clone, Debug)]
pub struct RateLimitSettings {
    pub min_interval: Duration,
    pub concurrency: usize,
}

impl RateLimitSettings {
    pub fn new(min_interval: Duration, concurrency: usize) -> Self {
        Self {
            min_interval,
            concurrency: concurrency.max(1),
        }
    }

    /// Reads `<PREFIX>_MIN_INTERVAL_MS` and `<PREFIX>_CONCURRENCY`.
    pub fn from_env(prefix: &str, default_interval_ms: u64, default_concurrency: usize) -> Self {
        let interval_ms: u64 = env_parse(&format!("{prefix}_MIN_INTERVAL_MS"), default_interval_ms);
        let concurrency: usize = env_parse(&format!("{prefix}_CONCURRENCY"), default_concurrency);
        Self::new(Duration::from_millis(interval_ms), concurrency)
    }

    /// No spacing, single flight. Used by tests and dry runs against mock servers.
    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO, 4)
    }
}

/// Semaphore-gated worker slots plus a minimum spacing between call starts.
///
/// Every adapter owns one of these; callers may fan out freely and the throttle
/// keeps both the in-flight count and the start-to-start spacing within budget.
#[derive(Clone)]
pub struct RequestThrottle {
    settings: RateLimitSettings,
    slots: Arc<Semaphore>,
    next_allowed: Arc<Mutex<Instant>>,
}

impl RequestThrottle {
    pub fn new(settings: RateLimitSettings) -> Self {
        let slots = Arc::new(Semaphore::new(settings.concurrency));
        Self {
            settings,
            slots,
            next_allowed: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Wait for a free slot and for this call's start time. Hold the returned
    /// permit for the duration of the request.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        // The semaphore is never closed, so this only fails if that invariant breaks;
        // callers then proceed unthrottled rather than stall the job.
        let permit = self.slots.clone().acquire_owned().await.ok();

        let interval = self.settings.min_interval;
        if !interval.is_zero() {
            let mut next_allowed = self.next_allowed.lock().await;
            let now = Instant::now();
            let wait_until = if now >= *next_allowed {
                now
            } else {
                *next_allowed
            };
            *next_allowed = wait_until + interval;
            drop(next_allowed);

            let sleep_duration = wait_until.saturating_duration_since(now);
            if !sleep_duration.is_zero() {
                sleep(sleep_duration).await;
            }
        }
        permit
    }
}

#[cfg(test)]
mod tests {
    use super::{RateLimitSettings, RequestThrottle};
    use std::time::Duration;
    use tokio::time::Instant;

    #[tokio::test]
    async fn throttle_spaces_call_starts() {
        let throttle = RequestThrottle::new(RateLimitSettings::new(Duration::from_millis(40), 4));

        // First call should be immediate.
        drop(throttle.acquire().await);

        let start = Instant::now();
        drop(throttle.acquire().await);
        drop(throttle.acquire().await);
        let elapsed = start.elapsed();

        assert!(
            elapsed >= Duration::from_millis(80),
            "expected at least two intervals, got {:?}",
            elapsed
        );
    }

    #[tokio::test]
    async fn throttle_bounds_in_flight_calls() {
        let throttle = RequestThrottle::new(RateLimitSettings::new(Duration::ZERO, 2));
        let a = throttle.acquire().await;
        let b = throttle.acquire().await;
        assert!(a.is_some() && b.is_some());

        let blocked =
            tokio::time::timeout(Duration::from_millis(30), throttle.acquire()).await;
        assert!(blocked.is_err(), "third permit must wait for a free slot");

        drop(a);
        let third = tokio::time::timeout(Duration::from_millis(30), throttle.acquire()).await;
        assert!(third.is_ok());
    }
}
