//! Dual sliding-window rate limiting.
//!
//! Each source gets one [`RateLimiter`] bounding requests over the last
//! second and the last minute. Callers queue on a fair async mutex that is
//! held while waiting, so permits are handed out in arrival order.

use backfill_core::{AppConfig, ErrorKind, RateLimitConfig, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::debug;

const SECOND: Duration = Duration::from_secs(1);
const MINUTE: Duration = Duration::from_secs(60);

/// Events still inside the per-minute window, oldest first.
#[derive(Debug)]
pub struct RateLimiterState {
    window_events: VecDeque<Instant>,
    per_second_cap: usize,
    per_minute_cap: usize,
}

impl RateLimiterState {
    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.window_events.front() {
            if now.duration_since(oldest) >= MINUTE {
                self.window_events.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_last_second(&self, now: Instant) -> usize {
        self.window_events
            .iter()
            .rev()
            .take_while(|&&t| now.duration_since(t) < SECOND)
            .count()
    }

    /// Instant at which the next event becomes admissible, or `None` if it
    /// is admissible now.
    fn next_slot(&self, now: Instant) -> Option<Instant> {
        let len = self.window_events.len();
        let mut deadline: Option<Instant> = None;

        let recent = self.in_last_second(now);
        if recent >= self.per_second_cap {
            let oldest_recent = self.window_events[len - recent];
            deadline = Some(oldest_recent + SECOND);
        }

        if len >= self.per_minute_cap {
            let oldest = self.window_events[len - self.per_minute_cap];
            let minute_deadline = oldest + MINUTE;
            deadline = Some(deadline.map_or(minute_deadline, |d| d.max(minute_deadline)));
        }

        deadline
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    source_id: String,
    state: Mutex<RateLimiterState>,
}

impl RateLimiter {
    /// # Errors
    /// Returns `Config` if either capacity is zero.
    pub fn new(source_id: impl Into<String>, per_second: u32, per_minute: u32) -> Result<Self> {
        let source_id = source_id.into();
        if per_second == 0 || per_minute == 0 {
            return Err(ErrorKind::config(format!(
                "{source_id}: rate limit capacities must be non-zero"
            )));
        }

        Ok(Self {
            source_id,
            state: Mutex::new(RateLimiterState {
                window_events: VecDeque::with_capacity(per_minute as usize),
                per_second_cap: per_second as usize,
                per_minute_cap: per_minute as usize,
            }),
        })
    }

    /// # Errors
    /// Returns `Config` if either capacity is zero.
    pub fn from_config(source_id: impl Into<String>, limits: &RateLimitConfig) -> Result<Self> {
        Self::new(source_id, limits.per_second, limits.per_minute)
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Waits until both windows have room, then records one request.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        loop {
            let now = Instant::now();
            state.prune(now);
            match state.next_slot(now) {
                None => {
                    state.window_events.push_back(now);
                    return;
                }
                Some(deadline) => {
                    debug!(
                        source = %self.source_id,
                        wait_ms = deadline.duration_since(now).as_millis() as u64,
                        "Rate limit reached, waiting"
                    );
                    sleep_until(deadline).await;
                }
            }
        }
    }
}

/// One limiter per source, shared by every job of that source.
#[derive(Debug)]
pub struct RateLimiterRegistry {
    default_limits: RateLimitConfig,
    limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterRegistry {
    pub fn new(default_limits: RateLimitConfig) -> Self {
        Self {
            default_limits,
            limiters: RwLock::new(HashMap::new()),
        }
    }

    /// Builds limiters for every source in `config`.
    ///
    /// # Errors
    /// Returns `Config` if any capacity is zero.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let mut limiters = HashMap::new();
        for source in &config.sources {
            let limits = source.limits.unwrap_or(config.default_limits);
            limiters.insert(
                source.id.clone(),
                Arc::new(RateLimiter::from_config(&source.id, &limits)?),
            );
        }
        // Validate the fallback caps up front.
        RateLimiter::from_config("default", &config.default_limits)?;

        Ok(Self {
            default_limits: config.default_limits,
            limiters: RwLock::new(limiters),
        })
    }

    /// Returns the shared limiter for `source_id`, creating one from the
    /// default caps if the source was not configured.
    ///
    /// # Errors
    /// Returns `Config` if the default caps are invalid.
    pub fn get(&self, source_id: &str) -> Result<Arc<RateLimiter>> {
        {
            let limiters = self.limiters.read().unwrap_or_else(|e| e.into_inner());
            if let Some(limiter) = limiters.get(source_id) {
                return Ok(Arc::clone(limiter));
            }
        }

        let mut limiters = self.limiters.write().unwrap_or_else(|e| e.into_inner());
        if let Some(limiter) = limiters.get(source_id) {
            return Ok(Arc::clone(limiter));
        }
        let limiter = Arc::new(RateLimiter::from_config(source_id, &self.default_limits)?);
        limiters.insert(source_id.to_string(), Arc::clone(&limiter));
        Ok(limiter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backfill_core::SourceConfig;

    /// Asserts that no rolling window of `window` holds more than `cap` events.
    fn assert_window_cap(events: &[Instant], window: Duration, cap: usize) {
        for (i, start) in events.iter().enumerate() {
            let in_window = events[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < window)
                .count();
            assert!(
                in_window <= cap,
                "{in_window} events within {window:?} (cap {cap})"
            );
        }
    }

    // ============================================
    // Construction Tests
    // ============================================

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            RateLimiter::new("src", 0, 10),
            Err(ErrorKind::Config(_))
        ));
        assert!(RateLimiter::new("src", 5, 0).is_err());
        assert!(RateLimiter::new("src", 1, 1).is_ok());
    }

    // ============================================
    // Window Tests
    // ============================================

    #[tokio::test(start_paused = true)]
    async fn test_per_second_cap() {
        let limiter = RateLimiter::new("src", 2, 100).unwrap();
        let start = Instant::now();

        limiter.acquire().await;
        limiter.acquire().await;
        assert_eq!(Instant::now(), start);

        limiter.acquire().await;
        assert_eq!(Instant::now().duration_since(start), SECOND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_minute_cap() {
        let limiter = RateLimiter::new("src", 10, 3).unwrap();
        let start = Instant::now();

        for _ in 0..3 {
            limiter.acquire().await;
        }
        limiter.acquire().await;
        assert_eq!(Instant::now().duration_since(start), MINUTE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_respect_both_windows() {
        let limiter = Arc::new(RateLimiter::new("src", 3, 20).unwrap());
        let events = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..45 {
            let limiter = Arc::clone(&limiter);
            let events = Arc::clone(&events);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                events.lock().await.push(Instant::now());
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut events = events.lock().await.clone();
        events.sort();
        assert_eq!(events.len(), 45);
        assert_window_cap(&events, SECOND, 3);
        assert_window_cap(&events, MINUTE, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callers_served_in_arrival_order() {
        let limiter = Arc::new(RateLimiter::new("src", 1, 60).unwrap());
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = Arc::clone(&limiter);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
                order.lock().await.push(i);
            }));
            // let each task reach the mutex before spawning the next
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().await, vec![0, 1, 2, 3, 4]);
    }

    // ============================================
    // Registry Tests
    // ============================================

    #[test]
    fn test_registry_shares_instances() {
        let mut config = AppConfig::default();
        config
            .sources
            .push(SourceConfig::new("eth_gas", vec![]).with_limits(2, 30));
        let registry = RateLimiterRegistry::from_config(&config).unwrap();

        let a = registry.get("eth_gas").unwrap();
        let b = registry.get("eth_gas").unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let unknown = registry.get("other").unwrap();
        assert!(Arc::ptr_eq(&unknown, &registry.get("other").unwrap()));
        assert!(!Arc::ptr_eq(&a, &unknown));
    }

    #[test]
    fn test_registry_rejects_zero_caps() {
        let mut config = AppConfig::default();
        config
            .sources
            .push(SourceConfig::new("eth_gas", vec![]).with_limits(0, 30));
        assert!(RateLimiterRegistry::from_config(&config).is_err());
    }
}
