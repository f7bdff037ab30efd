use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, Default)]
struct HealthState {
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

/// Per-provider failure counter and cooldown deadline.
///
/// A provider enters cooldown once it reaches `threshold` consecutive
/// failures and leaves it when the deadline passes (its counter is reset at
/// that point). Any success resets the counter. Callers pass `now` explicitly.
pub struct ProviderHealth {
    threshold: u32,
    cooldown: Duration,
    state: Mutex<HashMap<String, HealthState>>,
}

impl ProviderHealth {
    /// Creates a tracker with the given cooldown threshold and duration.
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// True if `provider` is cooling down at `now`. An expired cooldown is
    /// cleared.
    pub fn is_cooling_down(&self, provider: &str, now: Instant) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.get_mut(provider) else {
            return false;
        };
        if entry.consecutive_failures < self.threshold {
            return false;
        }
        match entry.cooldown_until {
            Some(until) if now < until => true,
            _ => {
                *entry = HealthState::default();
                false
            }
        }
    }

    /// Records a failure. Returns `true` if the provider entered cooldown.
    pub fn record_failure(&self, provider: &str, now: Instant) -> bool {
        let mut state = self.state.lock();
        let entry = state.entry(provider.to_string()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.threshold {
            entry.cooldown_until = Some(now + self.cooldown);
            warn!(
                provider,
                failures = entry.consecutive_failures,
                cooldown_secs = self.cooldown.as_secs(),
                "Provider entered cooldown"
            );
            return true;
        }
        false
    }

    /// Records a success, clearing the counter and any cooldown.
    pub fn record_success(&self, provider: &str) {
        self.state
            .lock()
            .insert(provider.to_string(), HealthState::default());
    }

    /// Current consecutive failure count.
    pub fn failures(&self, provider: &str) -> u32 {
        self.state
            .lock()
            .get(provider)
            .map_or(0, |s| s.consecutive_failures)
    }

    /// Cooldown deadline, if one is set.
    pub fn cooldown_until(&self, provider: &str) -> Option<Instant> {
        self.state.lock().get(provider).and_then(|s| s.cooldown_until)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    // ── Test 1: cooldown starts at the threshold and lasts exactly the duration ──

    #[test]
    fn test_three_failures_enter_cooldown() {
        let health = ProviderHealth::new(3, Duration::from_secs(300));
        let t0 = Instant::now();

        assert!(!health.record_failure("groq", t0));
        assert!(!health.record_failure("groq", t0));
        assert!(!health.is_cooling_down("groq", t0));
        assert!(health.record_failure("groq", t0));

        assert_eq!(health.cooldown_until("groq"), Some(t0 + Duration::from_secs(300)));
        assert!(health.is_cooling_down("groq", t0 + Duration::from_secs(299)));
        assert!(!health.is_cooling_down("groq", t0 + Duration::from_secs(300)));
        // Expiry clears the counter.
        assert_eq!(health.failures("groq"), 0);
    }

    // ── Test 2: success resets ──

    #[test]
    fn test_success_resets_counter() {
        let health = ProviderHealth::new(3, Duration::from_secs(300));
        let t0 = Instant::now();
        health.record_failure("cerebras", t0);
        health.record_failure("cerebras", t0);
        health.record_success("cerebras");
        assert_eq!(health.failures("cerebras"), 0);

        health.record_failure("cerebras", t0);
        assert!(!health.is_cooling_down("cerebras", t0));
    }

    // ── Test 3: providers are independent ──

    #[test]
    fn test_providers_tracked_independently() {
        let health = ProviderHealth::new(1, Duration::from_secs(60));
        let t0 = Instant::now();
        health.record_failure("a", t0);
        assert!(health.is_cooling_down("a", t0));
        assert!(!health.is_cooling_down("b", t0));
        assert_eq!(health.failures("b"), 0);
    }
}
