use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

/// Snapshot of the process-wide daily spend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpendState {
    /// Spend accumulated since `last_reset_date` began.
    pub daily_spend: f64,
    /// Ceiling that trips the breaker.
    pub spend_limit: f64,
    /// Date the counters belong to.
    pub last_reset_date: NaiveDate,
    /// Set once the limit is crossed; cleared on the next date.
    pub tripped: bool,
}

impl SpendState {
    fn allows_calls(&self) -> bool {
        !self.tripped && self.daily_spend < self.spend_limit
    }
}

/// Daily spend circuit breaker.
///
/// All methods take `today` so the date rollover is explicit; the counters
/// reset whenever `today` differs from the stored date.
pub struct SpendBreaker {
    state: Mutex<SpendState>,
}

impl SpendBreaker {
    /// Creates a breaker with zero spend for `today`.
    pub fn new(spend_limit: f64, today: NaiveDate) -> Self {
        Self {
            state: Mutex::new(SpendState {
                daily_spend: 0.0,
                spend_limit,
                last_reset_date: today,
                tripped: false,
            }),
        }
    }

    fn reset_if_new_day(state: &mut SpendState, today: NaiveDate) {
        if state.last_reset_date != today {
            info!(
                previous = %state.last_reset_date,
                spent = state.daily_spend,
                "Daily spend reset"
            );
            state.daily_spend = 0.0;
            state.tripped = false;
            state.last_reset_date = today;
        }
    }

    /// Seeds today's spend (e.g. from the cost log at startup). Never
    /// notifies: a limit already crossed before startup was alerted then.
    pub fn restore(&self, spent: f64, today: NaiveDate) {
        let mut state = self.state.lock();
        Self::reset_if_new_day(&mut state, today);
        state.daily_spend = spent;
        state.tripped = spent >= state.spend_limit;
    }

    /// `Ok` if calls are allowed on `today`, otherwise the blocking state.
    pub fn check(&self, today: NaiveDate) -> Result<(), SpendState> {
        let mut state = self.state.lock();
        Self::reset_if_new_day(&mut state, today);
        if state.allows_calls() {
            Ok(())
        } else {
            Err(*state)
        }
    }

    /// Adds `amount` to today's spend. Returns `true` exactly once per day:
    /// on the call that crosses the limit.
    pub fn record_spend(&self, amount: f64, today: NaiveDate) -> bool {
        let mut state = self.state.lock();
        Self::reset_if_new_day(&mut state, today);
        let was_ok = state.allows_calls();
        state.daily_spend += amount;
        if state.daily_spend >= state.spend_limit {
            state.tripped = true;
        }
        let crossed = was_ok && state.tripped;
        if crossed {
            warn!(
                spent = state.daily_spend,
                limit = state.spend_limit,
                "Spend circuit breaker tripped"
            );
        }
        crossed
    }

    /// Current state.
    pub fn snapshot(&self) -> SpendState {
        *self.state.lock()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, d).unwrap()
    }

    #[test]
    fn test_crossing_fires_once() {
        let breaker = SpendBreaker::new(1.0, day(1));
        assert!(breaker.check(day(1)).is_ok());
        assert!(!breaker.record_spend(0.6, day(1)));
        assert!(breaker.record_spend(0.6, day(1)));
        assert!(!breaker.record_spend(0.6, day(1)));

        let blocked = breaker.check(day(1)).unwrap_err();
        assert!(blocked.tripped);
        assert!((blocked.daily_spend - 1.8).abs() < 1e-9);
    }

    #[test]
    fn test_new_day_resets() {
        let breaker = SpendBreaker::new(1.0, day(1));
        assert!(breaker.record_spend(1.0, day(1)));
        assert!(breaker.check(day(1)).is_err());

        assert!(breaker.check(day(2)).is_ok());
        let state = breaker.snapshot();
        assert_eq!(state.last_reset_date, day(2));
        assert_eq!(state.daily_spend, 0.0);
        assert!(!state.tripped);

        // The alert can fire again on the new day.
        assert!(breaker.record_spend(1.5, day(2)));
    }

    #[test]
    fn test_restore_does_not_notify() {
        let breaker = SpendBreaker::new(1.0, day(1));
        breaker.restore(2.0, day(1));
        assert!(breaker.check(day(1)).is_err());
        assert!(!breaker.record_spend(0.1, day(1)));
    }

    #[test]
    fn test_zero_limit_blocks_without_alert() {
        let breaker = SpendBreaker::new(0.0, day(1));
        assert!(breaker.check(day(1)).is_err());
    }
}
