//! Windowed rate limiting with lockout — the only mutable state in the gate.
//!
//! Two independent fixed-window counters per identity: command rate and
//! authentication-failure rate. Crossing the failure threshold engages a
//! lockout that denies everything of that kind until it elapses. All state
//! lives behind one mutex so check-and-increment is atomic under concurrent
//! requests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::GateError;

/// Counter window length for both kinds.
const WINDOW: Duration = Duration::from_secs(60);

/// Prune bookkeeping once the table grows past this many identities.
const PRUNE_THRESHOLD: usize = 64;

/// Time source, injectable so tests can drive window rollover and lockout
/// expiry without sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> Instant;
}

/// Wall-clock time source used outside tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Which counter a request charges against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitKind {
    /// Ordinary command/request traffic.
    Command,
    /// Failed authentication attempts.
    AuthFailure,
}

/// Thresholds, loaded from `[rate_limit]` config.
#[derive(Debug, Clone)]
pub struct RateLimits {
    pub max_commands_per_minute: u32,
    pub max_auth_failures_per_minute: u32,
    pub lockout: Duration,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            max_commands_per_minute: 30,
            max_auth_failures_per_minute: 5,
            lockout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
struct RateWindow {
    count: u32,
    window_start: Instant,
    lockout_until: Option<Instant>,
}

/// Per-identity windowed counters behind a single lock.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    windows: Mutex<HashMap<(i64, LimitKind), RateWindow>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    pub fn with_clock(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Atomically check the limit for `kind` and record this request.
    ///
    /// For `Command`, exceeding the window budget returns
    /// [`GateError::RateLimitExceeded`] with a positive retry hint. For
    /// `AuthFailure`, the Nth failure inside a window engages the lockout
    /// and returns [`GateError::LockedOut`]; during an active lockout every
    /// request of that kind is denied regardless of counter state.
    pub fn check_and_record(&self, identity: i64, kind: LimitKind) -> Result<(), GateError> {
        let now = self.clock.now();
        let mut windows = self.windows.lock();

        if windows.len() > PRUNE_THRESHOLD {
            windows.retain(|_, w| {
                w.lockout_until.is_some_and(|until| until > now)
                    || now.saturating_duration_since(w.window_start) < WINDOW
            });
        }

        let window = windows.entry((identity, kind)).or_insert(RateWindow {
            count: 0,
            window_start: now,
            lockout_until: None,
        });

        if let Some(until) = window.lockout_until {
            if now < until {
                return Err(GateError::LockedOut {
                    remaining_secs: remaining_secs(now, until),
                });
            }
            // Lockout elapsed; start fresh.
            window.lockout_until = None;
            window.count = 0;
            window.window_start = now;
        }

        if now.saturating_duration_since(window.window_start) >= WINDOW {
            window.count = 0;
            window.window_start = now;
        }

        window.count += 1;

        match kind {
            LimitKind::Command => {
                if window.count > self.limits.max_commands_per_minute {
                    let window_end = window.window_start + WINDOW;
                    return Err(GateError::RateLimitExceeded {
                        retry_after_secs: remaining_secs(now, window_end).max(1),
                    });
                }
            }
            LimitKind::AuthFailure => {
                if window.count >= self.limits.max_auth_failures_per_minute {
                    let until = now + self.limits.lockout;
                    window.lockout_until = Some(until);
                    return Err(GateError::LockedOut {
                        remaining_secs: self.limits.lockout.as_secs(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Remaining lockout for `kind`, if one is active. Read-only.
    pub fn locked_out(&self, identity: i64, kind: LimitKind) -> Option<u64> {
        let now = self.clock.now();
        let windows = self.windows.lock();
        windows
            .get(&(identity, kind))
            .and_then(|w| w.lockout_until)
            .filter(|until| *until > now)
            .map(|until| remaining_secs(now, until))
    }

    /// Clear the window for `kind` (used on successful authentication so an
    /// honest retry after a typo does not inch toward lockout).
    pub fn reset(&self, identity: i64, kind: LimitKind) {
        self.windows.lock().remove(&(identity, kind));
    }
}

fn remaining_secs(now: Instant, until: Instant) -> u64 {
    until.saturating_duration_since(now).as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limits: RateLimits) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(limits, clock.clone());
        (clock, limiter)
    }

    #[test]
    fn requests_under_the_limit_pass() {
        let (_clock, limiter) = limiter(RateLimits::default());
        for _ in 0..30 {
            assert!(limiter.check_and_record(1, LimitKind::Command).is_ok());
        }
    }

    #[test]
    fn thirty_first_request_in_window_is_denied_with_retry_hint() {
        let (_clock, limiter) = limiter(RateLimits::default());
        for _ in 0..30 {
            limiter.check_and_record(1, LimitKind::Command).unwrap();
        }
        match limiter.check_and_record(1, LimitKind::Command) {
            Err(GateError::RateLimitExceeded { retry_after_secs }) => {
                assert!(retry_after_secs > 0);
                assert!(retry_after_secs <= 60);
            }
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    #[test]
    fn window_rollover_resets_the_budget() {
        let (clock, limiter) = limiter(RateLimits::default());
        for _ in 0..30 {
            limiter.check_and_record(1, LimitKind::Command).unwrap();
        }
        assert!(limiter.check_and_record(1, LimitKind::Command).is_err());

        clock.advance(Duration::from_secs(61));
        assert!(limiter.check_and_record(1, LimitKind::Command).is_ok());
    }

    #[test]
    fn fifth_auth_failure_engages_lockout() {
        let (_clock, limiter) = limiter(RateLimits::default());
        for _ in 0..4 {
            assert!(limiter.check_and_record(1, LimitKind::AuthFailure).is_ok());
        }
        match limiter.check_and_record(1, LimitKind::AuthFailure) {
            Err(GateError::LockedOut { remaining_secs }) => {
                assert_eq!(remaining_secs, 300);
            }
            other => panic!("expected LockedOut, got {other:?}"),
        }
        assert!(limiter.locked_out(1, LimitKind::AuthFailure).is_some());
    }

    #[test]
    fn lockout_denies_until_it_elapses() {
        let (clock, limiter) = limiter(RateLimits::default());
        for _ in 0..5 {
            let _ = limiter.check_and_record(1, LimitKind::AuthFailure);
        }

        clock.advance(Duration::from_secs(299));
        assert!(matches!(
            limiter.check_and_record(1, LimitKind::AuthFailure),
            Err(GateError::LockedOut { .. })
        ));

        clock.advance(Duration::from_secs(2));
        assert!(limiter.locked_out(1, LimitKind::AuthFailure).is_none());
        assert!(limiter.check_and_record(1, LimitKind::AuthFailure).is_ok());
    }

    #[test]
    fn counters_are_independent_per_kind() {
        let (_clock, limiter) = limiter(RateLimits {
            max_commands_per_minute: 1,
            max_auth_failures_per_minute: 5,
            lockout: Duration::from_secs(300),
        });
        limiter.check_and_record(1, LimitKind::Command).unwrap();
        assert!(limiter.check_and_record(1, LimitKind::Command).is_err());
        // The auth-failure counter is untouched by command traffic.
        assert!(limiter.check_and_record(1, LimitKind::AuthFailure).is_ok());
    }

    #[test]
    fn counters_are_independent_per_identity() {
        let (_clock, limiter) = limiter(RateLimits {
            max_commands_per_minute: 1,
            max_auth_failures_per_minute: 5,
            lockout: Duration::from_secs(300),
        });
        limiter.check_and_record(1, LimitKind::Command).unwrap();
        assert!(limiter.check_and_record(1, LimitKind::Command).is_err());
        assert!(limiter.check_and_record(2, LimitKind::Command).is_ok());
    }

    #[test]
    fn reset_clears_failure_state() {
        let (_clock, limiter) = limiter(RateLimits::default());
        for _ in 0..4 {
            limiter.check_and_record(1, LimitKind::AuthFailure).unwrap();
        }
        limiter.reset(1, LimitKind::AuthFailure);
        // Budget is back to full; four more failures still pass.
        for _ in 0..4 {
            assert!(limiter.check_and_record(1, LimitKind::AuthFailure).is_ok());
        }
    }

    #[test]
    fn pruning_keeps_locked_out_identities() {
        let (_clock, limiter) = limiter(RateLimits::default());
        for _ in 0..5 {
            let _ = limiter.check_and_record(7, LimitKind::AuthFailure);
        }
        // Flood the table with other identities to trigger pruning.
        for id in 100..200 {
            limiter.check_and_record(id, LimitKind::Command).unwrap();
        }
        assert!(limiter.locked_out(7, LimitKind::AuthFailure).is_some());
    }

    #[test]
    fn concurrent_requests_never_exceed_budget() {
        let limiter = Arc::new(RateLimiter::new(RateLimits {
            max_commands_per_minute: 50,
            max_auth_failures_per_minute: 5,
            lockout: Duration::from_secs(300),
        }));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            handles.push(std::thread::spawn(move || {
                let mut allowed = 0u32;
                for _ in 0..20 {
                    if limiter.check_and_record(1, LimitKind::Command).is_ok() {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(total, 50, "exactly the budget must be admitted");
    }
}
