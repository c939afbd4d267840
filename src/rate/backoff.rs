use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Classification of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// HTTP 429 or equivalent.
    RateLimited,
    /// 5xx or network timeout.
    TransientServer,
    /// Other 4xx, auth failure, malformed response. Never retried.
    FatalClient,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    RetryAfter(Duration),
    Fatal,
}

/// Pure retry decision over (error class, attempt count, server hint).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
    /// Jitter fraction applied symmetrically, e.g. 0.2 for ±20%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Exponential curve without jitter: `base * 2^(attempt-1)`, capped.
    /// Monotone non-decreasing in `attempt` up to the cap.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exp);
        delay.min(self.max_delay)
    }

    /// Decide what happens after a failure on attempt `attempt` (1-based).
    ///
    /// `FatalClient` never retries. Retryable classes back off
    /// exponentially with random jitter so retries across symbols do not
    /// synchronize; an explicit server `Retry-After` hint takes precedence
    /// whenever it is larger than the computed delay. Attempts beyond
    /// `max_attempts` are reclassified as fatal — terminal for the cycle,
    /// never a process error.
    pub fn next_action(
        &self,
        class: ErrorClass,
        attempt: u32,
        server_hint: Option<Duration>,
    ) -> NextAction {
        if class == ErrorClass::FatalClient {
            return NextAction::Fatal;
        }
        if attempt >= self.max_attempts {
            return NextAction::Fatal;
        }

        let base = self.base_delay_for(attempt);
        let jittered = apply_jitter(base, self.jitter);
        let delay = match server_hint {
            Some(hint) if hint > jittered => hint,
            _ => jittered,
        };
        NextAction::RetryAfter(delay)
    }
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
    delay.mul_f64(factor.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_client_never_retries() {
        let policy = RetryPolicy::default();
        for attempt in 1..10 {
            assert_eq!(
                policy.next_action(ErrorClass::FatalClient, attempt, Some(Duration::from_secs(1))),
                NextAction::Fatal
            );
        }
    }

    #[test]
    fn attempts_beyond_max_become_fatal() {
        let policy = RetryPolicy::default().with_max_attempts(5);
        assert!(matches!(
            policy.next_action(ErrorClass::TransientServer, 4, None),
            NextAction::RetryAfter(_)
        ));
        assert_eq!(
            policy.next_action(ErrorClass::TransientServer, 5, None),
            NextAction::Fatal
        );
        assert_eq!(
            policy.next_action(ErrorClass::RateLimited, 6, None),
            NextAction::Fatal
        );
    }

    #[test]
    fn base_curve_is_monotone_up_to_cap() {
        let policy = RetryPolicy::default();
        let mut prev = Duration::ZERO;
        for attempt in 1..=12 {
            let d = policy.base_delay_for(attempt);
            assert!(d >= prev, "attempt {} regressed: {:?} < {:?}", attempt, d, prev);
            assert!(d <= policy.max_delay);
            prev = d;
        }
        assert_eq!(policy.base_delay_for(12), policy.max_delay);
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = RetryPolicy::default();
        let base = policy.base_delay_for(3);
        for _ in 0..200 {
            match policy.next_action(ErrorClass::TransientServer, 3, None) {
                NextAction::RetryAfter(d) => {
                    assert!(d >= base.mul_f64(0.8), "{:?} below jitter floor", d);
                    assert!(d <= base.mul_f64(1.2), "{:?} above jitter ceiling", d);
                }
                NextAction::Fatal => panic!("unexpected fatal"),
            }
        }
    }

    #[test]
    fn server_hint_takes_precedence_when_larger() {
        let policy = RetryPolicy::default();
        // Attempt 1 computes at most 0.8s * 1.2 < 1s; a 10s Retry-After
        // must win.
        let hint = Duration::from_secs(10);
        match policy.next_action(ErrorClass::RateLimited, 1, Some(hint)) {
            NextAction::RetryAfter(d) => assert!(d >= hint),
            NextAction::Fatal => panic!("unexpected fatal"),
        }
    }

    #[test]
    fn small_hint_does_not_shrink_backoff() {
        let policy = RetryPolicy::default();
        let hint = Duration::from_millis(1);
        let floor = policy.base_delay_for(4).mul_f64(0.8);
        match policy.next_action(ErrorClass::TransientServer, 4, Some(hint)) {
            NextAction::RetryAfter(d) => assert!(d >= floor),
            NextAction::Fatal => panic!("unexpected fatal"),
        }
    }
}
