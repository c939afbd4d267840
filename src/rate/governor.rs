use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

type DirectLimiter<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// A permit for exactly one request against one provider.
///
/// Not cloneable and not transferable between providers; dropping it after
/// the request is the consumption.
#[must_use]
#[derive(Debug)]
pub struct QuotaToken {
    provider: String,
}

impl QuotaToken {
    pub fn provider(&self) -> &str {
        &self.provider
    }
}

/// Outcome of a non-blocking admission attempt.
#[derive(Debug)]
pub enum Admission {
    Granted(QuotaToken),
    /// No token available; `wait` is how long until the earliest one.
    /// The attempt had no side effect on the bucket.
    Blocked { wait: Duration },
}

/// Per-provider admission control.
///
/// Token bucket refilled continuously at `quota / window` tokens per unit
/// time, capped at `quota`. Refill and decrement are a single atomic step
/// (GCRA under the hood), so concurrent callers across fetch tasks never
/// observe a negative bucket or double-spend a token.
///
/// Each provider family (price data, news, order submission) gets its own
/// instance — quotas are independent.
pub struct RateGovernor<C: Clock = DefaultClock> {
    provider: String,
    limiter: DirectLimiter<C>,
    clock: C,
}

impl RateGovernor<DefaultClock> {
    /// Build a governor granting at most `quota_per_window` tokens per
    /// `window`. Degenerate configuration is clamped to 1/1s minimums.
    pub fn new(provider: &str, quota_per_window: u32, window: Duration) -> Self {
        Self::with_clock(provider, quota_per_window, window, DefaultClock::default())
    }
}

impl<C: Clock> RateGovernor<C> {
    pub fn with_clock(provider: &str, quota_per_window: u32, window: Duration, clock: C) -> Self {
        let quota_per_window = quota_per_window.max(1);
        let window = window.max(Duration::from_secs(1));

        let period = window / quota_per_window;
        // Both are non-zero after the clamps above, so the constructors
        // cannot fail.
        let burst = NonZeroU32::new(quota_per_window).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);

        Self {
            provider: provider.to_string(),
            limiter: RateLimiter::direct_with_clock(quota, &clock),
            clock,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Non-blocking admission: a token immediately, or the wait until the
    /// earliest one becomes available. Callers decide whether to wait or
    /// abandon.
    pub fn acquire(&self) -> Admission {
        match self.limiter.check() {
            Ok(()) => Admission::Granted(QuotaToken {
                provider: self.provider.clone(),
            }),
            Err(not_until) => Admission::Blocked {
                wait: not_until.wait_time_from(self.clock.now()),
            },
        }
    }
}

impl RateGovernor<DefaultClock> {
    /// Suspend until a token is available. Used by callers that choose to
    /// wait rather than abandon the cycle.
    pub async fn acquire_or_wait(&self) -> QuotaToken {
        loop {
            match self.acquire() {
                Admission::Granted(token) => return token,
                Admission::Blocked { wait } => {
                    tracing::trace!(
                        provider = %self.provider,
                        wait_ms = wait.as_millis() as u64,
                        "quota exhausted, waiting for refill"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use governor::clock::FakeRelativeClock;

    fn governor_50_per_min(clock: &FakeRelativeClock) -> RateGovernor<FakeRelativeClock> {
        RateGovernor::with_clock("finnhub", 50, Duration::from_secs(60), clock.clone())
    }

    #[test]
    fn grants_quota_then_blocks_with_bounded_wait() {
        let clock = FakeRelativeClock::default();
        let gov = governor_50_per_min(&clock);

        // 80 requests in one instant: first 50 granted, remaining 30
        // blocked with a positive wait no longer than the window.
        let mut granted = 0;
        let mut blocked = 0;
        for _ in 0..80 {
            match gov.acquire() {
                Admission::Granted(token) => {
                    assert_eq!(token.provider(), "finnhub");
                    granted += 1;
                }
                Admission::Blocked { wait } => {
                    assert!(wait > Duration::ZERO);
                    assert!(wait <= Duration::from_secs(60));
                    blocked += 1;
                }
            }
        }
        assert_eq!(granted, 50);
        assert_eq!(blocked, 30);
    }

    #[test]
    fn refills_continuously_at_quota_over_window() {
        let clock = FakeRelativeClock::default();
        let gov = governor_50_per_min(&clock);

        for _ in 0..50 {
            assert!(matches!(gov.acquire(), Admission::Granted(_)));
        }
        assert!(matches!(gov.acquire(), Admission::Blocked { .. }));

        // One token refills every window/quota = 1.2s.
        clock.advance(Duration::from_millis(1200));
        assert!(matches!(gov.acquire(), Admission::Granted(_)));
        assert!(matches!(gov.acquire(), Admission::Blocked { .. }));

        // Three more periods, three more tokens — availability is spread
        // across the window, none dropped.
        clock.advance(Duration::from_millis(3600));
        let granted = (0..10)
            .filter(|_| matches!(gov.acquire(), Admission::Granted(_)))
            .count();
        assert_eq!(granted, 3);
    }

    #[test]
    fn bucket_never_exceeds_quota_after_long_idle() {
        let clock = FakeRelativeClock::default();
        let gov = governor_50_per_min(&clock);

        for _ in 0..50 {
            assert!(matches!(gov.acquire(), Admission::Granted(_)));
        }

        // Ten idle windows must not accumulate more than one window's quota.
        clock.advance(Duration::from_secs(600));
        let granted = (0..200)
            .filter(|_| matches!(gov.acquire(), Admission::Granted(_)))
            .count();
        assert_eq!(granted, 50);
    }

    #[test]
    fn blocked_acquire_has_no_side_effect() {
        let clock = FakeRelativeClock::default();
        let gov = governor_50_per_min(&clock);

        for _ in 0..50 {
            assert!(matches!(gov.acquire(), Admission::Granted(_)));
        }
        // Hammering the blocked path must not push availability out.
        for _ in 0..1000 {
            assert!(matches!(gov.acquire(), Admission::Blocked { .. }));
        }

        clock.advance(Duration::from_secs(60));
        let granted = (0..100)
            .filter(|_| matches!(gov.acquire(), Admission::Granted(_)))
            .count();
        assert_eq!(granted, 50);
    }

    #[test]
    fn degenerate_config_is_clamped() {
        let gov = RateGovernor::new("weird", 0, Duration::ZERO);
        assert!(matches!(gov.acquire(), Admission::Granted(_)));
    }
}
