//! Reconnect delay and timeout utilities.
//!
//! The helpers in this module are transport-agnostic and are used by the
//! channels that need bounded delays between recovery attempts.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Policy controlling the delay between reconnect attempts.
///
/// The default is a fixed, non-growing delay: the push subscription retries
/// indefinitely and a constant cadence keeps recovery time predictable.
/// Setting `max_delay` above `initial_delay` enables doubling up to the cap
/// for consumers that prefer backing off.
#[derive(Clone, Debug)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Upper bound for delay growth; equal to `initial_delay` for a fixed
    /// cadence.
    pub max_delay: Duration,
    /// Maximum random jitter added to each delay.
    pub jitter: Duration,
}

impl ReconnectPolicy {
    /// Returns a fixed-delay policy with no jitter.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            jitter: Duration::ZERO,
        }
    }

    /// Computes the delay to apply before the given reconnect attempt.
    ///
    /// `attempt` is 1-based and should correspond to the number of
    /// consecutive failures so far.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 1..attempt {
            delay = std::cmp::min(delay.saturating_mul(2), self.max_delay);
        }
        delay + jitter_duration(self.jitter, attempt)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

/// Applies a timeout to an async computation.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    future: Fut,
) -> Result<T, tokio::time::error::Elapsed>
where
    Fut: Future<Output = T>,
{
    tokio::time::timeout(timeout, future).await
}

fn jitter_duration(max_jitter: Duration, attempt: usize) -> Duration {
    if max_jitter.is_zero() {
        return Duration::ZERO;
    }

    let limit_nanos = max_jitter.as_nanos().min(u64::MAX as u128) as u64;
    if limit_nanos == 0 {
        return Duration::ZERO;
    }

    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    let mixed = now_nanos ^ ((attempt as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
    Duration::from_nanos(mixed % (limit_nanos + 1))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{with_timeout, ReconnectPolicy};

    #[test]
    fn fixed_policy_never_grows() {
        let policy = ReconnectPolicy::fixed(Duration::from_millis(250));
        for attempt in 1..10 {
            assert_eq!(policy.delay_for_attempt(attempt), Duration::from_millis(250));
        }
    }

    #[test]
    fn growing_policy_doubles_to_cap() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
            jitter: Duration::ZERO,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(400));
    }

    #[test]
    fn jitter_stays_within_bound() {
        let policy = ReconnectPolicy {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
        };
        for attempt in 1..20 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn with_timeout_elapses_on_a_stalled_future() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let stalled = std::future::pending::<()>();
            let result = with_timeout(Duration::from_millis(10), stalled).await;
            assert!(result.is_err());
        });
    }

    #[test]
    fn with_timeout_passes_through_a_ready_value() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("runtime");

        runtime.block_on(async {
            let result = with_timeout(Duration::from_secs(1), async { 7 }).await;
            assert_eq!(result.expect("ready"), 7);
        });
    }
}
