//! Fixed-delay reconnection policy.
//!
//! When a channel drops, exactly one reconnect attempt is scheduled after
//! [`ReconnectPolicy::delay`]. There is no backoff, no jitter and no
//! attempt cap: a channel keeps retrying until its session is torn down.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Delay between a close/error and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub delay: Duration,
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

/// Sleep for the policy delay.
///
/// Returns `false` if `cancel` fired first, in which case no reconnect
/// should be attempted.
pub async fn wait_before_reconnect(policy: &ReconnectPolicy, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(policy.delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delay_is_five_seconds() {
        assert_eq!(ReconnectPolicy::default().delay, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_the_full_delay() {
        let start = tokio::time::Instant::now();
        let policy = ReconnectPolicy::default();
        assert!(wait_before_reconnect(&policy, &CancellationToken::new()).await);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn cancellation_token_stops_wait() {
        let cancel = CancellationToken::new();
        // Cancel immediately; the wait should return without sleeping.
        cancel.cancel();

        let policy = ReconnectPolicy::fixed(Duration::from_secs(3600));
        assert!(!wait_before_reconnect(&policy, &cancel).await);
    }
}
