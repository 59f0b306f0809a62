use crate::config::BackoffPolicy;

/// Reconnect spacing: the first `fixed_attempts` retries wait
/// `min_interval_ms`, later ones double the previous wait up to
/// `max_interval_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
    interval_ms: u64,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        let policy = policy.sanitized();
        Self {
            policy,
            attempt: 0,
            interval_ms: policy.min_interval_ms,
        }
    }

    /// Counts a failed attempt and returns the wait before the next one.
    pub fn next_delay(&mut self) -> u64 {
        self.attempt = self.attempt.saturating_add(1);
        self.interval_ms = if self.attempt <= self.policy.fixed_attempts {
            self.policy.min_interval_ms
        } else {
            self.interval_ms
                .saturating_mul(2)
                .min(self.policy.max_interval_ms)
        };
        self.interval_ms
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
        self.interval_ms = self.policy.min_interval_ms;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }
}
