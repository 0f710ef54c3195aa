use std::time::Duration;

/// Capped exponential backoff for reconnect attempts.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
            max_attempts,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempt` consecutive failed opens have used up the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Delay before the given 1-based attempt: `min(base * 2^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let multiplier = 1_u64 << shift;
        let bounded = self
            .base_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms);
        Duration::from_millis(bounded)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(1_000, 10_000, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_base_delay() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(1_000));
    }

    #[test]
    fn doubles_until_the_cap() {
        let policy = ReconnectPolicy::default();
        let delays: Vec<u64> = (1..=10)
            .map(|attempt| policy.delay_for_attempt(attempt).as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            [1_000, 2_000, 4_000, 8_000, 10_000, 10_000, 10_000, 10_000, 10_000, 10_000]
        );
    }

    #[test]
    fn exhausts_after_attempt_cap() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.is_exhausted(9));
        assert!(policy.is_exhausted(10));
        assert!(policy.is_exhausted(11));
    }

    #[test]
    fn survives_huge_attempt_numbers() {
        let policy = ReconnectPolicy::new(1_000, 10_000, u32::MAX);
        assert_eq!(
            policy.delay_for_attempt(u32::MAX),
            Duration::from_millis(10_000)
        );
    }
}
