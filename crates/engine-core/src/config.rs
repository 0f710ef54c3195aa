use std::time::Duration;

use crate::backoff::ReconnectPolicy;

/// Close code used when the engine drops a stale connection.
pub const HEARTBEAT_CLOSE_CODE: u16 = 4000;
/// Close reason paired with [`HEARTBEAT_CLOSE_CODE`].
pub const HEARTBEAT_CLOSE_REASON: &str = "Heartbeat timeout";

/// Engine tuning, fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Consecutive failed opens tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_base_delay: Duration,
    /// Ceiling for the reconnect delay growth.
    pub reconnect_max_delay: Duration,
    /// Silence tolerated since the last host PING before forcing a reconnect.
    pub heartbeat_stale_after: Duration,
    /// Cadence of the staleness check while connected.
    pub heartbeat_check_period: Duration,
    /// Budget for one action to produce a host result.
    pub action_timeout: Duration,
    pub max_steps_per_action: usize,
    pub max_text_step_chars: usize,
    /// Resolved-id retention used for duplicate-result suppression.
    pub completed_window_capacity: usize,
    /// Sent verbatim in the AUTH payload.
    pub protocol_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 10,
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(10),
            heartbeat_stale_after: Duration::from_secs(15),
            heartbeat_check_period: Duration::from_secs(1),
            action_timeout: Duration::from_secs(8),
            max_steps_per_action: 50,
            max_text_step_chars: 1_000,
            completed_window_capacity: 500,
            protocol_version: "1.0".to_owned(),
        }
    }
}

impl EngineConfig {
    /// Backoff policy derived from the reconnect fields.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(
            self.reconnect_base_delay.as_millis() as u64,
            self.reconnect_max_delay.as_millis() as u64,
            self.max_reconnect_attempts,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.reconnect_base_delay, Duration::from_secs(1));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(10));
        assert_eq!(config.heartbeat_stale_after, Duration::from_secs(15));
        assert_eq!(config.heartbeat_check_period, Duration::from_secs(1));
        assert_eq!(config.action_timeout, Duration::from_secs(8));
        assert_eq!(config.max_steps_per_action, 50);
        assert_eq!(config.max_text_step_chars, 1_000);
        assert_eq!(config.completed_window_capacity, 500);
        assert_eq!(config.protocol_version, "1.0");
    }

    #[test]
    fn derives_the_reconnect_policy() {
        let policy = EngineConfig::default().reconnect_policy();
        assert_eq!(policy.max_attempts(), 10);
        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(10));
    }
}
