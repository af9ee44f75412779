//! Retry policy for webhook deliveries.
//!
//! Exponential backoff: the wait after failed attempt `r` (0-based) is
//! `initial_backoff * multiplier^r`, capped at `max_backoff`.

use crate::config::WebhookSettings;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
}

impl RetryPolicy {
    pub fn new(settings: &WebhookSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            ..Self::default()
        }
    }

    /// Wait before the attempt that follows failed attempt `retry_index`.
    pub fn backoff(&self, retry_index: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry_index as i32);
        let backoff = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(backoff.min(self.max_backoff.as_secs_f64()))
    }

    /// Whether another attempt follows failed attempt `retry_index`.
    pub fn has_next_attempt(&self, retry_index: u32) -> bool {
        retry_index + 1 < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_new_from_settings() {
        let settings = WebhookSettings {
            max_retries: 5,
            initial_backoff_ms: 250,
            max_backoff_ms: 1000,
            ..Default::default()
        };
        let policy = RetryPolicy::new(&settings);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
        assert_eq!(policy.max_backoff, Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let settings = WebhookSettings {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::new(&settings).max_attempts, 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_capped() {
        let policy = RetryPolicy {
            max_backoff: Duration::from_secs(5),
            ..Default::default()
        };
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(5));
        assert_eq!(policy.backoff(20), Duration::from_secs(5));
    }

    #[test]
    fn test_no_backoff_after_final_attempt() {
        let policy = RetryPolicy::default();
        assert!(policy.has_next_attempt(0));
        assert!(policy.has_next_attempt(1));
        assert!(!policy.has_next_attempt(2));
    }
}
