//! Retry limits and exponential backoff shared by both side-effect stages

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Upper bound on side-effect attempts, `-1` meaning unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetryLimit(i32);

impl RetryLimit {
    pub const UNLIMITED: RetryLimit = RetryLimit(-1);

    pub fn limited(attempts: u32) -> Self {
        RetryLimit(attempts.min(i32::MAX as u32) as i32)
    }

    /// Accepts the raw sentinel form; anything below `-1` is rejected
    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw >= -1).then_some(RetryLimit(raw))
    }

    pub fn raw(&self) -> i32 {
        self.0
    }

    pub fn is_unlimited(&self) -> bool {
        self.0 < 0
    }

    /// True once `attempts` failed attempts have used up the limit
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        !self.is_unlimited() && attempts >= self.0 as u32
    }
}

impl Default for RetryLimit {
    fn default() -> Self {
        RetryLimit::UNLIMITED
    }
}

impl fmt::Display for RetryLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unlimited() { write!(f, "unlimited") } else { write!(f, "{}", self.0) }
    }
}

/// Exponential backoff: `min(base * 2^attempt, cap)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap:  Duration
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let base_ms = self.base.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms).min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self { base: Duration::from_millis(1000), cap: Duration::from_millis(60_000) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_cap() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(1000));
        assert_eq!(backoff.delay(1), Duration::from_millis(2000));
        assert_eq!(backoff.delay(5), Duration::from_millis(32_000));
        assert_eq!(backoff.delay(6), Duration::from_millis(60_000));
        assert_eq!(backoff.delay(200), Duration::from_millis(60_000));
    }

    #[test]
    fn test_retry_limit_sentinel() {
        assert!(RetryLimit::UNLIMITED.is_unlimited());
        assert!(!RetryLimit::UNLIMITED.is_exhausted(u32::MAX));

        let limit = RetryLimit::limited(3);
        assert!(!limit.is_exhausted(2));
        assert!(limit.is_exhausted(3));

        assert_eq!(RetryLimit::from_raw(-1), Some(RetryLimit::UNLIMITED));
        assert_eq!(RetryLimit::from_raw(-2), None);
        assert_eq!(serde_json::to_string(&RetryLimit::UNLIMITED).unwrap(), "-1");
    }
}
