// Retry policies
//
// Bounded exponential backoff with jitter to avoid thundering herd. For
// attempt k (1-indexed):
//
//     base     = initial_delay * multiplier^(k-1)
//     capped   = min(base, max_delay)
//     jittered = capped * (1 + uniform(-jitter, +jitter))

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::rules::DEFAULT_RETRY_POLICY;

/// Configuration for one named retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Whether this policy permits automated retry at all.
    pub retryable: bool,

    /// Maximum retry attempts before escalation.
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,

    /// Cap on the backoff delay.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Backoff multiplier (e.g. 2.0 for exponential).
    pub multiplier: f64,

    /// Jitter factor in `[0, 1]`; 0.2 means ±20% randomness.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retryable: true,
            max_retries: 3,
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30 * 60),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            retryable: false,
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Backoff before attempt `k` (1-indexed), jitter applied.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let mut rng = rand::thread_rng();
            let factor = 1.0 + rng.gen_range(-self.jitter..=self.jitter);
            (capped * factor).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }

    /// Whether attempt `k` (1-indexed) is within the budget.
    pub fn permits_attempt(&self, attempt: u32) -> bool {
        self.retryable && attempt <= self.max_retries
    }
}

/// Named retry policies, read-only after load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryPolicies {
    #[serde(default)]
    policies: HashMap<String, RetryPolicy>,
    /// Applied when a name does not resolve (including `default` itself,
    /// unless the table overrides it).
    #[serde(default)]
    fallback: RetryPolicy,
}

impl RetryPolicies {
    pub fn new(policies: HashMap<String, RetryPolicy>) -> Self {
        Self {
            policies,
            fallback: RetryPolicy::default(),
        }
    }

    /// Resolve a named policy, falling back to `default` for unknown names.
    pub fn get(&self, name: &str) -> &RetryPolicy {
        self.policies
            .get(name)
            .or_else(|| self.policies.get(DEFAULT_RETRY_POLICY))
            .unwrap_or(&self.fallback)
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_without_jitter_is_exact() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped_at_max() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(1))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(5))
            .with_jitter(0.0);

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(5));
    }

    #[test]
    fn jittered_delay_stays_within_bounds() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_secs(10))
            .with_multiplier(2.0)
            .with_max_delay(Duration::from_secs(600))
            .with_jitter(0.2);

        for attempt in 1..=8 {
            let base = 10.0 * 2.0_f64.powi(attempt as i32 - 1);
            let capped = base.min(600.0);
            for _ in 0..50 {
                let delay = policy.delay_for_attempt(attempt).as_secs_f64();
                assert!(
                    delay >= 0.8 * capped - 1e-9 && delay <= 1.2 * capped + 1e-9,
                    "attempt {attempt}: {delay} outside [{}, {}]",
                    0.8 * capped,
                    1.2 * capped
                );
            }
        }
    }

    #[test]
    fn budget_edge_is_inclusive() {
        let policy = RetryPolicy::new().with_max_retries(2);
        assert!(policy.permits_attempt(1));
        assert!(policy.permits_attempt(2));
        assert!(!policy.permits_attempt(3));
    }

    #[test]
    fn non_retryable_policy_permits_nothing() {
        let policy = RetryPolicy::no_retry();
        assert!(!policy.permits_attempt(1));
    }

    #[test]
    fn unknown_policy_name_falls_back_to_default() {
        let policies = RetryPolicies::default();
        assert_eq!(policies.get("nope"), policies.get(DEFAULT_RETRY_POLICY));
    }

    #[test]
    fn serialization_round_trips() {
        let policy = RetryPolicy::new().with_max_retries(7);
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
