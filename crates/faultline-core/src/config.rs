// Configuration surface
//
// Read-only at runtime. Binaries load this once (JSON file named by
// FAULTLINE_CONFIG, falling back to defaults), construct the handles, and
// inject them; nothing reloads under load. Connection strings stay in the
// environment (DATABASE_URL, REDIS_URL), following the usual twelve-factor
// split between wiring and policy.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::{RetryPolicies, RetryPolicy};
use crate::rules::{ErrorRule, RulesTable};

/// Circuit breaker tuning for one vendor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakerConfig {
    /// Recorded failures within the window that open the breaker.
    pub threshold: u32,

    /// How long an open breaker sheds traffic before probing.
    #[serde(with = "duration_millis")]
    pub cooldown: Duration,

    /// Rolling window over which failures are counted.
    #[serde(with = "duration_millis")]
    pub window: Duration,

    /// Maximum unresolved probes while half-open.
    pub probe_cap: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(60),
            window: Duration::from_secs(300),
            probe_cap: 2,
        }
    }
}

/// Rate limit tuning for one key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Admissions allowed per sliding minute.
    pub per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { per_minute: 600 }
    }
}

/// Per-vendor protective controls.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VendorConfig {
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Global remediation limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GlobalLimits {
    /// Retry budget per (tenant, workflow) incident.
    pub max_retries_per_workflow: u32,
    /// Vendor failure budget per trailing hour.
    pub max_retries_per_vendor_per_hour: u32,
}

impl Default for GlobalLimits {
    fn default() -> Self {
        Self {
            max_retries_per_workflow: 3,
            max_retries_per_vendor_per_hour: 20,
        }
    }
}

/// The whole injected configuration surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Error-code rules (code -> severity + retry policy).
    #[serde(default)]
    pub rules: HashMap<String, ErrorRule>,

    /// Named retry policies.
    #[serde(default)]
    pub retry_policies: HashMap<String, RetryPolicy>,

    /// Vendor protective controls, keyed by vendor name.
    #[serde(default)]
    pub vendors: HashMap<String, VendorConfig>,

    /// Global remediation limits.
    #[serde(default)]
    pub limits: GlobalLimits,

    /// Tenant-level default rate limit.
    #[serde(default)]
    pub tenant_rate_limit: RateLimitConfig,

    /// `occurred_at` drift beyond which a skew warning is recorded.
    #[serde(default = "default_clock_skew_tolerance", with = "duration_millis")]
    pub clock_skew_tolerance: Duration,
}

fn default_clock_skew_tolerance() -> Duration {
    Duration::from_secs(300)
}

impl AppConfig {
    /// Parse from a JSON document.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Rules table handle.
    pub fn rules_table(&self) -> RulesTable {
        RulesTable::new(self.rules.clone())
    }

    /// Retry policy set handle.
    pub fn retry_policies(&self) -> RetryPolicies {
        RetryPolicies::new(self.retry_policies.clone())
    }

    /// Vendor config, with defaults for vendors the file does not name.
    pub fn vendor(&self, name: &str) -> VendorConfig {
        self.vendors.get(name).cloned().unwrap_or_default()
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
