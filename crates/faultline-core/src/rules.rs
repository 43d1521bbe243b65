// Error-code rules lookup
//
// Read-only after load. Unknown codes map to the documented default:
// medium severity, the "default" retry policy, retryable.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::incident::Severity;

/// Name of the retry policy applied when no rule matches.
pub const DEFAULT_RETRY_POLICY: &str = "default";

/// What the safety fabric knows about one error code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRule {
    /// Initial incident severity for this code.
    pub severity: Severity,
    /// Named retry policy in [`crate::retry::RetryPolicies`].
    pub retry_policy: String,
    /// Whether automated retry is permitted at all.
    pub retryable: bool,
}

impl Default for ErrorRule {
    fn default() -> Self {
        Self {
            severity: Severity::Medium,
            retry_policy: DEFAULT_RETRY_POLICY.to_string(),
            retryable: true,
        }
    }
}

/// Rules table, loaded at startup and never mutated under load.
/// Reload happens by constructing a new table and swapping the handle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesTable {
    /// Normalized error code -> rule.
    #[serde(default)]
    rules: HashMap<String, ErrorRule>,
    /// Rule applied to unknown codes.
    #[serde(default)]
    default_rule: ErrorRule,
}

impl RulesTable {
    pub fn new(rules: HashMap<String, ErrorRule>) -> Self {
        Self {
            rules,
            default_rule: ErrorRule::default(),
        }
    }

    /// Look up the rule for a (normalized) error code.
    pub fn lookup(&self, error_code: &str) -> &ErrorRule {
        self.rules.get(error_code).unwrap_or(&self.default_rule)
    }

    /// Number of explicit rules (excludes the default).
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RulesTable {
        let mut rules = HashMap::new();
        rules.insert(
            "timeout".to_string(),
            ErrorRule {
                severity: Severity::High,
                retry_policy: "aggressive".to_string(),
                retryable: true,
            },
        );
        rules.insert(
            "invalid_credentials".to_string(),
            ErrorRule {
                severity: Severity::Critical,
                retry_policy: DEFAULT_RETRY_POLICY.to_string(),
                retryable: false,
            },
        );
        RulesTable::new(rules)
    }

    #[test]
    fn known_code_uses_its_rule() {
        let t = table();
        let rule = t.lookup("timeout");
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.retry_policy, "aggressive");
        assert!(rule.retryable);
    }

    #[test]
    fn non_retryable_code() {
        let t = table();
        assert!(!t.lookup("invalid_credentials").retryable);
    }

    #[test]
    fn unknown_code_maps_to_the_documented_default() {
        let t = table();
        let rule = t.lookup("never_seen_before");
        assert_eq!(rule.severity, Severity::Medium);
        assert_eq!(rule.retry_policy, DEFAULT_RETRY_POLICY);
        assert!(rule.retryable);
    }
}
