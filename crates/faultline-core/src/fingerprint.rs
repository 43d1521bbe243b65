// Error fingerprinting
//
// A fingerprint groups morally-equivalent failures:
//
//     lower(event_type) ":" normalize(error_code) ":" workflow_id
//
// `normalize` lowercases, trims, and strips volatile tokens (uuids, long hex
// runs, numeric ids) by class substitution so that "db timeout shard 1042"
// and "db timeout shard 977" land in the same incident. The substitution set
// is fixed at construction and reported for the audit record.

use regex::Regex;
use uuid::Uuid;

/// Error code used when the payload carries none.
pub const UNKNOWN_ERROR_CODE: &str = "unknown";

/// Deterministic fingerprint derivation. Pure: no I/O, no clock.
pub struct Fingerprinter {
    substitutions: Vec<(Regex, &'static str)>,
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

impl Fingerprinter {
    /// Build with the fixed substitution set.
    ///
    /// Order matters: uuids before hex runs before digit runs, so a uuid is
    /// not first mangled by the narrower classes.
    pub fn new() -> Self {
        let substitutions = vec![
            (
                Regex::new(r"\b[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\b")
                    .expect("uuid pattern is valid"),
                "U",
            ),
            (
                Regex::new(r"\b[0-9a-f]{8,}\b").expect("hex pattern is valid"),
                "H",
            ),
            (
                Regex::new(r"\b[0-9]{3,}\b").expect("digit pattern is valid"),
                "N",
            ),
        ];
        Self { substitutions }
    }

    /// Derive the signature for an event.
    pub fn fingerprint(
        &self,
        event_type: &str,
        error_code: Option<&str>,
        workflow_id: Uuid,
    ) -> String {
        let code = error_code.unwrap_or(UNKNOWN_ERROR_CODE);
        format!(
            "{}:{}:{}",
            event_type.to_lowercase(),
            self.normalize(code),
            workflow_id
        )
    }

    /// Lowercase, trim, and substitute volatile token classes.
    pub fn normalize(&self, error_code: &str) -> String {
        let mut out = error_code.trim().to_lowercase();
        for (pattern, replacement) in &self.substitutions {
            out = pattern.replace_all(&out, *replacement).into_owned();
        }
        out
    }

    /// Human-readable description of the substitution set, recorded in the
    /// audit trail alongside decisions derived from signatures.
    pub fn audit_description(&self) -> Vec<String> {
        self.substitutions
            .iter()
            .map(|(pattern, replacement)| format!("{} -> {}", pattern.as_str(), replacement))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wf() -> Uuid {
        "018f2e9a-0000-7000-8000-0123456789ab".parse().unwrap()
    }

    #[test]
    fn fingerprint_shape() {
        let fp = Fingerprinter::new();
        let sig = fp.fingerprint("payment.failed", Some("timeout"), wf());
        assert_eq!(sig, format!("payment.failed:timeout:{}", wf()));
    }

    #[test]
    fn fingerprint_is_pure() {
        let fp = Fingerprinter::new();
        let a = fp.fingerprint("payment.failed", Some("timeout"), wf());
        let b = fp.fingerprint("payment.failed", Some("timeout"), wf());
        assert_eq!(a, b);
    }

    #[test]
    fn missing_error_code_uses_the_documented_literal() {
        let fp = Fingerprinter::new();
        let sig = fp.fingerprint("job.failed", None, wf());
        assert_eq!(sig, format!("job.failed:unknown:{}", wf()));
    }

    #[test]
    fn event_type_is_lowercased() {
        let fp = Fingerprinter::new();
        let sig = fp.fingerprint("Payment.Failed", Some("timeout"), wf());
        assert!(sig.starts_with("payment.failed:"));
    }

    #[test]
    fn numeric_ids_collapse() {
        let fp = Fingerprinter::new();
        assert_eq!(
            fp.normalize("db timeout shard 1042"),
            fp.normalize("db timeout shard 977")
        );
        assert_eq!(fp.normalize("db timeout shard 1042"), "db timeout shard N");
    }

    #[test]
    fn short_numbers_survive() {
        let fp = Fingerprinter::new();
        assert_eq!(fp.normalize("http 502"), "http N");
        assert_eq!(fp.normalize("exit 42"), "exit 42");
    }

    #[test]
    fn hex_runs_collapse() {
        let fp = Fingerprinter::new();
        assert_eq!(fp.normalize("txn deadbeef01 aborted"), "txn H aborted");
        // short hex stays
        assert_eq!(fp.normalize("code beef"), "code beef");
    }

    #[test]
    fn uuids_collapse_as_one_token() {
        let fp = Fingerprinter::new();
        assert_eq!(
            fp.normalize("lock 018f2e9a-aaaa-7bbb-8ccc-0123456789ab held"),
            "lock U held"
        );
    }

    #[test]
    fn whitespace_is_trimmed() {
        let fp = Fingerprinter::new();
        assert_eq!(fp.normalize("  TIMEOUT  "), "timeout");
    }

    #[test]
    fn audit_description_lists_every_substitution() {
        let fp = Fingerprinter::new();
        assert_eq!(fp.audit_description().len(), 3);
    }
}
