// Error taxonomy for the ingestion path
//
// Rejections are data: each carries a stable wire code and whatever hint the
// caller can act on. The API crate owns the mapping to HTTP status classes;
// nothing here knows about HTTP. Duplicates are NOT errors - the pipeline
// returns them as a success-shaped outcome.

use std::time::Duration;

use thiserror::Error;

/// Stable wire codes for rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCode {
    Validation,
    TenantInactive,
    NotFound,
    WorkflowDisabled,
    RateLimited,
    BreakerOpen,
    Internal,
}

impl RejectCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::TenantInactive => "tenant_inactive",
            Self::NotFound => "not_found",
            Self::WorkflowDisabled => "workflow_disabled",
            Self::RateLimited => "rate_limited",
            Self::BreakerOpen => "breaker_open",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for RejectCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an event submission was rejected.
///
/// Input and safety rejections are local and terminal to the request; the
/// core never retries them. Transient store failures are surfaced as
/// retryable and leave no partial row behind.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Schema violation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Tenant present but not active.
    #[error("tenant is inactive")]
    TenantInactive,

    /// Tenant missing.
    #[error("tenant not found")]
    TenantNotFound,

    /// Workflow missing for the tenant.
    #[error("workflow not found")]
    WorkflowNotFound,

    /// Workflow inactive or kill-switched.
    #[error("workflow disabled: {reason}")]
    WorkflowDisabled { reason: String },

    /// Sliding-window limit exceeded for the tenant or vendor key.
    #[error("rate limited on {key}")]
    RateLimited {
        /// The limiter key that rejected the request.
        key: String,
        /// Hint: when the caller may try again.
        retry_after: Duration,
    },

    /// The vendor's circuit breaker is open (or half-open with the probe
    /// budget spent).
    #[error("circuit breaker open for vendor {vendor}")]
    BreakerOpen { vendor: String },

    /// Store or cache infrastructure failure; retryable.
    #[error("transient store failure: {0}")]
    TransientStore(#[source] anyhow::Error),
}

impl IngestError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn workflow_disabled(reason: impl Into<String>) -> Self {
        Self::WorkflowDisabled {
            reason: reason.into(),
        }
    }

    /// Stable wire code for this rejection.
    pub fn code(&self) -> RejectCode {
        match self {
            Self::Validation(_) => RejectCode::Validation,
            Self::TenantInactive => RejectCode::TenantInactive,
            Self::TenantNotFound | Self::WorkflowNotFound => RejectCode::NotFound,
            Self::WorkflowDisabled { .. } => RejectCode::WorkflowDisabled,
            Self::RateLimited { .. } => RejectCode::RateLimited,
            Self::BreakerOpen { .. } => RejectCode::BreakerOpen,
            Self::TransientStore(_) => RejectCode::Internal,
        }
    }

    /// Whether the caller may usefully retry the same submission.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::BreakerOpen { .. } | Self::TransientStore(_)
        )
    }

    /// Retry-after hint, when the rejection carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            IngestError::validation("bad").code().as_str(),
            "validation"
        );
        assert_eq!(IngestError::TenantInactive.code().as_str(), "tenant_inactive");
        assert_eq!(IngestError::TenantNotFound.code().as_str(), "not_found");
        assert_eq!(IngestError::WorkflowNotFound.code().as_str(), "not_found");
        assert_eq!(
            IngestError::workflow_disabled("switched off").code().as_str(),
            "workflow_disabled"
        );
        assert_eq!(
            IngestError::BreakerOpen {
                vendor: "stripe".into()
            }
            .code()
            .as_str(),
            "breaker_open"
        );
    }

    #[test]
    fn rate_limit_carries_a_retry_hint() {
        let err = IngestError::RateLimited {
            key: "tenant:t1".into(),
            retry_after: Duration::from_secs(12),
        };
        assert!(err.is_retryable());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(12)));
    }

    #[test]
    fn input_rejections_are_not_retryable() {
        assert!(!IngestError::validation("bad").is_retryable());
        assert!(!IngestError::TenantInactive.is_retryable());
        assert!(!IngestError::workflow_disabled("off").is_retryable());
    }
}
