//! Error taxonomy shared by every StackForge crate

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Provider error subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderErrorKind {
    /// No capacity for the requested placement
    CapacityUnavailable,
    /// Account quota exhausted
    QuotaExceeded,
    /// Credentials lack a permission
    PermissionDenied,
    /// Provider API unreachable or throttled
    TransientNetwork,
}

/// Error raised by a provider adapter.
///
/// Adapters translate their SDK failures into one of these variants at the
/// boundary; nothing downstream inspects provider error text.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProviderError {
    /// Capacity unavailable
    #[error("capacity unavailable for {instance_class} in {region}: {message}")]
    CapacityUnavailable {
        /// Instance class requested
        instance_class: String,
        /// Region the request went to
        region: String,
        /// Provider message
        message: String,
    },

    /// Quota exceeded
    #[error("quota exceeded ({quota}): {message}")]
    QuotaExceeded { quota: String, message: String },

    /// Permission denied
    #[error("permission denied ({permission}): {message}")]
    PermissionDenied { permission: String, message: String },

    /// Transient network error
    #[error("transient network error: {0}")]
    TransientNetwork(String),
}

impl ProviderError {
    /// Get the subtype
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::CapacityUnavailable { .. } => ProviderErrorKind::CapacityUnavailable,
            Self::QuotaExceeded { .. } => ProviderErrorKind::QuotaExceeded,
            Self::PermissionDenied { .. } => ProviderErrorKind::PermissionDenied,
            Self::TransientNetwork(_) => ProviderErrorKind::TransientNetwork,
        }
    }

    /// Quota and permission failures are deterministic and never retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ProviderErrorKind::TransientNetwork | ProviderErrorKind::CapacityUnavailable
        )
    }

    /// Minimal remediation hint shown to the operator
    pub fn remediation_hint(&self) -> String {
        match self {
            Self::CapacityUnavailable { .. } => {
                "retry later, or widen the candidate regions and fallback instance classes".into()
            }
            Self::QuotaExceeded { quota, .. } => {
                format!("request a quota increase for '{}'", quota)
            }
            Self::PermissionDenied { permission, .. } => {
                format!("check credentials and grant '{}' to the active profile", permission)
            }
            Self::TransientNetwork(_) => "retry the operation once the provider API is reachable".into(),
        }
    }

    /// Shorthand for a transient failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientNetwork(message.into())
    }

    /// Shorthand for a capacity failure
    pub fn capacity(instance_class: impl Into<String>, region: impl Into<String>) -> Self {
        Self::CapacityUnavailable {
            instance_class: instance_class.into(),
            region: region.into(),
            message: "insufficient capacity".into(),
        }
    }
}

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Error category used for reporting and exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// Bad CLI input or invalid variable shape
    Configuration,
    /// A value or deployment failed a validation check
    Validation,
    /// Registry ordering violation
    Dependency,
    /// Provider failure
    Provider(ProviderErrorKind),
    /// A bounded wait ran out
    Timeout,
    /// The operator cancelled the run
    Cancelled,
    /// Failure while unwinding
    Rollback,
    /// Should never happen
    InternalInvariant,
}

impl ErrorCategory {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration => "CONFIGURATION_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::Dependency => "DEPENDENCY_ERROR",
            Self::Provider(ProviderErrorKind::CapacityUnavailable) => "CAPACITY_UNAVAILABLE",
            Self::Provider(ProviderErrorKind::QuotaExceeded) => "QUOTA_EXCEEDED",
            Self::Provider(ProviderErrorKind::PermissionDenied) => "PERMISSION_DENIED",
            Self::Provider(ProviderErrorKind::TransientNetwork) => "TRANSIENT_NETWORK_ERROR",
            Self::Timeout => "TIMEOUT_EXCEEDED",
            Self::Cancelled => "CANCELLED",
            Self::Rollback => "ROLLBACK_ERROR",
            Self::InternalInvariant => "INTERNAL_INVARIANT_VIOLATION",
        }
    }

    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration => 2,
            Self::Provider(_) => 3,
            Self::Validation => 4,
            Self::Rollback => 5,
            Self::Dependency | Self::Timeout | Self::Cancelled | Self::InternalInvariant => 1,
        }
    }

    /// Whether the category indicates a programming or ordering bug
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Dependency | Self::InternalInvariant)
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl From<ProviderErrorKind> for ErrorCategory {
    fn from(kind: ProviderErrorKind) -> Self {
        Self::Provider(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(ProviderError::transient("reset").is_retryable());
        assert!(ProviderError::capacity("g4dn.xlarge", "us-east-1").is_retryable());

        let quota = ProviderError::QuotaExceeded {
            quota: "Running On-Demand G instances".into(),
            message: "limit 0".into(),
        };
        assert!(!quota.is_retryable());
        assert!(quota.remediation_hint().contains("Running On-Demand G instances"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(ErrorCategory::Configuration.exit_code(), 2);
        assert_eq!(ErrorCategory::Provider(ProviderErrorKind::QuotaExceeded).exit_code(), 3);
        assert_eq!(ErrorCategory::Validation.exit_code(), 4);
        assert_eq!(ErrorCategory::Rollback.exit_code(), 5);
        assert_eq!(ErrorCategory::InternalInvariant.exit_code(), 1);
    }

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            ErrorCategory::Configuration,
            ErrorCategory::Validation,
            ErrorCategory::Dependency,
            ErrorCategory::Provider(ProviderErrorKind::CapacityUnavailable),
            ErrorCategory::Provider(ProviderErrorKind::QuotaExceeded),
            ErrorCategory::Provider(ProviderErrorKind::PermissionDenied),
            ErrorCategory::Provider(ProviderErrorKind::TransientNetwork),
            ErrorCategory::Timeout,
            ErrorCategory::Cancelled,
            ErrorCategory::Rollback,
            ErrorCategory::InternalInvariant,
        ];
        let codes: std::collections::HashSet<_> = all.iter().map(|c| c.code()).collect();
        assert_eq!(codes.len(), all.len());
    }
}
