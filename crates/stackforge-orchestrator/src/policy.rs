//! Failure policies
//!
//! Every phase failure is mapped to one of four reactions:
//!
//! | Policy | Reaction |
//! |--------|----------|
//! | `retry` | Run the step again through the retry engine, then continue |
//! | `rollback` | Unwind through the rollback executor and stop |
//! | `skip` | Log and continue (optional sub-resources only) |
//! | `abort` | Emergency cleanup without dependency order |
//!
//! Callers may override the default mapping per resource type or per error
//! category.

use serde::{Deserialize, Serialize};
use stackforge_common::{ErrorCategory, ProviderErrorKind, ResourceType};
use std::collections::HashMap;

use crate::error::OrchestratorError;

/// Reaction to a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Retry with backoff, then escalate
    Retry,
    /// Unwind what was created
    Rollback,
    /// Drop the resource and continue
    Skip,
    /// Stop at once with a best-effort cleanup
    Abort,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retry => f.write_str("retry"),
            Self::Rollback => f.write_str("rollback"),
            Self::Skip => f.write_str("skip"),
            Self::Abort => f.write_str("abort"),
        }
    }
}

/// Policy lookup table
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    by_type: HashMap<ResourceType, FailurePolicy>,
    by_category: HashMap<ErrorCategory, FailurePolicy>,
}

impl PolicyTable {
    /// Built-in defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the policy for every failure of one resource type
    pub fn with_type(mut self, resource_type: ResourceType, policy: FailurePolicy) -> Self {
        self.by_type.insert(resource_type, policy);
        self
    }

    /// Override the policy for one error category
    pub fn with_category(mut self, category: ErrorCategory, policy: FailurePolicy) -> Self {
        self.by_category.insert(category, policy);
        self
    }

    /// Policy for a failed step.
    ///
    /// `resource` is the resource being provisioned, if any. Cancellation
    /// always rolls back. A `skip` is only honored for optional resources.
    pub fn decide(&self, category: ErrorCategory, resource: Option<ResourceType>) -> FailurePolicy {
        if category == ErrorCategory::Cancelled {
            return FailurePolicy::Rollback;
        }

        let optional = resource.map(|t| t.is_optional()).unwrap_or(false);
        let chosen = resource
            .and_then(|t| self.by_type.get(&t).copied())
            .or_else(|| self.by_category.get(&category).copied())
            .unwrap_or_else(|| default_policy(category, optional));

        if chosen == FailurePolicy::Skip && !optional {
            tracing::warn!("skip policy ignored for required resource; rolling back instead");
            return FailurePolicy::Rollback;
        }
        chosen
    }

    /// Policy for a failed step's error. Cancellation and an expired
    /// deployment deadline roll back whatever the overrides say.
    pub fn decide_for(&self, error: &OrchestratorError, resource: Option<ResourceType>) -> FailurePolicy {
        match error {
            OrchestratorError::Cancelled | OrchestratorError::DeploymentTimeout(_) => FailurePolicy::Rollback,
            other => self.decide(other.category(), resource),
        }
    }

    /// Policy once retries for a `retry` decision are exhausted
    pub fn escalate(&self, resource: Option<ResourceType>) -> FailurePolicy {
        match resource {
            Some(t) if t.is_optional() => FailurePolicy::Skip,
            _ => FailurePolicy::Rollback,
        }
    }
}

fn default_policy(category: ErrorCategory, optional: bool) -> FailurePolicy {
    let policy = match category {
        ErrorCategory::Provider(ProviderErrorKind::TransientNetwork)
        | ErrorCategory::Provider(ProviderErrorKind::CapacityUnavailable) => FailurePolicy::Retry,
        ErrorCategory::Dependency | ErrorCategory::InternalInvariant => FailurePolicy::Abort,
        _ => FailurePolicy::Rollback,
    };
    if optional && policy == FailurePolicy::Rollback {
        FailurePolicy::Skip
    } else {
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_mapping() {
        let table = PolicyTable::new();
        let transient = ErrorCategory::Provider(ProviderErrorKind::TransientNetwork);
        let quota = ErrorCategory::Provider(ProviderErrorKind::QuotaExceeded);

        assert_eq!(table.decide(transient, Some(ResourceType::Network)), FailurePolicy::Retry);
        assert_eq!(table.decide(quota, Some(ResourceType::Network)), FailurePolicy::Rollback);
        assert_eq!(table.decide(ErrorCategory::Timeout, None), FailurePolicy::Rollback);
        assert_eq!(table.decide(ErrorCategory::Dependency, None), FailurePolicy::Abort);
        assert_eq!(table.decide(ErrorCategory::InternalInvariant, None), FailurePolicy::Abort);
    }

    #[test]
    fn test_optional_resources_skip() {
        let table = PolicyTable::new();
        let quota = ErrorCategory::Provider(ProviderErrorKind::QuotaExceeded);
        assert_eq!(table.decide(quota, Some(ResourceType::CdnDistribution)), FailurePolicy::Skip);
        assert_eq!(table.escalate(Some(ResourceType::MonitoringDashboard)), FailurePolicy::Skip);
        assert_eq!(table.escalate(Some(ResourceType::ComputeInstance)), FailurePolicy::Rollback);
    }

    #[test]
    fn test_overrides() {
        let table = PolicyTable::new()
            .with_type(ResourceType::CdnDistribution, FailurePolicy::Rollback)
            .with_category(ErrorCategory::Timeout, FailurePolicy::Abort)
            .with_type(ResourceType::Storage, FailurePolicy::Skip);

        let quota = ErrorCategory::Provider(ProviderErrorKind::QuotaExceeded);
        assert_eq!(table.decide(quota, Some(ResourceType::CdnDistribution)), FailurePolicy::Rollback);
        assert_eq!(table.decide(ErrorCategory::Timeout, None), FailurePolicy::Abort);
        // skip is never honored for a required resource
        assert_eq!(table.decide(quota, Some(ResourceType::Storage)), FailurePolicy::Rollback);
    }

    #[test]
    fn test_cancellation_always_rolls_back() {
        let table = PolicyTable::new().with_category(ErrorCategory::Cancelled, FailurePolicy::Abort);
        assert_eq!(table.decide(ErrorCategory::Cancelled, None), FailurePolicy::Rollback);
    }

    #[test]
    fn test_deployment_deadline_always_rolls_back() {
        let table = PolicyTable::new()
            .with_category(ErrorCategory::Timeout, FailurePolicy::Abort)
            .with_type(ResourceType::ComputeInstance, FailurePolicy::Retry);
        let expired = OrchestratorError::DeploymentTimeout(std::time::Duration::from_secs(3600));

        // optional resources would otherwise skip past an expired deadline
        assert_eq!(
            PolicyTable::new().decide_for(&expired, Some(ResourceType::CdnDistribution)),
            FailurePolicy::Rollback
        );
        assert_eq!(table.decide_for(&expired, None), FailurePolicy::Rollback);
        assert_eq!(
            table.decide_for(&expired, Some(ResourceType::ComputeInstance)),
            FailurePolicy::Rollback
        );
        assert_eq!(
            table.decide_for(&OrchestratorError::Cancelled, Some(ResourceType::MonitoringDashboard)),
            FailurePolicy::Rollback
        );

        // a readiness timeout still follows the table
        let slow = OrchestratorError::Timeout {
            operation: "cdn readiness".into(),
            waited: std::time::Duration::from_secs(900),
        };
        assert_eq!(table.decide_for(&slow, None), FailurePolicy::Abort);
    }
}
