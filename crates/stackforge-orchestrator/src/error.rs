//! Orchestrator errors

use stackforge_common::{ErrorCategory, ProviderError, ResourceType};
use stackforge_registry::RegistryError;
use stackforge_spot::SpotError;
use stackforge_vars::VariableError;
use std::time::Duration;
use thiserror::Error;

use crate::rollback::RollbackReport;
use crate::state::DeploymentPhase;
use crate::store::StateStoreError;

/// Orchestrator error
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Bad configuration or input
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Variable store failure
    #[error(transparent)]
    Variable(#[from] VariableError),

    /// Registry failure
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Cloud provider failure
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Placement selection failure
    #[error(transparent)]
    Spot(#[from] SpotError),

    /// A bounded wait ran out
    #[error("{operation} did not complete within {waited:?}")]
    Timeout {
        /// What was being waited for
        operation: String,
        /// How long
        waited: Duration,
    },

    /// Health validation failed
    #[error("health check failed: {0}")]
    HealthCheckFailed(String),

    /// Provider reported a failed state
    #[error("{resource_type} {id} entered provider state {state}")]
    ResourceFailed {
        /// Kind of resource
        resource_type: ResourceType,
        /// Provider id
        id: String,
        /// Provider state
        state: String,
    },

    /// Cancellation was requested
    #[error("deployment cancelled")]
    Cancelled,

    /// The whole deployment ran out of time
    #[error("deployment exceeded its {0:?} limit")]
    DeploymentTimeout(Duration),

    /// Stack has live resources and cleanup is off
    #[error("stack {0} already has live resources")]
    StackAlreadyExists(String),

    /// Another run owns the stack
    #[error("stack {0} has a deployment in progress")]
    DeploymentInProgress(String),

    /// No record of the stack
    #[error("stack not found: {0}")]
    StackNotFound(String),

    /// State machine rejected a move
    #[error("invalid phase transition: {from} -> {to}")]
    InvalidPhaseTransition {
        /// Current phase
        from: DeploymentPhase,
        /// Requested phase
        to: DeploymentPhase,
    },

    /// State store failure
    #[error(transparent)]
    State(#[from] StateStoreError),

    /// Unwind left resources behind
    #[error("rollback left {} resource(s) needing manual cleanup", .0.needs_manual_cleanup.len())]
    RollbackIncomplete(RollbackReport),

    /// A deployment failed and was handled
    #[error("deployment of {stack} failed in {phase}: {source}")]
    DeploymentFailed {
        /// Stack name
        stack: String,
        /// Phase it failed in
        phase: DeploymentPhase,
        /// Root cause
        source: Box<OrchestratorError>,
        /// Unwind outcome, when one ran
        rollback: Option<RollbackReport>,
    },
}

impl OrchestratorError {
    /// Category used for policy lookup and exit codes
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::StackNotFound(_) => ErrorCategory::Configuration,
            Self::Variable(e) => e.category(),
            Self::Registry(e) => e.category(),
            Self::Provider(e) => ErrorCategory::Provider(e.kind()),
            Self::Spot(e) => e.category(),
            Self::Timeout { .. } | Self::DeploymentTimeout(_) => ErrorCategory::Timeout,
            Self::HealthCheckFailed(_) | Self::ResourceFailed { .. } => ErrorCategory::Validation,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::StackAlreadyExists(_) | Self::DeploymentInProgress(_) => ErrorCategory::Validation,
            Self::InvalidPhaseTransition { .. } | Self::State(_) => ErrorCategory::InternalInvariant,
            Self::RollbackIncomplete(_) => ErrorCategory::Rollback,
            Self::DeploymentFailed { source, rollback, .. } => match rollback {
                Some(report) if !report.is_complete() => ErrorCategory::Rollback,
                _ => source.category(),
            },
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        self.category().code()
    }

    /// Operator hint for expected failures
    pub fn remediation_hint(&self) -> Option<String> {
        match self {
            Self::Provider(e) => Some(e.remediation_hint()),
            Self::Spot(SpotError::Provider(e)) => Some(e.remediation_hint()),
            Self::Spot(SpotError::NoCapacityAvailable { .. }) => {
                Some("retry later, or widen the candidate regions and fallback instance classes".into())
            }
            Self::StackAlreadyExists(name) => Some(format!(
                "destroy the existing stack first: stackforge {} --destroy",
                name
            )),
            Self::DeploymentInProgress(name) => Some(format!(
                "wait for the running deployment, or inspect it with: stackforge {} --status",
                name
            )),
            Self::Timeout { .. } | Self::DeploymentTimeout(_) => {
                Some("raise the timeout in the config file, or retry once the provider settles".into())
            }
            Self::HealthCheckFailed(_) => Some("check the application logs on the instance".into()),
            Self::RollbackIncomplete(_) => Some("delete the listed resources manually".into()),
            Self::DeploymentFailed { source, rollback, .. } => match rollback {
                Some(report) if !report.is_complete() => Some("delete the listed resources manually".into()),
                _ => source.remediation_hint(),
            },
            _ => None,
        }
    }

    /// Resources a failed unwind left behind
    pub fn manual_cleanup(&self) -> &[String] {
        match self {
            Self::RollbackIncomplete(report) => &report.needs_manual_cleanup,
            Self::DeploymentFailed {
                rollback: Some(report), ..
            } => &report.needs_manual_cleanup,
            _ => &[],
        }
    }

    /// Phase a deployment failed in, if known
    pub fn phase(&self) -> Option<DeploymentPhase> {
        match self {
            Self::DeploymentFailed { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Innermost error of a wrapped deployment failure
    pub fn root(&self) -> &OrchestratorError {
        match self {
            Self::DeploymentFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result alias for the orchestrator
pub type Result<T> = std::result::Result<T, OrchestratorError>;
