//! Deployment phases and state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{OrchestratorError, Result};

/// Deployment phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeploymentPhase {
    /// Run created
    Initializing,
    /// Checking inputs
    Validating,
    /// Creating network, storage and edge resources
    ProvisioningInfra,
    /// Launching compute
    ProvisioningCompute,
    /// Shipping the application
    DeployingApplication,
    /// Waiting for health checks
    ValidatingHealth,
    /// Deployment succeeded
    Completed,
    /// Unwinding after a failure
    RollingBack,
    /// Unwind finished
    RolledBack,
    /// Stopped with resources possibly left behind
    Failed,
    /// Tearing the stack down
    Destroying,
    /// Stack removed
    Destroyed,
}

impl DeploymentPhase {
    /// Next phase of a successful deployment
    pub fn next(&self) -> Option<DeploymentPhase> {
        use DeploymentPhase::*;
        match self {
            Initializing => Some(Validating),
            Validating => Some(ProvisioningInfra),
            ProvisioningInfra => Some(ProvisioningCompute),
            ProvisioningCompute => Some(DeployingApplication),
            DeployingApplication => Some(ValidatingHealth),
            ValidatingHealth => Some(Completed),
            _ => None,
        }
    }

    /// No further work happens in this phase without a new request
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::RolledBack | Self::Failed | Self::Destroyed
        )
    }

    /// A deployment run is still driving this stack
    pub fn is_in_progress(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether the state machine allows moving to `to`
    pub fn can_transition_to(&self, to: DeploymentPhase) -> bool {
        use DeploymentPhase::*;
        if self.next() == Some(to) {
            return true;
        }
        match (self, to) {
            (RollingBack, RolledBack) | (RollingBack, Failed) => true,
            (Destroying, Destroyed) | (Destroying, Failed) => true,
            (RollingBack | Destroying | Destroyed, RollingBack) => false,
            (_, RollingBack) => true,
            (Destroying, Destroying) => false,
            (_, Destroying) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Upper snake case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "INITIALIZING",
            Self::Validating => "VALIDATING",
            Self::ProvisioningInfra => "PROVISIONING_INFRA",
            Self::ProvisioningCompute => "PROVISIONING_COMPUTE",
            Self::DeployingApplication => "DEPLOYING_APPLICATION",
            Self::ValidatingHealth => "VALIDATING_HEALTH",
            Self::Completed => "COMPLETED",
            Self::RollingBack => "ROLLING_BACK",
            Self::RolledBack => "ROLLED_BACK",
            Self::Failed => "FAILED",
            Self::Destroying => "DESTROYING",
            Self::Destroyed => "DESTROYED",
        }
    }
}

impl std::fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Stable error code, e.g. `QUOTA_EXCEEDED`
    pub code: String,
    /// Error message
    pub message: String,
    /// Extra key/value detail
    pub context: BTreeMap<String, String>,
    /// Phase the error happened in
    pub phase: DeploymentPhase,
    /// When it happened
    pub at: DateTime<Utc>,
}

/// Phase change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseChange {
    /// Phase left
    pub from: DeploymentPhase,
    /// Phase entered
    pub to: DeploymentPhase,
    /// When it happened
    pub at: DateTime<Utc>,
}

/// Deployment state of one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentState {
    /// Unique id of this run
    pub run_id: Uuid,
    /// Stack name
    pub stack_name: String,
    /// Current phase
    pub phase: DeploymentPhase,
    /// Errors in order
    pub errors: Vec<ErrorRecord>,
    /// Phase changes in order
    pub history: Vec<PhaseChange>,
    /// Run start
    pub started_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
    /// Set on reaching a terminal phase
    pub finished_at: Option<DateTime<Utc>>,
}

impl DeploymentState {
    /// Fresh run in `Initializing`
    pub fn new(stack_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            stack_name: stack_name.into(),
            phase: DeploymentPhase::Initializing,
            errors: Vec::new(),
            history: Vec::new(),
            started_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Move to `to`, rejecting moves the state machine does not allow
    pub fn transition(&mut self, to: DeploymentPhase) -> Result<()> {
        if !self.phase.can_transition_to(to) {
            return Err(OrchestratorError::InvalidPhaseTransition { from: self.phase, to });
        }

        let now = Utc::now();
        tracing::info!("{}: {} -> {}", self.stack_name, self.phase, to);
        self.history.push(PhaseChange {
            from: self.phase,
            to,
            at: now,
        });
        self.phase = to;
        self.updated_at = now;
        if to.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Append an error in the current phase
    pub fn record_error(&mut self, code: &str, message: impl Into<String>, context: BTreeMap<String, String>) {
        let now = Utc::now();
        self.errors.push(ErrorRecord {
            code: code.to_string(),
            message: message.into(),
            context,
            phase: self.phase,
            at: now,
        });
        self.updated_at = now;
    }

    /// Phase the run was in when it first failed
    pub fn failed_phase(&self) -> Option<DeploymentPhase> {
        self.errors.first().map(|e| e.phase)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentPhase::*;

    #[test]
    fn test_happy_path_order() {
        let mut phase = Initializing;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            assert!(phase.can_transition_to(next));
            phase = next;
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![
                Initializing,
                Validating,
                ProvisioningInfra,
                ProvisioningCompute,
                DeployingApplication,
                ValidatingHealth,
                Completed
            ]
        );
    }

    #[test]
    fn test_rollback_and_destroy_edges() {
        assert!(ProvisioningCompute.can_transition_to(RollingBack));
        assert!(Completed.can_transition_to(RollingBack));
        assert!(RollingBack.can_transition_to(RolledBack));
        assert!(RollingBack.can_transition_to(Failed));
        assert!(!RollingBack.can_transition_to(RollingBack));
        assert!(!RolledBack.can_transition_to(Completed));

        assert!(Completed.can_transition_to(Destroying));
        assert!(Failed.can_transition_to(Destroying));
        assert!(Destroying.can_transition_to(Destroyed));
        assert!(!Destroyed.can_transition_to(RollingBack));
        assert!(!Destroying.can_transition_to(Destroying));

        assert!(ValidatingHealth.can_transition_to(Failed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Initializing.can_transition_to(Completed));
    }

    #[test]
    fn test_state_records_history() {
        let mut state = DeploymentState::new("ml-prod");
        state.transition(Validating).unwrap();
        state.record_error("VALIDATION_ERROR", "bad region", BTreeMap::new());
        state.transition(Failed).unwrap();

        assert_eq!(state.history.len(), 2);
        assert_eq!(state.failed_phase(), Some(Validating));
        assert!(state.finished_at.is_some());

        let err = state.transition(Completed).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidPhaseTransition { .. }));
    }

    #[test]
    fn test_phase_serde_names() {
        let json = serde_json::to_string(&ProvisioningInfra).unwrap();
        assert_eq!(json, "\"PROVISIONING_INFRA\"");
    }
}
