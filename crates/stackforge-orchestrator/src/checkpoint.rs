//! Rollback checkpoints
//!
//! A checkpoint is appended before each phase does provider work. It records
//! which resources existed at that moment, so a failure inside the phase can
//! unwind exactly what the phase created.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::DeploymentPhase;

/// Marker of orchestrator progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackCheckpoint {
    /// Checkpoint name
    pub name: String,
    /// Phase the checkpoint was taken in
    pub phase: DeploymentPhase,
    /// When it was taken
    pub timestamp: DateTime<Utc>,
    /// Live resources when the checkpoint was taken
    pub associated_resource_ids: Vec<String>,
    /// Registry sequence number when the checkpoint was taken
    pub registry_seq: u64,
}

/// Append-only checkpoint log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointLog {
    entries: Vec<RollbackCheckpoint>,
}

impl CheckpointLog {
    /// Empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a checkpoint and return it
    pub fn append(
        &mut self,
        name: impl Into<String>,
        phase: DeploymentPhase,
        associated_resource_ids: Vec<String>,
        registry_seq: u64,
    ) -> &RollbackCheckpoint {
        let checkpoint = RollbackCheckpoint {
            name: name.into(),
            phase,
            timestamp: Utc::now(),
            associated_resource_ids,
            registry_seq,
        };
        tracing::debug!(
            "checkpoint {} ({} resources, seq {})",
            checkpoint.name,
            checkpoint.associated_resource_ids.len(),
            checkpoint.registry_seq
        );
        self.entries.push(checkpoint);
        &self.entries[self.entries.len() - 1]
    }

    /// Most recent checkpoint
    pub fn last(&self) -> Option<&RollbackCheckpoint> {
        self.entries.last()
    }

    /// Every checkpoint, oldest first
    pub fn entries(&self) -> &[RollbackCheckpoint] {
        &self.entries
    }

    /// Number of checkpoints
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// No checkpoint taken yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop the log after a successful deployment
    pub fn discard(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_discard() {
        let mut log = CheckpointLog::new();
        log.append("validating", DeploymentPhase::Validating, vec![], 0);
        log.append(
            "infrastructure",
            DeploymentPhase::ProvisioningInfra,
            vec!["vpc-1".into()],
            1,
        );

        assert_eq!(log.len(), 2);
        assert_eq!(log.last().unwrap().name, "infrastructure");
        assert_eq!(log.last().unwrap().registry_seq, 1);

        log.discard();
        assert!(log.is_empty());
    }

    #[test]
    fn test_serializes_as_list() {
        let mut log = CheckpointLog::new();
        log.append("compute", DeploymentPhase::ProvisioningCompute, vec![], 3);
        let json = serde_json::to_value(&log).unwrap();
        assert!(json.is_array());
    }
}
