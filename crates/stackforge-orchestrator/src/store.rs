//! Persisted stack state
//!
//! One record per stack, written at every phase transition so `--status`
//! and `--destroy` work across process restarts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use stackforge_registry::Resource;
use stackforge_spot::Placement;
use stackforge_vars::VarValue;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::checkpoint::CheckpointLog;
use crate::context::Environment;
use crate::plan::DeploymentType;
use crate::rollback::RollbackReport;
use crate::state::DeploymentState;

/// Persisted record of one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackRecord {
    /// Stack name
    pub stack_name: String,
    /// State of the latest run
    pub state: DeploymentState,
    /// Target environment
    pub environment: Environment,
    /// Deployment type
    pub deployment_type: DeploymentType,
    /// Every registered resource, deleted ones included
    pub resources: Vec<Resource>,
    /// Checkpoints of the latest run
    pub checkpoints: CheckpointLog,
    /// Effective stack-scope variables of the run
    pub variables: BTreeMap<String, VarValue>,
    /// Compute placements
    pub placements: Vec<Placement>,
    /// Outcome of the last unwind
    pub rollback_report: Option<RollbackReport>,
    /// Last save
    pub updated_at: DateTime<Utc>,
}

impl StackRecord {
    /// Record with no resources yet
    pub fn new(state: DeploymentState, environment: Environment, deployment_type: DeploymentType) -> Self {
        Self {
            stack_name: state.stack_name.clone(),
            state,
            environment,
            deployment_type,
            resources: Vec::new(),
            checkpoints: CheckpointLog::new(),
            variables: BTreeMap::new(),
            placements: Vec::new(),
            rollback_report: None,
            updated_at: Utc::now(),
        }
    }

    /// Resources not yet deleted
    pub fn live_resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter().filter(|r| r.is_live())
    }

    /// Whether anything is still live
    pub fn has_live_resources(&self) -> bool {
        self.live_resources().next().is_some()
    }
}

/// State store error
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// Stack name unusable as a file name
    #[error("invalid stack key: {0}")]
    InvalidKey(String),

    /// Filesystem failure
    #[error("state I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Corrupt or unwritable record
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable stack state
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Record of `stack_name`, if stored
    async fn load(&self, stack_name: &str) -> Result<Option<StackRecord>, StateStoreError>;

    /// Insert or replace a record
    async fn save(&self, record: &StackRecord) -> Result<(), StateStoreError>;

    /// Stored stack names, sorted
    async fn list(&self) -> Result<Vec<String>, StateStoreError>;

    /// Remove a record; a missing one is not an error
    async fn delete(&self, stack_name: &str) -> Result<(), StateStoreError>;
}

/// In-memory state store
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    records: DashMap<String, StackRecord>,
}

impl InMemoryStateStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, stack_name: &str) -> Result<Option<StackRecord>, StateStoreError> {
        Ok(self.records.get(stack_name).map(|r| r.clone()))
    }

    async fn save(&self, record: &StackRecord) -> Result<(), StateStoreError> {
        self.records.insert(record.stack_name.clone(), record.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StateStoreError> {
        let mut names: Vec<String> = self.records.iter().map(|r| r.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, stack_name: &str) -> Result<(), StateStoreError> {
        self.records.remove(stack_name);
        Ok(())
    }
}

/// One JSON document per stack under a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Store rooted at `dir`; created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, stack_name: &str) -> Result<PathBuf, StateStoreError> {
        let valid = !stack_name.is_empty()
            && stack_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StateStoreError::InvalidKey(stack_name.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", stack_name)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, stack_name: &str) -> Result<Option<StackRecord>, StateStoreError> {
        let path = self.path_for(stack_name)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, record: &StackRecord) -> Result<(), StateStoreError> {
        let path = self.path_for(&record.stack_name)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!("saved {} ({})", record.stack_name, record.state.phase);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, StateStoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, stack_name: &str) -> Result<(), StateStoreError> {
        let path = self.path_for(stack_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeploymentPhase;

    fn record(name: &str) -> StackRecord {
        let mut state = DeploymentState::new(name);
        state.transition(DeploymentPhase::Validating).unwrap();
        let mut record = StackRecord::new(state, Environment::Staging, DeploymentType::Alb);
        record.variables.insert("region".into(), VarValue::from("us-west-2"));
        record.checkpoints.append("validating", DeploymentPhase::Validating, vec![], 0);
        record
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state"));

        assert!(store.load("ml-dev").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());

        let saved = record("ml-dev");
        store.save(&saved).await.unwrap();
        store.save(&record("api-prod")).await.unwrap();

        let loaded = store.load("ml-dev").await.unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(store.list().await.unwrap(), vec!["api-prod", "ml-dev"]);
        assert!(!dir.path().join("state/ml-dev.json.tmp").exists());

        store.delete("ml-dev").await.unwrap();
        store.delete("ml-dev").await.unwrap();
        assert!(store.load("ml-dev").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let err = store.load("../etc/passwd").await.unwrap_err();
        assert!(matches!(err, StateStoreError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ml-dev.json"), "{ not json").unwrap();
        let store = FileStateStore::new(dir.path());
        let err = store.load("ml-dev").await.unwrap_err();
        assert!(matches!(err, StateStoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryStateStore::new();
        store.save(&record("ml-dev")).await.unwrap();
        assert!(store.load("ml-dev").await.unwrap().is_some());
        assert_eq!(store.list().await.unwrap(), vec!["ml-dev"]);
        store.delete("ml-dev").await.unwrap();
        assert!(store.load("ml-dev").await.unwrap().is_none());
    }
}
