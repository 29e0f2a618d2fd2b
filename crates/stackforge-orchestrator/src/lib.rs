//! StackForge Deployment Orchestrator
//!
//! Drives a stack through its deployment phases, checkpointing and
//! persisting state at every transition, and unwinds it on failure.
//!
//! ```text
//!   INITIALIZING ──► VALIDATING ──► PROVISIONING_INFRA ──► PROVISIONING_COMPUTE
//!                                                                 │
//!        COMPLETED ◄── VALIDATING_HEALTH ◄── DEPLOYING_APPLICATION ◄┘
//!
//!   any non-terminal phase ──► ROLLING_BACK ──► ROLLED_BACK | FAILED
//!   any phase               ──► DESTROYING   ──► DESTROYED   | FAILED
//! ```
//!
//! # Failure handling
//!
//! | Policy     | Effect                                                   |
//! |------------|----------------------------------------------------------|
//! | `retry`    | Backoff and retry; escalates once attempts are exhausted |
//! | `skip`     | Optional resources only; recorded and left out           |
//! | `rollback` | Unwind to the last checkpoint (or fully) and stop        |
//! | `abort`    | Parallel emergency cleanup, then `FAILED`                |
//!
//! Stack records are written through a [`StateStore`] so status, rollback
//! and destroy work from a fresh process.

#![warn(missing_docs)]

pub mod checkpoint;
pub mod config;
pub mod context;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod policy;
pub mod rollback;
pub mod state;
pub mod store;

pub use checkpoint::{CheckpointLog, RollbackCheckpoint};
pub use config::{OrchestratorConfig, RetryConfig, RollbackScope, SelectorSettings, TimeoutConfig};
pub use context::{CancelHandle, DeploymentContext, Environment};
pub use error::{OrchestratorError, Result};
pub use orchestrator::{
    DeploymentOutcome, LogEntry, LogKind, LoggingShutdownHook, Orchestrator, OrchestratorBuilder,
};
pub use plan::{DeploymentType, PlanOptions, PlannedResource, ResourcePlan};
pub use policy::{FailurePolicy, PolicyTable};
pub use rollback::{CleanupFailure, RollbackExecutor, RollbackReport};
pub use state::{DeploymentPhase, DeploymentState, ErrorRecord, PhaseChange};
pub use store::{FileStateStore, InMemoryStateStore, StackRecord, StateStore, StateStoreError};
