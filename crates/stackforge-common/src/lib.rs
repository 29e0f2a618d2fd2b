//! StackForge Common
//!
//! Shared vocabulary for the deployment engine:
//! - Resource and capacity domain types
//! - Error taxonomy (configuration, dependency, provider, timeout, rollback)
//! - Collaborator interfaces (cloud provider, compute launch, application deploy)
//! - An in-process sandbox that implements every collaborator
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                       DEPLOYMENT ENGINE                           │
//! │                                                                   │
//! │  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────────┐  │
//! │  │ Variable  │  │ Resource  │  │   Spot    │  │  Orchestrator │  │
//! │  │   Store   │  │ Registry  │  │ Selector  │  │  + Rollback   │  │
//! │  └───────────┘  └───────────┘  └─────┬─────┘  └───────┬───────┘  │
//! │                                      │                │          │
//! │                                      ▼                ▼          │
//! │  ┌────────────────────────────────────────────────────────────┐  │
//! │  │  CloudProvider  |  ComputeLauncher  |  ApplicationDeployer  │  │
//! │  └────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod capacity;
pub mod error;
pub mod provider;
pub mod resource;
pub mod sandbox;

pub use capacity::{CapacityLevel, CapacityOffering, ZoneCapacity};
pub use error::{ErrorCategory, ProviderError, ProviderErrorKind, ProviderResult};
pub use provider::{
    ApplicationDeployer, CloudProvider, ComputeLauncher, DeployTarget, InstanceHandle,
    InterruptionNotice, InterruptionSource, LaunchSpec, PricingModel, ShutdownHook,
};
pub use resource::{ResourceSpec, ResourceState, ResourceType};
pub use sandbox::{SandboxCall, SandboxCloud, SandboxOp};
