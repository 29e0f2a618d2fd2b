//! StackForge Resource Registry
//!
//! Tracks every provisioned resource of a stack, its dependencies and its
//! lifecycle status, and computes a safe destruction order.
//!
//! ```text
//!   register ──► CREATING ──► CREATED ──► DELETING ──► DELETED
//!                   │            │           │
//!                   └────────────┴───────────┴──► FAILED ──► CREATING (retry)
//!                                                    │
//!                                                    └──► DELETING (cleanup)
//! ```
//!
//! Dependencies must already be registered, so the graph is acyclic by
//! construction. Cleanup order destroys dependents before the resources they
//! depend on, breaking ties by reverse registration order.

#![warn(missing_docs)]

pub mod error;
pub mod registry;
pub mod resource;

pub use error::{RegistryError, Result};
pub use registry::{Registration, ResourceFilter, ResourceRegistry};
pub use resource::{Resource, ResourceStatus};
