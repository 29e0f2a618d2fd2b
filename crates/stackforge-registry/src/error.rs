//! Registry errors

use stackforge_common::ErrorCategory;
use thiserror::Error;

use crate::resource::ResourceStatus;

/// Registry error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Dependency missing or already deleted
    #[error("resource {id} depends on unregistered or deleted resource {missing}")]
    InvalidDependency {
        /// Resource being registered
        id: String,
        /// Dependency that could not be found
        missing: String,
    },

    /// Id registered twice
    #[error("resource already registered: {0}")]
    DuplicateResource(String),

    /// Status move not allowed
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// Resource being moved
        id: String,
        /// Current status
        from: ResourceStatus,
        /// Requested status
        to: ResourceStatus,
    },

    /// Id never registered
    #[error("unknown resource: {0}")]
    UnknownResource(String),

    /// Cleanup order impossible
    #[error("dependency cycle detected among: {}", .0.join(", "))]
    DependencyCycleDetected(Vec<String>),
}

impl RegistryError {
    /// Shared error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidDependency { .. } | Self::DependencyCycleDetected(_) => ErrorCategory::Dependency,
            Self::DuplicateResource(_) | Self::InvalidTransition { .. } | Self::UnknownResource(_) => {
                ErrorCategory::InternalInvariant
            }
        }
    }
}

/// Result alias for the registry
pub type Result<T> = std::result::Result<T, RegistryError>;
