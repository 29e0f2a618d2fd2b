//! Variable store errors

use stackforge_common::ErrorCategory;
use thiserror::Error;

use crate::value::{Scope, VarType};

/// Variable store error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VariableError {
    /// A declaration with this name exists
    #[error("variable already registered: {0}")]
    DuplicateVariable(String),

    /// No declaration with this name
    #[error("unknown variable: {0}")]
    UnknownVariable(String),

    /// Value does not fit the declared type
    #[error("type mismatch for {name}: expected {expected}, got {found}")]
    TypeMismatch {
        /// Variable name
        name: String,
        /// Declared type
        expected: VarType,
        /// Type of the rejected value
        found: String,
    },

    /// Value rejected by the validator
    #[error("validation failed for {name}: {value}")]
    ValidationFailed {
        /// Variable name
        name: String,
        /// Rejected value
        value: String,
    },

    /// Set at a scope wider than declared
    #[error("variable {name} is declared {declared} and cannot be set at {requested} scope")]
    ScopeViolation {
        /// Variable name
        name: String,
        /// Narrowest allowed scope
        declared: Scope,
        /// Scope of the write
        requested: Scope,
    },

    /// No value and no default
    #[error("variable {0} is not set and has no default")]
    Unset(String),
}

impl VariableError {
    /// Every variable error is an input problem
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Configuration
    }

    /// Name of the offending variable
    pub fn variable(&self) -> &str {
        match self {
            Self::DuplicateVariable(name) | Self::UnknownVariable(name) | Self::Unset(name) => name,
            Self::TypeMismatch { name, .. }
            | Self::ValidationFailed { name, .. }
            | Self::ScopeViolation { name, .. } => name,
        }
    }
}

/// Result alias for the variable store
pub type Result<T> = std::result::Result<T, VariableError>;
