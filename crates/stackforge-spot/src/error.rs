//! Selector errors

use stackforge_common::{ErrorCategory, ProviderError, ProviderErrorKind};
use thiserror::Error;

/// Selector error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpotError {
    /// No market passed the filters
    #[error("no spot capacity for [{}] in [{}]", .classes.join(", "), .regions.join(", "))]
    NoCapacityAvailable {
        /// Classes tried, preferred first
        classes: Vec<String>,
        /// Regions tried
        regions: Vec<String>,
    },

    /// Empty region list
    #[error("no candidate regions given")]
    NoCandidateRegions,

    /// Quota and permission failures end the search
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl SpotError {
    /// Shared error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::NoCapacityAvailable { .. } => ErrorCategory::Provider(ProviderErrorKind::CapacityUnavailable),
            Self::NoCandidateRegions => ErrorCategory::Configuration,
            Self::Provider(e) => ErrorCategory::Provider(e.kind()),
        }
    }
}

/// Result alias for the selector
pub type Result<T> = std::result::Result<T, SpotError>;
