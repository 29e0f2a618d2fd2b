//! CLI errors

use stackforge_common::ErrorCategory;
use stackforge_orchestrator::OrchestratorError;
use stackforge_vars::VariableError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cannot read config {path}: {source}")]
    ReadConfig {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("unknown provider profile '{0}' (available: sandbox)")]
    UnknownProfile(String),

    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    #[error("cannot render output: {0}")]
    Output(String),
}

impl CliError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument(_)
            | Self::ReadConfig { .. }
            | Self::ParseConfig { .. }
            | Self::UnknownProfile(_) => ErrorCategory::Configuration,
            Self::Variable(e) => e.category(),
            Self::Orchestrator(e) => e.category(),
            Self::Output(_) => ErrorCategory::InternalInvariant,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.category().exit_code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::UnknownProfile("aws".into()).exit_code(), 2);
        assert_eq!(
            CliError::Orchestrator(OrchestratorError::StackNotFound("ml-dev".into())).exit_code(),
            2
        );
        assert_eq!(
            CliError::Orchestrator(OrchestratorError::HealthCheckFailed("down".into())).exit_code(),
            4
        );
        assert_eq!(CliError::Output("broken pipe".into()).exit_code(), 1);
    }
}
