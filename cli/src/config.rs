//! CLI Configuration
//!
//! ```toml
//! [variables]
//! region = "us-west-2"
//! fallback_regions = ["us-east-1"]
//! max_spot_price = "1.50"
//!
//! [orchestrator]
//! rollback_scope = "full"
//! state_dir = "/var/lib/stackforge"
//!
//! [orchestrator.retry]
//! max_attempts = 5
//! ```

use serde::{Deserialize, Serialize};
use stackforge_orchestrator::OrchestratorConfig;
use stackforge_vars::{Scope, VarValue, VariableStore};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CliError;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Global values for the standard deployment variables
    pub variables: BTreeMap<String, toml::Value>,
    pub orchestrator: OrchestratorConfig,
}

impl CliConfig {
    /// Load `explicit`, or the per-user config file when it exists
    pub fn load(explicit: Option<&Path>) -> Result<Self, CliError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = fs::read_to_string(&path).map_err(|source| CliError::ReadConfig {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&content).map_err(|source| CliError::ParseConfig {
            path: path.clone(),
            source,
        })?;
        tracing::debug!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// `$XDG_CONFIG_HOME/stackforge/config.toml` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stackforge").join("config.toml"))
    }

    /// Store every `[variables]` entry at global scope
    pub fn apply(&self, store: &VariableStore) -> Result<(), CliError> {
        for (name, value) in &self.variables {
            let value = to_var_value(name, value)?;
            store.set(name, value, Scope::Global)?;
        }
        Ok(())
    }
}

fn to_var_value(name: &str, value: &toml::Value) -> Result<VarValue, CliError> {
    let converted = match value {
        toml::Value::String(s) => VarValue::from(s.as_str()),
        toml::Value::Integer(i) => VarValue::from(*i),
        toml::Value::Boolean(b) => VarValue::from(*b),
        // prices and confidences are declared as strings
        toml::Value::Float(f) => VarValue::from(f.to_string()),
        toml::Value::Array(items) => {
            let strings: Option<Vec<String>> = items.iter().map(|v| v.as_str().map(str::to_string)).collect();
            match strings {
                Some(list) => VarValue::from(list),
                None => {
                    return Err(CliError::InvalidArgument(format!(
                        "variable {} must be a list of strings",
                        name
                    )))
                }
            }
        }
        other => {
            return Err(CliError::InvalidArgument(format!(
                "unsupported value for variable {}: {}",
                name, other
            )))
        }
    };
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackforge_orchestrator::RollbackScope;
    use stackforge_vars::{names, register_deployment_variables};

    const SAMPLE: &str = r#"
[variables]
region = "us-west-2"
fallback_regions = ["us-east-1", "eu-west-1"]
max_spot_price = 1.5
fleet_size = 2
enable_monitoring = true

[orchestrator]
rollback_scope = "full"

[orchestrator.retry]
max_attempts = 5
"#;

    #[test]
    fn test_parse_and_apply() {
        let config = CliConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.orchestrator.rollback_scope, RollbackScope::Full);
        assert_eq!(config.orchestrator.retry.max_attempts, 5);
        assert_eq!(config.orchestrator.timeouts.health_check_secs, 120);

        let store = VariableStore::new();
        register_deployment_variables(&store).unwrap();
        config.apply(&store).unwrap();

        assert_eq!(store.get_string(names::REGION, Scope::Stack).unwrap(), "us-west-2");
        assert_eq!(store.get_int(names::FLEET_SIZE, Scope::Stack).unwrap(), 2);
        assert!(store.get_bool(names::ENABLE_MONITORING, Scope::Stack).unwrap());
        assert_eq!(store.get_string(names::MAX_SPOT_PRICE, Scope::Global).unwrap(), "1.5");
    }

    #[test]
    fn test_invalid_variable_is_rejected() {
        let config = CliConfig::parse("[variables]\nregion = \"mars-north-1\"\n").unwrap();
        let store = VariableStore::new();
        register_deployment_variables(&store).unwrap();
        assert_eq!(config.apply(&store).unwrap_err().exit_code(), 2);
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, SAMPLE).unwrap();
        assert!(CliConfig::load(Some(&path)).is_ok());

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            CliConfig::load(Some(&missing)),
            Err(CliError::ReadConfig { .. })
        ));

        fs::write(&path, "[orchestrator\n").unwrap();
        assert!(matches!(
            CliConfig::load(Some(&path)),
            Err(CliError::ParseConfig { .. })
        ));
    }
}
