//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use stackforge_common::ResourceType;
use stackforge_resilience::RetryPolicy;
use stackforge_spot::SelectorConfig;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::context::Environment;
use crate::error::{OrchestratorError, Result};
use crate::policy::{FailurePolicy, PolicyTable};

/// How much an in-deployment failure unwinds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RollbackScope {
    /// Resources created since the last checkpoint
    #[default]
    LastCheckpoint,
    /// Every live resource of the stack
    Full,
}

/// Retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per call, including the first
    pub max_attempts: u32,
    /// First backoff delay
    pub base_delay_ms: u64,
    /// 0 disables the cap
    pub max_delay_secs: u64,
    /// Randomize backoff delays
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_secs: 60,
            jitter: false,
        }
    }
}

/// Spot selector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorSettings {
    /// Single price lookups cache lifetime
    pub price_ttl_secs: u64,
    /// Bulk price and capacity lookups cache lifetime
    pub bulk_ttl_secs: u64,
    /// Entries per cache
    pub cache_capacity: u64,
}

impl Default for SelectorSettings {
    fn default() -> Self {
        Self {
            price_ttl_secs: 300,
            bulk_ttl_secs: 3600,
            cache_capacity: 1024,
        }
    }
}

/// Bounded waits, in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Compute instance reachability
    pub reachable_secs: u64,
    /// Per resource readiness
    pub resource_ready_secs: u64,
    /// Application health validation
    pub health_check_secs: u64,
    /// Time between polls, at least 1
    pub poll_interval_secs: u64,
    /// Whole deployment
    pub deployment_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            reachable_secs: 300,
            resource_ready_secs: 900,
            health_check_secs: 120,
            poll_interval_secs: 10,
            deployment_secs: 3600,
        }
    }
}

impl TimeoutConfig {
    /// Reachability wait
    pub fn reachable(&self) -> Duration {
        Duration::from_secs(self.reachable_secs)
    }

    /// Readiness wait
    pub fn resource_ready(&self) -> Duration {
        Duration::from_secs(self.resource_ready_secs)
    }

    /// Health validation wait
    pub fn health_check(&self) -> Duration {
        Duration::from_secs(self.health_check_secs)
    }

    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Whole deployment budget
    pub fn deployment(&self) -> Duration {
        Duration::from_secs(self.deployment_secs)
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Retry settings
    pub retry: RetryConfig,
    /// Spot selector settings
    pub selector: SelectorSettings,
    /// Bounded waits
    pub timeouts: TimeoutConfig,
    /// What a failed deployment tears down
    pub rollback_scope: RollbackScope,
    /// Where stack records live
    pub state_dir: PathBuf,
    /// Per resource type overrides, keyed by kebab-case type name
    pub failure_policies: BTreeMap<String, FailurePolicy>,
    /// Environments whose existing stacks are cleaned up before redeploying
    pub auto_cleanup_environments: Vec<Environment>,
    /// Seconds between interruption notice polls
    pub interruption_poll_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            selector: SelectorSettings::default(),
            timeouts: TimeoutConfig::default(),
            rollback_scope: RollbackScope::default(),
            state_dir: PathBuf::from(".stackforge/state"),
            failure_policies: BTreeMap::new(),
            auto_cleanup_environments: vec![Environment::Development, Environment::Staging],
            interruption_poll_secs: 5,
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| OrchestratorError::Configuration(e.to_string()))
    }

    /// Retry policy for provider calls
    pub fn retry_policy(&self) -> RetryPolicy {
        let max_delay = (self.retry.max_delay_secs > 0).then(|| Duration::from_secs(self.retry.max_delay_secs));
        RetryPolicy::new(self.retry.max_attempts, Duration::from_millis(self.retry.base_delay_ms))
            .with_max_delay(max_delay)
            .with_jitter(self.retry.jitter)
    }

    /// Selector configuration; the price and confidence limits come from
    /// the deployment context
    pub fn selector_config(&self, min_confidence: f64, max_price: Option<f64>) -> SelectorConfig {
        SelectorConfig {
            min_confidence,
            max_price,
            price_ttl: Duration::from_secs(self.selector.price_ttl_secs),
            bulk_ttl: Duration::from_secs(self.selector.bulk_ttl_secs),
            cache_capacity: self.selector.cache_capacity,
            retry: self.retry_policy(),
        }
    }

    /// Failure policy table with the configured overrides
    pub fn policy_table(&self) -> Result<PolicyTable> {
        let mut table = PolicyTable::new();
        for (name, policy) in &self.failure_policies {
            let resource_type: ResourceType = name
                .parse()
                .map_err(OrchestratorError::Configuration)?;
            table = table.with_type(resource_type, *policy);
        }
        Ok(table)
    }

    /// Interruption poll interval
    pub fn interruption_interval(&self) -> Duration {
        Duration::from_secs(self.interruption_poll_secs.max(1))
    }

    /// Whether `environment` replaces existing stacks
    pub fn auto_cleanup(&self, environment: Environment) -> bool {
        self.auto_cleanup_environments.contains(&environment)
    }
}
