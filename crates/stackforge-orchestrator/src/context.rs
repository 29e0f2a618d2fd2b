//! Deployment context
//!
//! Everything a deployment run needs is carried here explicitly; no
//! component reads ambient process state.

use serde::{Deserialize, Serialize};
use stackforge_resilience::Interrupt;
use stackforge_vars::{names, Scope, VariableStore};
use std::str::FromStr;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{OrchestratorError, Result};
use crate::plan::{DeploymentType, PlanOptions};

/// Target environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Developer sandbox
    Development,
    /// Pre-production
    Staging,
    /// Live traffic
    Production,
}

impl Environment {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Existing stacks may be cleaned up and redeployed
    pub fn default_auto_cleanup(&self) -> bool {
        !matches!(self, Self::Production)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "staging" | "stage" => Ok(Self::Staging),
            "production" | "prod" => Ok(Self::Production),
            other => Err(OrchestratorError::Configuration(format!(
                "unknown environment '{}'",
                other
            ))),
        }
    }
}

/// Requests cancellation of a running deployment
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation; later calls do nothing more
    pub fn cancel(&self) {
        tracing::warn!("cancellation requested");
        self.tx.send_replace(true);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Inputs of one deployment run
#[derive(Debug, Clone)]
pub struct DeploymentContext {
    /// Stack name
    pub stack_name: String,
    /// Shape of the stack
    pub deployment_type: DeploymentType,
    /// Target environment
    pub environment: Environment,
    /// Primary region
    pub region: String,
    /// Regions tried after the primary
    pub fallback_regions: Vec<String>,
    /// Preferred instance class, or `auto`
    pub instance_class: String,
    /// Classes tried after the preferred one
    pub fallback_classes: Vec<String>,
    /// Provider profile the run targets
    pub profile: String,
    /// Plan only, no provider calls
    pub dry_run: bool,
    /// Add a CDN in front of the load balancer
    pub enable_cdn: bool,
    /// Add monitoring
    pub enable_monitoring: bool,
    /// HTTP path for health checks
    pub health_check_path: String,
    /// Compute instances to launch
    pub fleet_size: usize,
    /// Spot bid ceiling, USD/hour
    pub max_spot_price: Option<f64>,
    /// Lowest acceptable capacity confidence
    pub min_confidence: f64,
    /// Existing live resources are torn down before redeploying instead of
    /// failing with `StackAlreadyExists`
    pub auto_cleanup: bool,
    cancel: Option<watch::Receiver<bool>>,
}

impl DeploymentContext {
    /// Development context with stock defaults
    pub fn new(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            deployment_type: DeploymentType::Spot,
            environment: Environment::Development,
            region: "us-east-1".into(),
            fallback_regions: Vec::new(),
            instance_class: "g4dn.xlarge".into(),
            fallback_classes: Vec::new(),
            profile: "sandbox".into(),
            dry_run: false,
            enable_cdn: false,
            enable_monitoring: false,
            health_check_path: "/health".into(),
            fleet_size: 1,
            max_spot_price: None,
            min_confidence: 0.7,
            auto_cleanup: Environment::Development.default_auto_cleanup(),
            cancel: None,
        }
    }

    /// Build from the stack scope of a populated variable store
    pub fn from_variables(store: &VariableStore) -> Result<Self> {
        let scope = Scope::Stack;
        let environment: Environment = store.get_string(names::ENVIRONMENT, scope)?.parse()?;
        let max_price = parse_float(names::MAX_SPOT_PRICE, &store.get_string(names::MAX_SPOT_PRICE, scope)?)?;
        let min_confidence = parse_float(
            names::MIN_CAPACITY_CONFIDENCE,
            &store.get_string(names::MIN_CAPACITY_CONFIDENCE, scope)?,
        )?;
        let fleet_size = usize::try_from(store.get_int(names::FLEET_SIZE, scope)?)
            .map_err(|_| OrchestratorError::Configuration("fleet_size must be positive".into()))?;

        Ok(Self {
            stack_name: store.get_string(names::STACK_NAME, scope)?,
            deployment_type: store.get_string(names::DEPLOYMENT_TYPE, scope)?.parse()?,
            environment,
            region: store.get_string(names::REGION, scope)?,
            fallback_regions: store.get_list(names::FALLBACK_REGIONS, scope)?,
            instance_class: store.get_string(names::INSTANCE_CLASS, scope)?,
            fallback_classes: store.get_list(names::FALLBACK_INSTANCE_CLASSES, scope)?,
            profile: "sandbox".into(),
            dry_run: false,
            enable_cdn: store.get_bool(names::ENABLE_CDN, scope)?,
            enable_monitoring: store.get_bool(names::ENABLE_MONITORING, scope)?,
            health_check_path: store.get_string(names::HEALTH_CHECK_PATH, scope)?,
            fleet_size,
            max_spot_price: Some(max_price),
            min_confidence,
            auto_cleanup: environment.default_auto_cleanup(),
            cancel: None,
        })
    }

    /// Override the environment's cleanup default
    pub fn with_auto_cleanup(mut self, auto_cleanup: bool) -> Self {
        self.auto_cleanup = auto_cleanup;
        self
    }

    /// Plan only
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Provider profile
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Attach a cancellation channel and return its sending half
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        self.cancel = Some(rx);
        (self, CancelHandle { tx })
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Interrupt that fires on cancellation or at `deadline`
    pub fn interrupt(&self, deadline: Instant) -> Interrupt {
        let interrupt = Interrupt::none().with_deadline(deadline);
        match &self.cancel {
            Some(rx) => interrupt.with_cancel(rx.clone()),
            None => interrupt,
        }
    }

    /// Primary region first, then fallbacks, without repeats
    pub fn candidate_regions(&self) -> Vec<String> {
        let mut regions = vec![self.region.clone()];
        for region in &self.fallback_regions {
            if !regions.contains(region) {
                regions.push(region.clone());
            }
        }
        regions
    }

    /// Plan inputs of this context
    pub fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            deployment_type: self.deployment_type,
            enable_cdn: self.enable_cdn,
            enable_monitoring: self.enable_monitoring,
            fleet_size: self.fleet_size,
        }
    }
}

fn parse_float(name: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse()
        .map_err(|_| OrchestratorError::Configuration(format!("{} is not a number: {}", name, raw)))
}
