//! Collaborator interfaces
//!
//! The engine never talks to a cloud SDK directly. Adapters implement these
//! traits and are injected into the selector and orchestrator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::capacity::CapacityOffering;
use crate::error::ProviderResult;
use crate::resource::{ResourceSpec, ResourceState, ResourceType};

/// Abstract cloud provider
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Adapter name for logging
    fn name(&self) -> &str;

    /// Create a resource and return its provider-assigned id
    async fn create_resource(&self, resource_type: ResourceType, spec: &ResourceSpec) -> ProviderResult<String>;

    /// Delete a resource. Deleting an unknown id must succeed.
    async fn delete_resource(&self, resource_type: ResourceType, id: &str) -> ProviderResult<()>;

    /// Describe the provider-side state of a resource
    async fn describe_resource(&self, resource_type: ResourceType, id: &str) -> ProviderResult<ResourceState>;

    /// Current spot price (USD/hour)
    async fn get_spot_price(&self, instance_class: &str, region: &str) -> ProviderResult<f64>;

    /// Per-zone capacity offerings
    async fn list_capacity_offerings(&self, instance_class: &str, region: &str) -> ProviderResult<CapacityOffering>;
}

/// Pricing model of a compute placement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PricingModel {
    /// Interruptible capacity at market price
    Spot,
    /// Regular capacity at list price
    OnDemand,
}

impl std::fmt::Display for PricingModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spot => f.write_str("spot"),
            Self::OnDemand => f.write_str("on-demand"),
        }
    }
}

/// Compute launch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSpec {
    /// Stack the instance belongs to
    pub stack_name: String,
    /// Target region
    pub region: String,
    /// Target zone; the provider picks one when unset
    pub zone: Option<String>,
    /// Instance class to launch
    pub instance_class: String,
    /// Spot or on-demand
    pub pricing: PricingModel,
    /// Bid ceiling for spot launches
    pub max_price: Option<f64>,
    /// Registry ids of the network resources the instance attaches to
    pub attachments: BTreeMap<String, String>,
}

/// Handle to a launched instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceHandle {
    /// Provider instance id
    pub instance_id: String,
    /// Region the instance runs in
    pub region: String,
    /// Zone the instance landed in
    pub zone: Option<String>,
    /// Instance class launched
    pub instance_class: String,
    /// Pricing the instance was launched with
    pub pricing: PricingModel,
    /// Reachable address, once assigned
    pub address: Option<String>,
}

/// Compute launch collaborator
#[async_trait]
pub trait ComputeLauncher: Send + Sync {
    /// Launch one instance
    async fn launch_instance(&self, spec: &LaunchSpec) -> ProviderResult<InstanceHandle>;

    /// Wait up to `timeout` for the instance to accept connections
    async fn wait_reachable(&self, handle: &InstanceHandle, timeout: Duration) -> ProviderResult<bool>;
}

/// Where the application gets deployed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployTarget {
    /// Stack being deployed
    pub stack_name: String,
    /// Instance receiving the application
    pub instance: InstanceHandle,
    /// Public entry point (load balancer or CDN), if any
    pub endpoint: Option<String>,
    /// Path probed by health checks
    pub health_check_path: String,
}

/// Application deploy collaborator. Opaque beyond success or failure.
#[async_trait]
pub trait ApplicationDeployer: Send + Sync {
    /// Deploy the application to one instance
    async fn deploy(&self, target: &DeployTarget) -> ProviderResult<()>;

    /// One health probe; `Ok(false)` means not healthy yet
    async fn check_health(&self, target: &DeployTarget) -> ProviderResult<bool>;
}

/// Imminent compute reclamation notice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptionNotice {
    /// Instance about to be reclaimed
    pub instance_id: String,
    /// Provider action, e.g. `terminate` or `stop`
    pub action: String,
    /// When the provider reclaims the instance
    pub reclaim_at: Option<DateTime<Utc>>,
}

impl InterruptionNotice {
    /// Time left before reclamation, if known
    pub fn time_remaining(&self) -> Option<Duration> {
        self.reclaim_at
            .and_then(|at| (at - Utc::now()).to_std().ok())
    }
}

/// Source of reclamation notices
#[async_trait]
pub trait InterruptionSource: Send + Sync {
    /// Pending notice for `instance_id`, if any
    async fn poll_notice(&self, instance_id: &str) -> ProviderResult<Option<InterruptionNotice>>;
}

/// Side effect triggered when a notice arrives
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    /// Drain work before the instance goes away
    async fn graceful_shutdown(&self, notice: &InterruptionNotice);
}
