//! In-process sandbox cloud
//!
//! Implements every collaborator trait against in-memory state. Prices,
//! capacity, faults and probe outcomes are scriptable, and every call is
//! journaled so callers can assert on exactly what reached the "provider".

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use crate::capacity::{CapacityOffering, ZoneCapacity};
use crate::error::{ProviderError, ProviderResult};
use crate::provider::{
    ApplicationDeployer, CloudProvider, ComputeLauncher, DeployTarget, InstanceHandle,
    InterruptionNotice, InterruptionSource, LaunchSpec,
};
use crate::resource::{ResourceSpec, ResourceState, ResourceType};

/// Sandbox operation, used for fault injection and the call journal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxOp {
    /// `create_resource` of a type
    Create(ResourceType),
    /// `delete_resource` of a type
    Delete(ResourceType),
    /// `describe_resource` of a type
    Describe(ResourceType),
    /// Spot price lookup
    SpotPrice,
    /// Capacity lookup
    Capacity,
    /// Instance launch
    Launch,
    /// Reachability wait
    Reachable,
    /// Application deploy
    Deploy,
    /// Health probe
    Health,
    /// Interruption notice poll
    Interruption,
}

/// One journaled call
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxCall {
    /// Operation called
    pub op: SandboxOp,
    /// Resource id, resource name, or `class@region`
    pub target: String,
}

#[derive(Debug, Clone)]
struct Fault {
    error: ProviderError,
    /// `None` fails forever
    remaining: Option<u32>,
}

#[derive(Debug, Clone)]
struct SandboxResource {
    resource_type: ResourceType,
    name: String,
    region: String,
}

#[derive(Default)]
struct SandboxState {
    next_id: u64,
    resources: BTreeMap<String, SandboxResource>,
    spot_prices: HashMap<(String, String), f64>,
    offerings: HashMap<(String, String), CapacityOffering>,
    faults: HashMap<SandboxOp, VecDeque<Fault>>,
    calls: Vec<SandboxCall>,
    unreachable: bool,
    unhealthy_probes: u32,
    pending_describes: HashMap<ResourceType, u32>,
    interruption: Option<InterruptionNotice>,
}

impl SandboxState {
    fn record(&mut self, op: SandboxOp, target: impl Into<String>) -> ProviderResult<()> {
        self.calls.push(SandboxCall {
            op,
            target: target.into(),
        });

        let Some(queue) = self.faults.get_mut(&op) else {
            return Ok(());
        };
        let Some(front) = queue.front_mut() else {
            return Ok(());
        };

        let error = front.error.clone();
        if let Some(remaining) = front.remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                queue.pop_front();
            }
        }
        Err(error)
    }

    fn allocate_id(&mut self, resource_type: ResourceType) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", resource_type.id_prefix(), self.next_id)
    }
}

/// Instance classes seeded by [`SandboxCloud::with_defaults`]
pub const SANDBOX_CLASSES: [(&str, f64); 4] = [
    ("g4dn.xlarge", 1.19),
    ("g4dn.2xlarge", 2.38),
    ("g4ad.xlarge", 0.95),
    ("g5.xlarge", 1.21),
];

/// Regions seeded by [`SandboxCloud::with_defaults`]
pub const SANDBOX_REGIONS: [&str; 4] = ["us-east-1", "us-west-2", "eu-west-1", "eu-central-1"];

/// In-memory cloud
#[derive(Default)]
pub struct SandboxCloud {
    state: Mutex<SandboxState>,
}

impl SandboxCloud {
    /// Empty sandbox: no markets, no faults
    pub fn new() -> Self {
        Self::default()
    }

    /// Sandbox seeded with deterministic spot markets
    pub fn with_defaults() -> Self {
        let sandbox = Self::new();
        for (r, region) in SANDBOX_REGIONS.iter().enumerate() {
            for (class, on_demand) in SANDBOX_CLASSES {
                let price = on_demand * (0.30 + 0.02 * r as f64);
                let rate = 0.05 + 0.03 * r as f64;
                sandbox.set_market(class, region, price, rate);
            }
        }
        sandbox
    }

    /// Set the spot price for a class in a region
    pub fn set_spot_price(&self, instance_class: &str, region: &str, price: f64) {
        self.state
            .lock()
            .spot_prices
            .insert((instance_class.to_string(), region.to_string()), price);
    }

    /// Set the capacity offering for its class and region
    pub fn set_offering(&self, offering: CapacityOffering) {
        self.state.lock().offerings.insert(
            (offering.instance_class.clone(), offering.region.clone()),
            offering,
        );
    }

    /// Price plus two available zones with the given interruption rate
    pub fn set_market(&self, instance_class: &str, region: &str, price: f64, interruption_rate: f64) {
        self.set_spot_price(instance_class, region, price);
        self.set_offering(
            CapacityOffering::new(instance_class, region)
                .with_zone(ZoneCapacity::new(format!("{}a", region), true, interruption_rate))
                .with_zone(ZoneCapacity::new(format!("{}b", region), true, interruption_rate)),
        );
    }

    /// Fail `op` on every call
    pub fn fail(&self, op: SandboxOp, error: ProviderError) {
        self.state.lock().faults.entry(op).or_default().push_back(Fault {
            error,
            remaining: None,
        });
    }

    /// Fail the next `times` calls of `op`
    pub fn fail_times(&self, op: SandboxOp, error: ProviderError, times: u32) {
        if times == 0 {
            return;
        }
        self.state.lock().faults.entry(op).or_default().push_back(Fault {
            error,
            remaining: Some(times),
        });
    }

    /// Remove all scripted faults
    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    /// Instances never become reachable
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }

    /// The next `probes` health checks report unhealthy
    pub fn set_unhealthy_probes(&self, probes: u32) {
        self.state.lock().unhealthy_probes = probes;
    }

    /// The next `calls` describes of `resource_type` report pending
    pub fn hold_pending(&self, resource_type: ResourceType, calls: u32) {
        self.state.lock().pending_describes.insert(resource_type, calls);
    }

    /// Deliver a reclamation notice to the next poll for its instance
    pub fn schedule_interruption(&self, notice: InterruptionNotice) {
        self.state.lock().interruption = Some(notice);
    }

    /// Journal of every call
    pub fn calls(&self) -> Vec<SandboxCall> {
        self.state.lock().calls.clone()
    }

    /// Total calls received
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Calls received for one operation
    pub fn calls_for(&self, op: SandboxOp) -> usize {
        self.state.lock().calls.iter().filter(|c| c.op == op).count()
    }

    /// Ids of resources that currently exist
    pub fn live_resources(&self) -> Vec<String> {
        self.state.lock().resources.keys().cloned().collect()
    }

    /// Whether a resource currently exists
    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().resources.contains_key(id)
    }

    /// Logical name a resource was created with
    pub fn resource_name(&self, id: &str) -> Option<String> {
        self.state.lock().resources.get(id).map(|r| r.name.clone())
    }
}

#[async_trait]
impl CloudProvider for SandboxCloud {
    fn name(&self) -> &str {
        "sandbox"
    }

    async fn create_resource(&self, resource_type: ResourceType, spec: &ResourceSpec) -> ProviderResult<String> {
        let mut state = self.state.lock();
        state.record(SandboxOp::Create(resource_type), spec.name.clone())?;

        let id = state.allocate_id(resource_type);
        state.resources.insert(
            id.clone(),
            SandboxResource {
                resource_type,
                name: spec.name.clone(),
                region: spec.region.clone(),
            },
        );
        tracing::debug!("sandbox created {} {} ({})", resource_type, id, spec.name);
        Ok(id)
    }

    async fn delete_resource(&self, resource_type: ResourceType, id: &str) -> ProviderResult<()> {
        let mut state = self.state.lock();
        state.record(SandboxOp::Delete(resource_type), id)?;
        state.resources.remove(id);
        Ok(())
    }

    async fn describe_resource(&self, resource_type: ResourceType, id: &str) -> ProviderResult<ResourceState> {
        let mut state = self.state.lock();
        state.record(SandboxOp::Describe(resource_type), id)?;

        if !state.resources.contains_key(id) {
            return Ok(ResourceState::NotFound);
        }
        if let Some(pending) = state.pending_describes.get_mut(&resource_type) {
            if *pending > 0 {
                *pending -= 1;
                return Ok(ResourceState::Pending);
            }
        }
        Ok(ResourceState::Available)
    }

    async fn get_spot_price(&self, instance_class: &str, region: &str) -> ProviderResult<f64> {
        let mut state = self.state.lock();
        state.record(SandboxOp::SpotPrice, format!("{}@{}", instance_class, region))?;

        state
            .spot_prices
            .get(&(instance_class.to_string(), region.to_string()))
            .copied()
            .ok_or_else(|| ProviderError::capacity(instance_class, region))
    }

    async fn list_capacity_offerings(&self, instance_class: &str, region: &str) -> ProviderResult<CapacityOffering> {
        let mut state = self.state.lock();
        state.record(SandboxOp::Capacity, format!("{}@{}", instance_class, region))?;

        Ok(state
            .offerings
            .get(&(instance_class.to_string(), region.to_string()))
            .cloned()
            .unwrap_or_else(|| CapacityOffering::new(instance_class, region)))
    }
}

#[async_trait]
impl ComputeLauncher for SandboxCloud {
    async fn launch_instance(&self, spec: &LaunchSpec) -> ProviderResult<InstanceHandle> {
        let mut state = self.state.lock();
        state.record(
            SandboxOp::Launch,
            format!("{}@{}", spec.instance_class, spec.region),
        )?;

        let id = state.allocate_id(ResourceType::ComputeInstance);
        state.resources.insert(
            id.clone(),
            SandboxResource {
                resource_type: ResourceType::ComputeInstance,
                name: format!("{}-compute", spec.stack_name),
                region: spec.region.clone(),
            },
        );

        let octet = state.next_id % 250 + 2;
        Ok(InstanceHandle {
            instance_id: id,
            region: spec.region.clone(),
            zone: spec.zone.clone(),
            instance_class: spec.instance_class.clone(),
            pricing: spec.pricing,
            address: Some(format!("10.0.1.{}", octet)),
        })
    }

    async fn wait_reachable(&self, handle: &InstanceHandle, _timeout: Duration) -> ProviderResult<bool> {
        let mut state = self.state.lock();
        state.record(SandboxOp::Reachable, handle.instance_id.clone())?;
        Ok(!state.unreachable && state.resources.contains_key(&handle.instance_id))
    }
}

#[async_trait]
impl ApplicationDeployer for SandboxCloud {
    async fn deploy(&self, target: &DeployTarget) -> ProviderResult<()> {
        self.state
            .lock()
            .record(SandboxOp::Deploy, target.instance.instance_id.clone())
    }

    async fn check_health(&self, target: &DeployTarget) -> ProviderResult<bool> {
        let mut state = self.state.lock();
        state.record(SandboxOp::Health, target.instance.instance_id.clone())?;
        if state.unhealthy_probes > 0 {
            state.unhealthy_probes -= 1;
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait]
impl InterruptionSource for SandboxCloud {
    async fn poll_notice(&self, instance_id: &str) -> ProviderResult<Option<InterruptionNotice>> {
        let mut state = self.state.lock();
        state.record(SandboxOp::Interruption, instance_id)?;
        Ok(state
            .interruption
            .as_ref()
            .filter(|n| n.instance_id == instance_id)
            .cloned())
    }
}

impl std::fmt::Debug for SandboxCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SandboxCloud")
            .field("resources", &state.resources.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_delete() {
        let cloud = SandboxCloud::new();
        let spec = ResourceSpec::new("main-vpc", "us-east-1");

        let id = cloud.create_resource(ResourceType::Network, &spec).await.unwrap();
        assert!(id.starts_with("vpc-"));
        assert!(cloud.contains(&id));
        assert_eq!(cloud.resource_name(&id).as_deref(), Some("main-vpc"));

        cloud.delete_resource(ResourceType::Network, &id).await.unwrap();
        assert!(!cloud.contains(&id));

        // Unknown ids delete cleanly
        cloud.delete_resource(ResourceType::Network, &id).await.unwrap();
        assert_eq!(cloud.calls_for(SandboxOp::Delete(ResourceType::Network)), 2);
    }

    #[tokio::test]
    async fn test_fault_injection_counts_down() {
        let cloud = SandboxCloud::new();
        let spec = ResourceSpec::new("main-vpc", "us-east-1");
        cloud.fail_times(
            SandboxOp::Create(ResourceType::Network),
            ProviderError::transient("throttled"),
            2,
        );

        assert!(cloud.create_resource(ResourceType::Network, &spec).await.is_err());
        assert!(cloud.create_resource(ResourceType::Network, &spec).await.is_err());
        assert!(cloud.create_resource(ResourceType::Network, &spec).await.is_ok());
        assert_eq!(cloud.calls_for(SandboxOp::Create(ResourceType::Network)), 3);
    }

    #[tokio::test]
    async fn test_markets() {
        let cloud = SandboxCloud::with_defaults();

        let price = cloud.get_spot_price("g4dn.xlarge", "us-east-1").await.unwrap();
        assert!(price > 0.0 && price < 1.19);

        let offering = cloud
            .list_capacity_offerings("g4dn.xlarge", "us-east-1")
            .await
            .unwrap();
        assert_eq!(offering.zones.len(), 2);

        let missing = cloud.get_spot_price("p3.2xlarge", "us-east-1").await;
        assert!(matches!(missing, Err(ProviderError::CapacityUnavailable { .. })));
    }

    #[tokio::test]
    async fn test_pending_describes() {
        let cloud = SandboxCloud::new();
        let id = cloud
            .create_resource(ResourceType::CdnDistribution, &ResourceSpec::new("cdn", "us-east-1"))
            .await
            .unwrap();
        cloud.hold_pending(ResourceType::CdnDistribution, 1);

        let first = cloud.describe_resource(ResourceType::CdnDistribution, &id).await.unwrap();
        let second = cloud.describe_resource(ResourceType::CdnDistribution, &id).await.unwrap();
        assert_eq!(first, ResourceState::Pending);
        assert_eq!(second, ResourceState::Available);
    }
}
