//! Resource plans
//!
//! A plan is the ordered list of resources a deployment type provisions.
//! Dependencies are expressed between logical keys; the orchestrator maps
//! them to provider ids as resources are created.
//!
//! | Type | Adds |
//! |------|------|
//! | `spot` | network, subnet, security group, IAM role, storage, compute |
//! | `alb`  | load balancer, target group |
//! | `cdn`  | load balancer, target group, CDN distribution |
//! | `full` | everything above, monitoring dashboard |

use serde::{Deserialize, Serialize};
use stackforge_common::ResourceType;
use std::collections::HashSet;
use std::str::FromStr;

use crate::error::{OrchestratorError, Result};
use crate::state::DeploymentPhase;

/// Keys the application can be reached through, preferred first
const ENTRY_POINT_KEYS: [&str; 2] = ["cdn", "load-balancer"];

/// Deployment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentType {
    /// Compute only
    Spot,
    /// Compute behind a load balancer
    Alb,
    /// Load balancer fronted by a CDN
    Cdn,
    /// Everything, monitoring included
    Full,
}

impl DeploymentType {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Alb => "alb",
            Self::Cdn => "cdn",
            Self::Full => "full",
        }
    }

    fn has_load_balancer(&self) -> bool {
        !matches!(self, Self::Spot)
    }

    fn has_cdn(&self) -> bool {
        matches!(self, Self::Cdn | Self::Full)
    }

    fn has_dashboard(&self) -> bool {
        matches!(self, Self::Full)
    }
}

impl std::fmt::Display for DeploymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentType {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "spot" => Ok(Self::Spot),
            "alb" => Ok(Self::Alb),
            "cdn" => Ok(Self::Cdn),
            "full" => Ok(Self::Full),
            other => Err(OrchestratorError::Configuration(format!(
                "unknown deployment type '{}' (expected spot, alb, cdn or full)",
                other
            ))),
        }
    }
}

/// One planned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedResource {
    /// Logical key, unique within the plan
    pub key: String,
    /// Provider-facing name
    pub name: String,
    /// Kind of resource
    pub resource_type: ResourceType,
    /// Phase that creates it
    pub phase: DeploymentPhase,
    /// Logical keys this resource references
    pub depends_on: Vec<String>,
    /// Failure may be skipped without failing the deployment
    pub optional: bool,
}

/// Ordered resource plan for one stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePlan {
    /// Stack the plan belongs to
    pub stack_name: String,
    /// Deployment type the plan was built for
    pub deployment_type: DeploymentType,
    /// Resources in creation order
    pub resources: Vec<PlannedResource>,
}

/// Inputs that shape a plan
#[derive(Debug, Clone, PartialEq)]
pub struct PlanOptions {
    /// Deployment type
    pub deployment_type: DeploymentType,
    /// Add a CDN regardless of type
    pub enable_cdn: bool,
    /// Add monitoring regardless of type
    pub enable_monitoring: bool,
    /// Compute instances, at least 1
    pub fleet_size: usize,
}

impl ResourcePlan {
    /// Plan the resources of `stack_name` in dependency order
    pub fn build(stack_name: &str, options: &PlanOptions) -> Self {
        let mut builder = PlanBuilder {
            stack_name,
            resources: Vec::new(),
        };
        let infra = DeploymentPhase::ProvisioningInfra;

        builder.add("network", ResourceType::Network, infra, &[]);
        builder.add("subnet", ResourceType::Subnet, infra, &["network"]);
        builder.add("security-group", ResourceType::SecurityGroup, infra, &["network"]);
        builder.add("iam-role", ResourceType::IamRole, infra, &[]);
        builder.add("storage", ResourceType::Storage, infra, &["subnet", "security-group"]);

        let cdn = options.deployment_type.has_cdn() || options.enable_cdn;
        if options.deployment_type.has_load_balancer() || cdn {
            builder.add(
                "load-balancer",
                ResourceType::LoadBalancer,
                infra,
                &["subnet", "security-group"],
            );
            builder.add("target-group", ResourceType::TargetGroup, infra, &["network"]);
        }
        if cdn {
            builder.add("cdn", ResourceType::CdnDistribution, infra, &["load-balancer"]);
        }
        if options.deployment_type.has_dashboard() || options.enable_monitoring {
            builder.add("dashboard", ResourceType::MonitoringDashboard, infra, &[]);
        }

        let mut attachments = vec!["subnet", "security-group", "iam-role", "storage"];
        if builder.contains("target-group") {
            attachments.push("target-group");
        }

        let fleet = options.fleet_size.max(1);
        for i in 1..=fleet {
            let key = if fleet == 1 {
                "compute".to_string()
            } else {
                format!("compute-{}", i)
            };
            builder.add(
                &key,
                ResourceType::ComputeInstance,
                DeploymentPhase::ProvisioningCompute,
                &attachments,
            );
        }

        Self {
            stack_name: stack_name.to_string(),
            deployment_type: options.deployment_type,
            resources: builder.resources,
        }
    }

    /// Planned resource by key
    pub fn get(&self, key: &str) -> Option<&PlannedResource> {
        self.resources.iter().find(|r| r.key == key)
    }

    /// Planned resources of one phase, in plan order
    pub fn for_phase(&self, phase: DeploymentPhase) -> impl Iterator<Item = &PlannedResource> {
        self.resources.iter().filter(move |r| r.phase == phase)
    }

    /// Endpoint resource the application is reached through
    pub fn entry_point(&self) -> Option<&PlannedResource> {
        self.entry_points().next()
    }

    /// Planned endpoint candidates, preferred first
    pub fn entry_points(&self) -> impl Iterator<Item = &PlannedResource> {
        ENTRY_POINT_KEYS.iter().filter_map(|key| self.get(key))
    }

    /// Keys are unique and every dependency refers to an earlier entry
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for resource in &self.resources {
            for dep in &resource.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(OrchestratorError::Configuration(format!(
                        "planned resource {} depends on unplanned {}",
                        resource.key, dep
                    )));
                }
            }
            if !seen.insert(resource.key.as_str()) {
                return Err(OrchestratorError::Configuration(format!(
                    "duplicate planned resource {}",
                    resource.key
                )));
            }
        }
        Ok(())
    }
}

struct PlanBuilder<'a> {
    stack_name: &'a str,
    resources: Vec<PlannedResource>,
}

impl PlanBuilder<'_> {
    fn add(&mut self, key: &str, resource_type: ResourceType, phase: DeploymentPhase, depends_on: &[&str]) {
        self.resources.push(PlannedResource {
            key: key.to_string(),
            name: format!("{}-{}", self.stack_name, key),
            resource_type,
            phase,
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            optional: resource_type.is_optional(),
        });
    }

    fn contains(&self, key: &str) -> bool {
        self.resources.iter().any(|r| r.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(deployment_type: DeploymentType) -> PlanOptions {
        PlanOptions {
            deployment_type,
            enable_cdn: false,
            enable_monitoring: false,
            fleet_size: 1,
        }
    }

    fn keys(plan: &ResourcePlan) -> Vec<&str> {
        plan.resources.iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn test_spot_plan() {
        let plan = ResourcePlan::build("ml-dev", &options(DeploymentType::Spot));
        assert_eq!(
            keys(&plan),
            vec!["network", "subnet", "security-group", "iam-role", "storage", "compute"]
        );
        assert_eq!(plan.get("subnet").unwrap().name, "ml-dev-subnet");
        assert!(plan.entry_point().is_none());
        plan.validate().unwrap();
    }

    #[test]
    fn test_full_plan_has_optional_extras() {
        let plan = ResourcePlan::build("ml-prod", &options(DeploymentType::Full));
        assert!(plan.get("load-balancer").is_some());
        assert!(plan.get("cdn").unwrap().optional);
        assert!(plan.get("dashboard").unwrap().optional);
        assert!(!plan.get("network").unwrap().optional);
        assert_eq!(plan.entry_point().unwrap().key, "cdn");
        let entries: Vec<&str> = plan.entry_points().map(|r| r.key.as_str()).collect();
        assert_eq!(entries, vec!["cdn", "load-balancer"]);
        assert!(plan
            .get("compute")
            .unwrap()
            .depends_on
            .contains(&"target-group".to_string()));
        plan.validate().unwrap();
    }

    #[test]
    fn test_flags_extend_any_type() {
        let mut opts = options(DeploymentType::Spot);
        opts.enable_cdn = true;
        opts.enable_monitoring = true;
        let plan = ResourcePlan::build("ml-dev", &opts);
        assert!(plan.get("cdn").is_some());
        assert!(plan.get("load-balancer").is_some());
        assert!(plan.get("dashboard").is_some());
    }

    #[test]
    fn test_fleet_compute_entries() {
        let mut opts = options(DeploymentType::Alb);
        opts.fleet_size = 3;
        let plan = ResourcePlan::build("ml-dev", &opts);
        let compute: Vec<_> = plan
            .for_phase(DeploymentPhase::ProvisioningCompute)
            .map(|r| r.key.as_str())
            .collect();
        assert_eq!(compute, vec!["compute-1", "compute-2", "compute-3"]);
    }

    #[test]
    fn test_validate_rejects_forward_reference() {
        let mut plan = ResourcePlan::build("ml-dev", &options(DeploymentType::Spot));
        plan.resources.swap(0, 1);
        assert!(matches!(plan.validate(), Err(OrchestratorError::Configuration(_))));
    }

    #[test]
    fn test_parse_type() {
        assert_eq!("CDN".parse::<DeploymentType>().unwrap(), DeploymentType::Cdn);
        assert!("ecs".parse::<DeploymentType>().is_err());
    }
}
