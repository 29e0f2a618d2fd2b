//! Resource Definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Kind of provisioned resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    /// VPC or equivalent
    Network,
    /// Subnet inside the network
    Subnet,
    /// Firewall rules
    SecurityGroup,
    /// Instance role
    IamRole,
    /// Model and artifact storage
    Storage,
    /// Application load balancer
    LoadBalancer,
    /// Load balancer target group
    TargetGroup,
    /// CDN in front of the load balancer
    CdnDistribution,
    /// Monitoring dashboard
    MonitoringDashboard,
    /// GPU compute instance
    ComputeInstance,
}

impl ResourceType {
    /// Every resource type, in plan order
    pub const ALL: [ResourceType; 10] = [
        Self::Network,
        Self::Subnet,
        Self::SecurityGroup,
        Self::IamRole,
        Self::Storage,
        Self::LoadBalancer,
        Self::TargetGroup,
        Self::CdnDistribution,
        Self::MonitoringDashboard,
        Self::ComputeInstance,
    ];

    /// Kebab-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Subnet => "subnet",
            Self::SecurityGroup => "security-group",
            Self::IamRole => "iam-role",
            Self::Storage => "storage",
            Self::LoadBalancer => "load-balancer",
            Self::TargetGroup => "target-group",
            Self::CdnDistribution => "cdn-distribution",
            Self::MonitoringDashboard => "monitoring-dashboard",
            Self::ComputeInstance => "compute-instance",
        }
    }

    /// Prefix used for provider-style identifiers
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Network => "vpc",
            Self::Subnet => "subnet",
            Self::SecurityGroup => "sg",
            Self::IamRole => "role",
            Self::Storage => "fs",
            Self::LoadBalancer => "alb",
            Self::TargetGroup => "tg",
            Self::CdnDistribution => "cdn",
            Self::MonitoringDashboard => "dash",
            Self::ComputeInstance => "i",
        }
    }

    /// Optional sub-resources may be skipped on failure
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::CdnDistribution | Self::MonitoringDashboard)
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown resource type: {}", s))
    }
}

/// Request to create a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Logical name, unique within the stack
    pub name: String,
    /// Target region
    pub region: String,
    /// Provider-specific attributes
    pub attributes: BTreeMap<String, String>,
    /// Provider ids this resource references
    pub depends_on: Vec<String>,
}

impl ResourceSpec {
    /// Spec with no attributes or dependencies
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            attributes: BTreeMap::new(),
            depends_on: Vec::new(),
        }
    }

    /// Set a provider attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Reference another resource; repeats are ignored
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }
}

/// Provider-side state returned by `describe_resource`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceState {
    /// Still being created
    Pending,
    /// Ready for use
    Available,
    /// Creation failed on the provider side
    Failed,
    /// Unknown to the provider
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_round_trip_names() {
        for t in ResourceType::ALL {
            assert_eq!(t.as_str().parse::<ResourceType>().unwrap(), t);
        }
        assert!("bucket".parse::<ResourceType>().is_err());
    }

    #[test]
    fn test_optional_types() {
        assert!(ResourceType::CdnDistribution.is_optional());
        assert!(ResourceType::MonitoringDashboard.is_optional());
        assert!(!ResourceType::Network.is_optional());
        assert!(!ResourceType::ComputeInstance.is_optional());
    }

    #[test]
    fn test_spec_dependencies_deduplicated() {
        let spec = ResourceSpec::new("web-sg", "us-east-1")
            .with_dependency("vpc-1")
            .with_dependency("vpc-1")
            .with_attribute("ingress", "443");

        assert_eq!(spec.depends_on, vec!["vpc-1".to_string()]);
        assert_eq!(spec.attributes.get("ingress").map(String::as_str), Some("443"));
    }
}
