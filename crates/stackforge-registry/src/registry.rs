//! Resource registry and cleanup ordering

use chrono::Utc;
use parking_lot::RwLock;
use stackforge_common::ResourceType;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};

use crate::error::{RegistryError, Result};
use crate::resource::{Resource, ResourceStatus};

/// Registration request
#[derive(Debug, Clone)]
pub struct Registration {
    /// Kind of resource
    pub resource_type: ResourceType,
    /// Provider-assigned id
    pub id: String,
    /// Region it lives in
    pub region: String,
    /// Free-form labels
    pub metadata: BTreeMap<String, String>,
    /// Ids this resource needs
    pub depends_on: BTreeSet<String>,
}

impl Registration {
    /// Registration without metadata or dependencies
    pub fn new(resource_type: ResourceType, id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            resource_type,
            id: id.into(),
            region: region.into(),
            metadata: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    /// Add a label
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Add a dependency
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// Add several dependencies
    pub fn depends_on_all<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(ids.into_iter().map(Into::into));
        self
    }
}

/// Query filter; `None` fields match anything
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    /// Only this type
    pub resource_type: Option<ResourceType>,
    /// Only this status
    pub status: Option<ResourceStatus>,
    /// Only this region
    pub region: Option<String>,
}

impl ResourceFilter {
    /// Match one resource type
    pub fn of_type(resource_type: ResourceType) -> Self {
        Self {
            resource_type: Some(resource_type),
            ..Default::default()
        }
    }

    /// Narrow to one status
    pub fn with_status(mut self, status: ResourceStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Narrow to one region
    pub fn in_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    fn matches(&self, resource: &Resource) -> bool {
        self.resource_type.map_or(true, |t| t == resource.resource_type)
            && self.status.map_or(true, |s| s == resource.status)
            && self.region.as_ref().map_or(true, |r| *r == resource.region)
    }
}

#[derive(Default)]
struct RegistryInner {
    resources: HashMap<String, Resource>,
    /// Ids in registration order
    order: Vec<String>,
    last_seq: u64,
}

impl RegistryInner {
    fn live(&self) -> impl Iterator<Item = &Resource> {
        self.order
            .iter()
            .filter_map(|id| self.resources.get(id))
            .filter(|r| r.is_live())
    }
}

/// Dependency-aware resource registry.
///
/// Each registration and transition is a single atomic step; readers never
/// observe a half-applied change.
#[derive(Default)]
pub struct ResourceRegistry {
    inner: RwLock<RegistryInner>,
}

impl ResourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted snapshot.
    ///
    /// Records are trusted as-is apart from id uniqueness; the dependency
    /// check at registration time is not replayed.
    pub fn from_snapshot(resources: Vec<Resource>) -> Result<Self> {
        let mut inner = RegistryInner::default();
        let mut resources = resources;
        resources.sort_by_key(|r| r.seq);

        for resource in resources {
            if inner.resources.contains_key(&resource.id) {
                return Err(RegistryError::DuplicateResource(resource.id));
            }
            inner.last_seq = inner.last_seq.max(resource.seq);
            inner.order.push(resource.id.clone());
            inner.resources.insert(resource.id.clone(), resource);
        }

        Ok(Self {
            inner: RwLock::new(inner),
        })
    }

    /// Register a resource in `CREATING` status
    pub fn register(&self, registration: Registration) -> Result<Resource> {
        let mut inner = self.inner.write();

        if inner.resources.contains_key(&registration.id) {
            return Err(RegistryError::DuplicateResource(registration.id));
        }

        for dep in &registration.depends_on {
            let known = inner.resources.get(dep).map(|r| r.is_live()).unwrap_or(false);
            if !known {
                return Err(RegistryError::InvalidDependency {
                    id: registration.id.clone(),
                    missing: dep.clone(),
                });
            }
        }

        inner.last_seq += 1;
        let now = Utc::now();
        let resource = Resource {
            resource_type: registration.resource_type,
            id: registration.id,
            region: registration.region,
            metadata: registration.metadata,
            depends_on: registration.depends_on,
            status: ResourceStatus::Creating,
            created_at: now,
            updated_at: now,
            seq: inner.last_seq,
        };

        tracing::debug!("registered {} {} (seq {})", resource.resource_type, resource.id, resource.seq);
        inner.order.push(resource.id.clone());
        inner.resources.insert(resource.id.clone(), resource.clone());
        Ok(resource)
    }

    /// Move a resource to `next`
    pub fn transition(&self, id: &str, next: ResourceStatus) -> Result<Resource> {
        let mut inner = self.inner.write();
        let resource = inner
            .resources
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownResource(id.to_string()))?;

        if !resource.status.can_transition_to(next) {
            return Err(RegistryError::InvalidTransition {
                id: id.to_string(),
                from: resource.status,
                to: next,
            });
        }

        tracing::debug!("{} {}: {} -> {}", resource.resource_type, id, resource.status, next);
        resource.status = next;
        resource.updated_at = Utc::now();
        Ok(resource.clone())
    }

    /// Attach metadata to a live resource
    pub fn annotate(&self, id: &str, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.resources.get_mut(id) {
            Some(resource) if resource.is_live() => {
                resource.metadata.insert(key.into(), value.into());
                Ok(())
            }
            _ => Err(RegistryError::UnknownResource(id.to_string())),
        }
    }

    /// Live resource by id. Deleted resources are not returned.
    pub fn get(&self, id: &str) -> Option<Resource> {
        self.inner.read().resources.get(id).filter(|r| r.is_live()).cloned()
    }

    /// Live resources matching `filter`, in registration order
    pub fn query(&self, filter: &ResourceFilter) -> Vec<Resource> {
        self.inner
            .read()
            .live()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect()
    }

    /// Ids of every live resource, in registration order
    pub fn live_ids(&self) -> Vec<String> {
        self.inner.read().live().map(|r| r.id.clone()).collect()
    }

    /// Live resources registered after sequence number `seq`
    pub fn registered_since(&self, seq: u64) -> Vec<String> {
        self.inner
            .read()
            .live()
            .filter(|r| r.seq > seq)
            .map(|r| r.id.clone())
            .collect()
    }

    /// Sequence number of the most recent registration
    pub fn last_seq(&self) -> u64 {
        self.inner.read().last_seq
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.inner.read().live().count()
    }

    /// No resources registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every record, deleted ones included, in registration order
    pub fn snapshot(&self) -> Vec<Resource> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|id| inner.resources.get(id))
            .cloned()
            .collect()
    }

    /// Destruction order for every live resource
    pub fn compute_cleanup_order(&self) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let ids: Vec<&str> = inner.live().map(|r| r.id.as_str()).collect();
        Self::cleanup_order(&inner, &ids)
    }

    /// Destruction order restricted to `ids`. Unknown and deleted ids are
    /// ignored, as are dependency edges leaving the subset.
    pub fn compute_cleanup_order_for(&self, ids: &[String]) -> Result<Vec<String>> {
        let inner = self.inner.read();
        let subset: Vec<&str> = ids
            .iter()
            .filter(|id| inner.resources.get(id.as_str()).map(|r| r.is_live()).unwrap_or(false))
            .map(String::as_str)
            .collect();
        Self::cleanup_order(&inner, &subset)
    }

    /// Kahn's algorithm over the reversed dependency graph.
    ///
    /// A resource becomes ready once every resource depending on it has been
    /// emitted. Among ready resources the most recently registered goes first.
    fn cleanup_order(inner: &RegistryInner, ids: &[&str]) -> Result<Vec<String>> {
        let members: HashSet<&str> = ids.iter().copied().collect();
        let mut dependents: HashMap<&str, usize> = ids.iter().map(|id| (*id, 0)).collect();

        for id in ids {
            for dep in &inner.resources[*id].depends_on {
                if let Some(count) = dependents.get_mut(dep.as_str()) {
                    *count += 1;
                }
            }
        }

        let mut ready: BinaryHeap<(u64, &str)> = dependents
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| (inner.resources[*id].seq, *id))
            .collect();

        let mut order = Vec::with_capacity(ids.len());
        while let Some((_, id)) = ready.pop() {
            order.push(id.to_string());

            for dep in &inner.resources[id].depends_on {
                let dep = dep.as_str();
                if !members.contains(dep) {
                    continue;
                }
                if let Some(count) = dependents.get_mut(dep) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push((inner.resources[dep].seq, dep));
                    }
                }
            }
        }

        if order.len() != ids.len() {
            let emitted: HashSet<&str> = order.iter().map(String::as_str).collect();
            let mut stuck: Vec<String> = ids
                .iter()
                .filter(|id| !emitted.contains(**id))
                .map(|id| id.to_string())
                .collect();
            stuck.sort();
            tracing::error!("dependency cycle among {:?}", stuck);
            return Err(RegistryError::DependencyCycleDetected(stuck));
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn created(registry: &ResourceRegistry, registration: Registration) -> Resource {
        let id = registration.id.clone();
        registry.register(registration).unwrap();
        registry.transition(&id, ResourceStatus::Created).unwrap()
    }

    fn delete(registry: &ResourceRegistry, id: &str) {
        registry.transition(id, ResourceStatus::Deleting).unwrap();
        registry.transition(id, ResourceStatus::Deleted).unwrap();
    }

    #[test]
    fn test_linear_chain_cleanup_order() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Network, "vpc-1", "us-east-1"));
        created(
            &registry,
            Registration::new(ResourceType::SecurityGroup, "sg-1", "us-east-1").depends_on("vpc-1"),
        );
        created(
            &registry,
            Registration::new(ResourceType::ComputeInstance, "inst-1", "us-east-1").depends_on("sg-1"),
        );

        assert_eq!(
            registry.compute_cleanup_order().unwrap(),
            vec!["inst-1", "sg-1", "vpc-1"]
        );
    }

    #[test]
    fn test_independent_resources_reverse_registration_order() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Network, "vpc-1", "us-east-1"));
        created(&registry, Registration::new(ResourceType::IamRole, "role-1", "us-east-1"));
        created(&registry, Registration::new(ResourceType::Storage, "fs-1", "us-east-1"));

        assert_eq!(
            registry.compute_cleanup_order().unwrap(),
            vec!["fs-1", "role-1", "vpc-1"]
        );
    }

    #[test]
    fn test_forward_reference_rejected_and_registry_unchanged() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Network, "vpc-1", "us-east-1"));
        let before = registry.snapshot();

        let err = registry
            .register(Registration::new(ResourceType::SecurityGroup, "sg-1", "us-east-1").depends_on("vpc-2"))
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidDependency {
                id: "sg-1".into(),
                missing: "vpc-2".into()
            }
        );
        assert_eq!(registry.snapshot(), before);
        assert_eq!(registry.last_seq(), 1);
    }

    #[test]
    fn test_deleted_dependency_rejected() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Network, "vpc-1", "us-east-1"));
        delete(&registry, "vpc-1");

        let err = registry
            .register(Registration::new(ResourceType::Subnet, "subnet-1", "us-east-1").depends_on("vpc-1"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidDependency { .. }));
    }

    #[test]
    fn test_deleted_is_immutable_and_hidden() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Network, "vpc-1", "us-east-1"));
        delete(&registry, "vpc-1");

        assert!(registry.get("vpc-1").is_none());
        assert!(registry.query(&ResourceFilter::default()).is_empty());
        assert!(registry.compute_cleanup_order().unwrap().is_empty());
        assert!(matches!(
            registry.transition("vpc-1", ResourceStatus::Failed),
            Err(RegistryError::InvalidTransition { .. })
        ));
        // Still kept for audit
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_retry_from_failed() {
        let registry = ResourceRegistry::new();
        registry
            .register(Registration::new(ResourceType::CdnDistribution, "cdn-1", "us-east-1"))
            .unwrap();
        registry.transition("cdn-1", ResourceStatus::Failed).unwrap();
        registry.transition("cdn-1", ResourceStatus::Creating).unwrap();
        let resource = registry.transition("cdn-1", ResourceStatus::Created).unwrap();
        assert_eq!(resource.status, ResourceStatus::Created);

        assert!(matches!(
            registry.transition("missing", ResourceStatus::Created),
            Err(RegistryError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_query_filters_in_insertion_order() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Subnet, "subnet-b", "us-east-1"));
        created(&registry, Registration::new(ResourceType::Subnet, "subnet-a", "us-west-2"));
        created(&registry, Registration::new(ResourceType::Subnet, "subnet-c", "us-east-1"));
        registry
            .register(Registration::new(ResourceType::Network, "vpc-1", "us-east-1"))
            .unwrap();

        let subnets: Vec<String> = registry
            .query(&ResourceFilter::of_type(ResourceType::Subnet))
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(subnets, vec!["subnet-b", "subnet-a", "subnet-c"]);

        let east = registry.query(&ResourceFilter::of_type(ResourceType::Subnet).in_region("us-east-1"));
        assert_eq!(east.len(), 2);

        let creating = registry.query(&ResourceFilter::default().with_status(ResourceStatus::Creating));
        assert_eq!(creating.len(), 1);
        assert_eq!(creating[0].id, "vpc-1");
    }

    #[test]
    fn test_subset_order_and_registered_since() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Network, "vpc-1", "us-east-1"));
        created(
            &registry,
            Registration::new(ResourceType::Subnet, "subnet-1", "us-east-1").depends_on("vpc-1"),
        );
        let checkpoint = registry.last_seq();

        created(
            &registry,
            Registration::new(ResourceType::SecurityGroup, "sg-1", "us-east-1").depends_on("vpc-1"),
        );
        created(
            &registry,
            Registration::new(ResourceType::ComputeInstance, "i-1", "us-east-1")
                .depends_on_all(["sg-1", "subnet-1"]),
        );

        let since = registry.registered_since(checkpoint);
        assert_eq!(since, vec!["sg-1", "i-1"]);
        assert_eq!(registry.compute_cleanup_order_for(&since).unwrap(), vec!["i-1", "sg-1"]);
    }

    #[test]
    fn test_cycle_detected_from_corrupt_snapshot() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Network, "a", "us-east-1"));
        created(&registry, Registration::new(ResourceType::Subnet, "b", "us-east-1").depends_on("a"));
        created(&registry, Registration::new(ResourceType::Storage, "c", "us-east-1"));

        let mut records = registry.snapshot();
        records[0].depends_on.insert("b".into());
        let corrupt = ResourceRegistry::from_snapshot(records).unwrap();

        assert_eq!(
            corrupt.compute_cleanup_order().unwrap_err(),
            RegistryError::DependencyCycleDetected(vec!["a".into(), "b".into()])
        );
    }

    #[test]
    fn test_snapshot_with_duplicate_ids_rejected() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Network, "vpc-1", "us-east-1"));
        created(&registry, Registration::new(ResourceType::Storage, "fs-1", "us-east-1"));

        let mut records = registry.snapshot();
        let mut copy = records[0].clone();
        copy.seq = 3;
        copy.status = ResourceStatus::Deleted;
        records.push(copy);

        assert_eq!(
            ResourceRegistry::from_snapshot(records).err(),
            Some(RegistryError::DuplicateResource("vpc-1".into()))
        );
    }

    #[test]
    fn test_snapshot_round_trip_keeps_sequence() {
        let registry = ResourceRegistry::new();
        created(&registry, Registration::new(ResourceType::Network, "vpc-1", "us-east-1"));
        created(&registry, Registration::new(ResourceType::Storage, "fs-1", "us-east-1"));

        let json = serde_json::to_string(&registry.snapshot()).unwrap();
        let restored = ResourceRegistry::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();

        assert_eq!(restored.last_seq(), 2);
        assert_eq!(restored.live_ids(), vec!["vpc-1", "fs-1"]);
        let next = restored
            .register(Registration::new(ResourceType::IamRole, "role-1", "us-east-1").depends_on("vpc-1"))
            .unwrap();
        assert_eq!(next.seq, 3);
    }

    /// Node `i` may depend on any `j < i`; some nodes are deleted afterwards
    fn dag() -> impl Strategy<Value = (Vec<Vec<bool>>, Vec<bool>)> {
        (1usize..24).prop_flat_map(|n| {
            (
                prop::collection::vec(prop::collection::vec(any::<bool>(), n), n),
                prop::collection::vec(prop::bool::weighted(0.2), n),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_dependents_before_dependencies((edges, deleted) in dag()) {
            let registry = ResourceRegistry::new();
            for (i, row) in edges.iter().enumerate() {
                let deps = (0..i).filter(|j| row[*j]).map(|j| format!("r{}", j));
                created(
                    &registry,
                    Registration::new(ResourceType::Storage, format!("r{}", i), "us-east-1").depends_on_all(deps),
                );
            }
            for (i, gone) in deleted.iter().enumerate() {
                if *gone {
                    delete(&registry, &format!("r{}", i));
                }
            }

            let order = registry.compute_cleanup_order().unwrap();
            let position: HashMap<&str, usize> =
                order.iter().enumerate().map(|(p, id)| (id.as_str(), p)).collect();

            for (i, gone) in deleted.iter().enumerate() {
                prop_assert_eq!(position.contains_key(format!("r{}", i).as_str()), !*gone);
            }
            for (i, row) in edges.iter().enumerate() {
                let id = format!("r{}", i);
                let Some(&me) = position.get(id.as_str()) else { continue };
                for j in (0..i).filter(|j| row[*j]) {
                    if let Some(&dep) = position.get(format!("r{}", j).as_str()) {
                        prop_assert!(me < dep, "r{} must be destroyed before r{}", i, j);
                    }
                }
            }
        }
    }
}
