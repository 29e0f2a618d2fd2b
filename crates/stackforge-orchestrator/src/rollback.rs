//! Rollback and cleanup executor
//!
//! Unwinds registered resources in reverse dependency order. A failed delete
//! never stops the unwind: the resource is marked `FAILED`, recorded in the
//! report, and the executor moves on.

use serde::{Deserialize, Serialize};
use stackforge_common::{CloudProvider, ProviderError, ResourceType};
use stackforge_registry::{RegistryError, Resource, ResourceRegistry, ResourceStatus};
use stackforge_resilience::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use tokio::task::JoinSet;

/// A resource the unwind could not delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupFailure {
    /// Provider id
    pub id: String,
    /// Kind of resource
    pub resource_type: ResourceType,
    /// Last delete error
    pub error: String,
}

/// Outcome of an unwind
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Deleted ids, in deletion order
    pub destroyed: Vec<String>,
    /// Deletions that failed
    pub failed: Vec<CleanupFailure>,
    /// Ids an operator has to delete by hand
    pub needs_manual_cleanup: Vec<String>,
}

impl RollbackReport {
    /// Every deletion succeeded
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    fn record_failure(&mut self, resource: &Resource, error: String) {
        self.needs_manual_cleanup.push(resource.id.clone());
        self.failed.push(CleanupFailure {
            id: resource.id.clone(),
            resource_type: resource.resource_type,
            error,
        });
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: RollbackReport) {
        self.destroyed.extend(other.destroyed);
        self.failed.extend(other.failed);
        self.needs_manual_cleanup.extend(other.needs_manual_cleanup);
    }
}

/// Rollback executor
pub struct RollbackExecutor {
    provider: Arc<dyn CloudProvider>,
    retry: RetryPolicy,
}

impl RollbackExecutor {
    /// Executor deleting through `provider`
    pub fn new(provider: Arc<dyn CloudProvider>, retry: RetryPolicy) -> Self {
        Self { provider, retry }
    }

    /// Delete every live resource, dependents first
    pub async fn rollback(&self, registry: &ResourceRegistry) -> Result<RollbackReport, RegistryError> {
        let order = registry.compute_cleanup_order()?;
        Ok(self.unwind(registry, order).await)
    }

    /// Delete `ids` only, dependents first
    pub async fn rollback_ids(&self, registry: &ResourceRegistry, ids: &[String]) -> Result<RollbackReport, RegistryError> {
        let order = registry.compute_cleanup_order_for(ids)?;
        Ok(self.unwind(registry, order).await)
    }

    async fn unwind(&self, registry: &ResourceRegistry, order: Vec<String>) -> RollbackReport {
        let mut report = RollbackReport::default();
        tracing::info!("rolling back {} resource(s)", order.len());

        for id in order {
            let Some(resource) = registry.get(&id) else {
                continue;
            };
            if let Err(e) = mark_deleting(registry, &resource) {
                report.record_failure(&resource, e.to_string());
                continue;
            }

            let provider = &self.provider;
            let resource_type = resource.resource_type;
            let deleted = retry_with_backoff(&self.retry, || provider.delete_resource(resource_type, &id)).await;

            match deleted {
                Ok(()) => {
                    if let Err(e) = registry.transition(&id, ResourceStatus::Deleted) {
                        report.record_failure(&resource, e.to_string());
                        continue;
                    }
                    tracing::info!("deleted {} {}", resource_type, id);
                    report.destroyed.push(id);
                }
                Err(e) => {
                    tracing::warn!("could not delete {} {}: {}", resource_type, id, e);
                    let _ = registry.transition(&id, ResourceStatus::Failed);
                    report.record_failure(&resource, e.last_error.to_string());
                }
            }
        }

        if !report.is_complete() {
            tracing::warn!(
                "rollback incomplete; manual cleanup needed for: {}",
                report.needs_manual_cleanup.join(", ")
            );
        }
        report
    }

    /// Delete every live resource at once, ignoring dependency order.
    /// Single attempt per resource; failures are logged and reported.
    pub async fn emergency_cleanup(&self, registry: &ResourceRegistry) -> RollbackReport {
        let live: Vec<Resource> = registry.snapshot().into_iter().filter(|r| r.is_live()).collect();
        tracing::error!("emergency cleanup of {} resource(s)", live.len());

        let mut tasks = JoinSet::new();
        for resource in &live {
            if mark_deleting(registry, resource).is_err() {
                continue;
            }
            let provider = Arc::clone(&self.provider);
            let resource_type = resource.resource_type;
            let id = resource.id.clone();
            tasks.spawn(async move {
                let result: Result<(), ProviderError> = provider.delete_resource(resource_type, &id).await;
                (id, result)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => tracing::error!("cleanup task failed: {}", e),
            }
        }

        let mut report = RollbackReport::default();
        for resource in &live {
            let outcome = outcomes.iter().find(|(id, _)| *id == resource.id);
            match outcome {
                Some((id, Ok(()))) => {
                    let _ = registry.transition(id, ResourceStatus::Deleted);
                    report.destroyed.push(id.clone());
                }
                Some((id, Err(e))) => {
                    tracing::warn!("emergency delete of {} failed: {}", id, e);
                    let _ = registry.transition(id, ResourceStatus::Failed);
                    report.record_failure(resource, e.to_string());
                }
                None => report.record_failure(resource, "cleanup task did not complete".into()),
            }
        }
        report
    }
}

fn mark_deleting(registry: &ResourceRegistry, resource: &Resource) -> Result<(), RegistryError> {
    if resource.status == ResourceStatus::Deleting {
        return Ok(());
    }
    registry.transition(&resource.id, ResourceStatus::Deleting).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackforge_common::{ResourceSpec, SandboxCloud, SandboxOp};
    use stackforge_registry::Registration;
    use std::time::Duration;

    async fn provision(cloud: &SandboxCloud, registry: &ResourceRegistry) -> (String, String, String) {
        let vpc = cloud
            .create_resource(ResourceType::Network, &ResourceSpec::new("vpc", "us-east-1"))
            .await
            .unwrap();
        registry
            .register(Registration::new(ResourceType::Network, &vpc, "us-east-1"))
            .unwrap();

        let sg = cloud
            .create_resource(ResourceType::SecurityGroup, &ResourceSpec::new("sg", "us-east-1"))
            .await
            .unwrap();
        registry
            .register(Registration::new(ResourceType::SecurityGroup, &sg, "us-east-1").depends_on(&vpc))
            .unwrap();

        let inst = cloud
            .create_resource(ResourceType::ComputeInstance, &ResourceSpec::new("inst", "us-east-1"))
            .await
            .unwrap();
        registry
            .register(Registration::new(ResourceType::ComputeInstance, &inst, "us-east-1").depends_on(&sg))
            .unwrap();

        (vpc, sg, inst)
    }

    fn executor(cloud: &Arc<SandboxCloud>) -> RollbackExecutor {
        let provider: Arc<dyn CloudProvider> = cloud.clone();
        RollbackExecutor::new(provider, RetryPolicy::new(2, Duration::from_millis(10)))
    }

    #[tokio::test]
    async fn test_rollback_in_reverse_dependency_order() {
        let cloud = Arc::new(SandboxCloud::new());
        let registry = ResourceRegistry::new();
        let (vpc, sg, inst) = provision(&cloud, &registry).await;

        let report = executor(&cloud).rollback(&registry).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.destroyed, vec![inst, sg, vpc]);
        assert!(registry.is_empty());
        assert!(cloud.live_resources().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_continues() {
        let cloud = Arc::new(SandboxCloud::new());
        let registry = ResourceRegistry::new();
        let (vpc, sg, inst) = provision(&cloud, &registry).await;
        cloud.fail(
            SandboxOp::Delete(ResourceType::SecurityGroup),
            ProviderError::PermissionDenied {
                permission: "ec2:DeleteSecurityGroup".into(),
                message: "denied".into(),
            },
        );

        let report = executor(&cloud).rollback(&registry).await.unwrap();

        assert!(!report.is_complete());
        assert_eq!(report.destroyed, vec![inst, vpc]);
        assert_eq!(report.needs_manual_cleanup, vec![sg.clone()]);
        assert_eq!(report.failed[0].resource_type, ResourceType::SecurityGroup);
        assert_eq!(registry.get(&sg).unwrap().status, ResourceStatus::Failed);
        // permission errors are not retried
        assert_eq!(cloud.calls_for(SandboxOp::Delete(ResourceType::SecurityGroup)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_delete_is_retried() {
        let cloud = Arc::new(SandboxCloud::new());
        let registry = ResourceRegistry::new();
        provision(&cloud, &registry).await;
        cloud.fail_times(
            SandboxOp::Delete(ResourceType::Network),
            ProviderError::transient("throttled"),
            1,
        );

        let report = executor(&cloud).rollback(&registry).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(cloud.calls_for(SandboxOp::Delete(ResourceType::Network)), 2);
    }

    #[tokio::test]
    async fn test_rollback_subset() {
        let cloud = Arc::new(SandboxCloud::new());
        let registry = ResourceRegistry::new();
        let (vpc, sg, inst) = provision(&cloud, &registry).await;

        let report = executor(&cloud)
            .rollback_ids(&registry, &[sg.clone(), inst.clone()])
            .await
            .unwrap();

        assert_eq!(report.destroyed, vec![inst, sg]);
        assert_eq!(registry.live_ids(), vec![vpc.clone()]);
        assert!(cloud.contains(&vpc));
    }

    #[tokio::test]
    async fn test_emergency_cleanup_ignores_order_and_failures() {
        let cloud = Arc::new(SandboxCloud::new());
        let registry = ResourceRegistry::new();
        let (vpc, _sg, inst) = provision(&cloud, &registry).await;
        cloud.fail(
            SandboxOp::Delete(ResourceType::ComputeInstance),
            ProviderError::transient("throttled"),
        );

        let report = executor(&cloud).emergency_cleanup(&registry).await;

        assert_eq!(report.destroyed.len(), 2);
        assert_eq!(report.needs_manual_cleanup, vec![inst.clone()]);
        assert!(!cloud.contains(&vpc));
        assert_eq!(registry.live_ids(), vec![inst]);
        // one attempt per resource
        assert_eq!(cloud.calls_for(SandboxOp::Delete(ResourceType::ComputeInstance)), 1);
    }
}
