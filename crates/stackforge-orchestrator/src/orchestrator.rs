//! Deployment orchestrator
//!
//! Drives one stack through the deployment phases. Every phase transition
//! appends a checkpoint and persists the stack record before any provider
//! work happens. A failed step is routed through the failure policy table:
//! retried, skipped, rolled back, or aborted with an emergency cleanup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackforge_common::{
    ApplicationDeployer, CloudProvider, ComputeLauncher, DeployTarget, InstanceHandle, InterruptionNotice,
    InterruptionSource, LaunchSpec, PricingModel, ProviderError, ResourceSpec, ResourceState, ResourceType,
    SandboxCloud, ShutdownHook,
};
use stackforge_registry::{Registration, Resource, ResourceRegistry, ResourceStatus};
use stackforge_resilience::{
    poll_until_interruptible, retry_interruptible, Interrupt, Interrupted, InterruptionWatcher, PollError, RetryError,
    RetryPolicy, WatcherHandle,
};
use stackforge_spot::{OnDemandPricing, Placement, SpotError, SpotSelector};
use stackforge_vars::{validators, Scope, VariableStore};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::Instant;

use crate::config::{OrchestratorConfig, RollbackScope};
use crate::context::DeploymentContext;
use crate::error::{OrchestratorError, Result};
use crate::plan::{PlannedResource, ResourcePlan};
use crate::policy::{FailurePolicy, PolicyTable};
use crate::rollback::{RollbackExecutor, RollbackReport};
use crate::state::{DeploymentPhase, DeploymentState};
use crate::store::{InMemoryStateStore, StackRecord, StateStore};

/// Resource types whose creation is followed by a readiness poll
const POLLED_TYPES: [ResourceType; 2] = [ResourceType::LoadBalancer, ResourceType::CdnDistribution];

/// Shutdown hook that only logs the notice
#[derive(Debug, Default)]
pub struct LoggingShutdownHook;

#[async_trait]
impl ShutdownHook for LoggingShutdownHook {
    async fn graceful_shutdown(&self, notice: &InterruptionNotice) {
        tracing::warn!(
            "instance {} will be reclaimed ({}); draining workload",
            notice.instance_id,
            notice.action
        );
    }
}

/// Result of a successful deployment
#[derive(Debug)]
pub struct DeploymentOutcome {
    /// Stack name
    pub stack_name: String,
    /// Final phase
    pub phase: DeploymentPhase,
    /// Nothing was created
    pub dry_run: bool,
    /// Plan that was executed
    pub plan: ResourcePlan,
    /// Resources registered for the stack
    pub resources: Vec<Resource>,
    /// Chosen compute placements
    pub placements: Vec<Placement>,
    /// Launched instances
    pub instances: Vec<InstanceHandle>,
    /// Provider id of the load balancer or CDN in front of the application
    pub endpoint: Option<String>,
    /// Plan keys of optional resources that failed and were skipped
    pub skipped: Vec<String>,
    /// Interruption watchers for spot instances; dropping them stops watching
    pub watchers: Vec<WatcherHandle>,
}

/// Kind of a stack log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    /// Phase transition
    Phase,
    /// Checkpoint taken
    Checkpoint,
    /// Recorded error
    Error,
}

/// One entry of a stack's event log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// When it happened
    pub at: DateTime<Utc>,
    /// Entry kind
    pub kind: LogKind,
    /// Human readable message
    pub message: String,
}

/// Failed step, with the resource type it was provisioning
struct Failure {
    error: OrchestratorError,
    resource: Option<ResourceType>,
}

impl From<OrchestratorError> for Failure {
    fn from(error: OrchestratorError) -> Self {
        Self { error, resource: None }
    }
}

/// Mutable state of one deployment run
struct Run<'a> {
    ctx: &'a DeploymentContext,
    plan: ResourcePlan,
    registry: ResourceRegistry,
    record: StackRecord,
    /// Plan key -> provider id
    ids: HashMap<String, String>,
    instances: Vec<InstanceHandle>,
    skipped: Vec<String>,
    watchers: Vec<WatcherHandle>,
    /// Cancellation and the deployment deadline
    interrupt: Interrupt,
}

/// Deployment orchestrator
pub struct Orchestrator {
    provider: Arc<dyn CloudProvider>,
    launcher: Arc<dyn ComputeLauncher>,
    deployer: Arc<dyn ApplicationDeployer>,
    interruptions: Option<Arc<dyn InterruptionSource>>,
    shutdown_hook: Arc<dyn ShutdownHook>,
    store: Arc<dyn StateStore>,
    variables: Arc<VariableStore>,
    config: OrchestratorConfig,
    policies: PolicyTable,
    on_demand: OnDemandPricing,
    retry: RetryPolicy,
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    provider: Arc<dyn CloudProvider>,
    launcher: Option<Arc<dyn ComputeLauncher>>,
    deployer: Option<Arc<dyn ApplicationDeployer>>,
    interruptions: Option<Arc<dyn InterruptionSource>>,
    shutdown_hook: Option<Arc<dyn ShutdownHook>>,
    store: Option<Arc<dyn StateStore>>,
    variables: Option<Arc<VariableStore>>,
    config: OrchestratorConfig,
    policies: Option<PolicyTable>,
    on_demand: OnDemandPricing,
}

impl OrchestratorBuilder {
    /// Builder over `provider`; a launcher and a deployer are required
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self {
            provider,
            launcher: None,
            deployer: None,
            interruptions: None,
            shutdown_hook: None,
            store: None,
            variables: None,
            config: OrchestratorConfig::default(),
            policies: None,
            on_demand: OnDemandPricing::default(),
        }
    }

    /// Every collaborator backed by one sandbox cloud
    pub fn sandbox(cloud: Arc<SandboxCloud>) -> Self {
        let provider: Arc<dyn CloudProvider> = cloud.clone();
        let launcher: Arc<dyn ComputeLauncher> = cloud.clone();
        let deployer: Arc<dyn ApplicationDeployer> = cloud.clone();
        let interruptions: Arc<dyn InterruptionSource> = cloud;
        Self::new(provider)
            .launcher(launcher)
            .deployer(deployer)
            .interruptions(interruptions)
    }

    /// Compute launcher
    pub fn launcher(mut self, launcher: Arc<dyn ComputeLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Application deployer
    pub fn deployer(mut self, deployer: Arc<dyn ApplicationDeployer>) -> Self {
        self.deployer = Some(deployer);
        self
    }

    /// Spot interruption notices
    pub fn interruptions(mut self, source: Arc<dyn InterruptionSource>) -> Self {
        self.interruptions = Some(source);
        self
    }

    /// Called when a spot instance is reclaimed
    pub fn shutdown_hook(mut self, hook: Arc<dyn ShutdownHook>) -> Self {
        self.shutdown_hook = Some(hook);
        self
    }

    /// Stack record store
    pub fn store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shared variable store
    pub fn variables(mut self, variables: Arc<VariableStore>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Configuration
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the table derived from the config
    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = Some(policies);
        self
    }

    /// On-demand prices used for fallback and savings
    pub fn on_demand_pricing(mut self, pricing: OnDemandPricing) -> Self {
        self.on_demand = pricing;
        self
    }

    /// Check required collaborators and build
    pub fn build(self) -> Result<Orchestrator> {
        let launcher = self
            .launcher
            .ok_or_else(|| OrchestratorError::Configuration("no compute launcher configured".into()))?;
        let deployer = self
            .deployer
            .ok_or_else(|| OrchestratorError::Configuration("no application deployer configured".into()))?;
        let policies = match self.policies {
            Some(policies) => policies,
            None => self.config.policy_table()?,
        };
        let retry = self.config.retry_policy();

        Ok(Orchestrator {
            provider: self.provider,
            launcher,
            deployer,
            interruptions: self.interruptions,
            shutdown_hook: self.shutdown_hook.unwrap_or_else(|| Arc::new(LoggingShutdownHook)),
            store: self.store.unwrap_or_else(|| Arc::new(InMemoryStateStore::new())),
            variables: self.variables.unwrap_or_default(),
            config: self.config,
            policies,
            on_demand: self.on_demand,
            retry,
        })
    }
}

impl Orchestrator {
    /// Start a builder
    pub fn builder(provider: Arc<dyn CloudProvider>) -> OrchestratorBuilder {
        OrchestratorBuilder::new(provider)
    }

    /// Active configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Shared variable store
    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    /// Validate the context and build its resource plan. No provider calls.
    pub fn plan(&self, ctx: &DeploymentContext) -> Result<ResourcePlan> {
        validate_context(ctx)?;
        let plan = ResourcePlan::build(&ctx.stack_name, &ctx.plan_options());
        plan.validate()?;
        Ok(plan)
    }

    /// Deploy a stack
    #[tracing::instrument(skip(self, ctx), fields(stack = %ctx.stack_name))]
    pub async fn deploy(&self, ctx: &DeploymentContext) -> Result<DeploymentOutcome> {
        if ctx.dry_run {
            let plan = self.plan(ctx)?;
            tracing::info!("dry run: {} resource(s) planned", plan.resources.len());
            return Ok(DeploymentOutcome {
                stack_name: ctx.stack_name.clone(),
                phase: DeploymentPhase::Validating,
                dry_run: true,
                plan,
                resources: Vec::new(),
                placements: Vec::new(),
                instances: Vec::new(),
                endpoint: None,
                skipped: Vec::new(),
                watchers: Vec::new(),
            });
        }

        self.guard_existing(ctx).await?;

        let mut record = StackRecord::new(
            DeploymentState::new(&ctx.stack_name),
            ctx.environment,
            ctx.deployment_type,
        );
        record.variables = self.variables.snapshot(Scope::Stack);

        let mut run = Run {
            ctx,
            plan: ResourcePlan::build(&ctx.stack_name, &ctx.plan_options()),
            registry: ResourceRegistry::new(),
            record,
            ids: HashMap::new(),
            instances: Vec::new(),
            skipped: Vec::new(),
            watchers: Vec::new(),
            interrupt: ctx.interrupt(Instant::now() + self.config.timeouts.deployment()),
        };
        self.persist(&mut run).await?;
        tracing::info!("deploying {} ({}, {})", ctx.stack_name, ctx.deployment_type, ctx.environment);

        match self.drive(&mut run).await {
            Ok(()) => self.complete(run).await,
            Err(failure) => Err(self.handle_failure(run, failure).await),
        }
    }

    /// Unwind every live resource of a persisted stack
    #[tracing::instrument(skip(self))]
    pub async fn rollback_stack(&self, stack_name: &str) -> Result<RollbackReport> {
        let record = self.load(stack_name).await?;
        self.unwind_record(record, DeploymentPhase::RollingBack, DeploymentPhase::RolledBack)
            .await
    }

    /// Tear down a persisted stack. The record is kept for audit; the
    /// stack-scoped variables are cleared.
    #[tracing::instrument(skip(self))]
    pub async fn destroy_stack(&self, stack_name: &str) -> Result<RollbackReport> {
        let mut record = self.load(stack_name).await?;
        record.variables.clear();
        self.variables.clear_scope(Scope::Stack);
        self.unwind_record(record, DeploymentPhase::Destroying, DeploymentPhase::Destroyed)
            .await
    }

    /// Persisted record of a stack
    pub async fn status(&self, stack_name: &str) -> Result<StackRecord> {
        self.load(stack_name).await
    }

    /// Names of every recorded stack
    pub async fn list_stacks(&self) -> Result<Vec<String>> {
        Ok(self.store.list().await?)
    }

    /// Phase changes, checkpoints and errors of a stack, oldest first
    pub async fn logs(&self, stack_name: &str) -> Result<Vec<LogEntry>> {
        let record = self.load(stack_name).await?;

        let mut entries: Vec<LogEntry> = record
            .state
            .history
            .iter()
            .map(|change| LogEntry {
                at: change.at,
                kind: LogKind::Phase,
                message: format!("{} -> {}", change.from, change.to),
            })
            .collect();
        entries.extend(record.checkpoints.entries().iter().map(|cp| LogEntry {
            at: cp.timestamp,
            kind: LogKind::Checkpoint,
            message: format!(
                "checkpoint {} ({} resource(s))",
                cp.name,
                cp.associated_resource_ids.len()
            ),
        }));
        entries.extend(record.state.errors.iter().map(|e| LogEntry {
            at: e.at,
            kind: LogKind::Error,
            message: format!("[{}] {} during {}", e.code, e.message, e.phase),
        }));
        entries.sort_by_key(|e| e.at);
        Ok(entries)
    }

    async fn load(&self, stack_name: &str) -> Result<StackRecord> {
        self.store
            .load(stack_name)
            .await?
            .ok_or_else(|| OrchestratorError::StackNotFound(stack_name.to_string()))
    }

    /// Refuse to overwrite a running or live stack, or clean it up first
    /// when the context allows
    async fn guard_existing(&self, ctx: &DeploymentContext) -> Result<()> {
        let Some(mut record) = self.store.load(&ctx.stack_name).await? else {
            return Ok(());
        };

        if record.state.phase.is_in_progress() {
            return Err(OrchestratorError::DeploymentInProgress(ctx.stack_name.clone()));
        }
        if !record.has_live_resources() {
            return Ok(());
        }
        if !ctx.auto_cleanup {
            tracing::error!("stack {} already has live resources", ctx.stack_name);
            return Err(OrchestratorError::StackAlreadyExists(ctx.stack_name.clone()));
        }

        tracing::warn!("cleaning up existing stack {} before redeploying", ctx.stack_name);
        let registry = ResourceRegistry::from_snapshot(record.resources.clone())?;
        let report = self.rollback_executor().rollback(&registry).await?;
        if report.is_complete() {
            return Ok(());
        }

        record.resources = registry.snapshot();
        record.rollback_report = Some(report.clone());
        record.updated_at = Utc::now();
        self.store.save(&record).await?;
        Err(OrchestratorError::RollbackIncomplete(report))
    }

    async fn drive(&self, run: &mut Run<'_>) -> std::result::Result<(), Failure> {
        let selector = SpotSelector::new(
            Arc::clone(&self.provider),
            self.config.selector_config(run.ctx.min_confidence, run.ctx.max_spot_price),
        )
        .with_on_demand_pricing(self.on_demand.clone());

        self.enter(run, DeploymentPhase::Validating).await?;
        validate_context(run.ctx)?;
        run.plan.validate()?;

        self.enter(run, DeploymentPhase::ProvisioningInfra).await?;
        let infra: Vec<PlannedResource> = run.plan.for_phase(DeploymentPhase::ProvisioningInfra).cloned().collect();
        for planned in &infra {
            self.provision(run, planned).await?;
            self.persist(run).await?;
        }

        self.enter(run, DeploymentPhase::ProvisioningCompute).await?;
        self.provision_compute(run, &selector).await?;

        self.enter(run, DeploymentPhase::DeployingApplication).await?;
        self.deploy_application(run).await?;

        self.enter(run, DeploymentPhase::ValidatingHealth).await?;
        self.validate_health(run).await?;
        Ok(())
    }

    /// Transition, checkpoint, persist
    async fn enter(&self, run: &mut Run<'_>, phase: DeploymentPhase) -> Result<()> {
        self.guard(run)?;
        run.record.state.transition(phase)?;
        run.record.checkpoints.append(
            phase.as_str().to_ascii_lowercase(),
            phase,
            run.registry.live_ids(),
            run.registry.last_seq(),
        );
        self.persist(run).await
    }

    async fn persist(&self, run: &mut Run<'_>) -> Result<()> {
        run.record.resources = run.registry.snapshot();
        run.record.updated_at = Utc::now();
        self.store.save(&run.record).await?;
        Ok(())
    }

    /// Cancellation and the deployment deadline, checked before provider
    /// calls. Waits in between race against the same interrupt.
    fn guard(&self, run: &Run<'_>) -> Result<()> {
        run.interrupt.check().map_err(|reason| self.interrupted(reason))
    }

    fn interrupted(&self, reason: Interrupted) -> OrchestratorError {
        match reason {
            Interrupted::Cancelled => OrchestratorError::Cancelled,
            Interrupted::DeadlineReached => OrchestratorError::DeploymentTimeout(self.config.timeouts.deployment()),
        }
    }

    fn retry_failure(&self, e: RetryError<OrchestratorError>) -> OrchestratorError {
        match e.interrupted {
            Some(reason) => self.interrupted(reason),
            None => e.last_error,
        }
    }

    /// Create one planned resource under its failure policy
    async fn provision(&self, run: &mut Run<'_>, planned: &PlannedResource) -> std::result::Result<(), Failure> {
        let resource_type = planned.resource_type;
        let shared: &Run<'_> = run;
        let created = retry_interruptible(
            &self.retry,
            &shared.interrupt,
            || self.create_resource(shared, planned),
            |e: &OrchestratorError| self.policies.decide_for(e, Some(resource_type)) == FailurePolicy::Retry,
        )
        .await;

        let error = match created {
            Ok(id) => {
                run.ids.insert(planned.key.clone(), id);
                return Ok(());
            }
            Err(e) => self.retry_failure(e),
        };

        let policy = match self.policies.decide_for(&error, Some(resource_type)) {
            FailurePolicy::Retry => self.policies.escalate(Some(resource_type)),
            policy => policy,
        };
        if policy != FailurePolicy::Skip {
            return Err(Failure {
                error,
                resource: Some(resource_type),
            });
        }

        tracing::warn!("skipping optional {} ({}): {}", planned.key, resource_type, error);
        let mut context = BTreeMap::new();
        context.insert("resource".to_string(), planned.key.clone());
        context.insert("policy".to_string(), FailurePolicy::Skip.to_string());
        run.record.state.record_error(error.code(), error.to_string(), context);
        run.skipped.push(planned.key.clone());
        self.reap_skipped(run, planned).await;
        Ok(())
    }

    /// Delete what failed attempts at a skipped resource left registered
    async fn reap_skipped(&self, run: &Run<'_>, planned: &PlannedResource) {
        let leftovers: Vec<String> = run
            .registry
            .snapshot()
            .into_iter()
            .filter(|r| r.is_live() && r.metadata.get("key") == Some(&planned.key))
            .map(|r| r.id)
            .collect();
        if leftovers.is_empty() {
            return;
        }

        match self.rollback_executor().rollback_ids(&run.registry, &leftovers).await {
            Ok(report) if report.is_complete() => {
                tracing::info!("removed {} resource(s) of skipped {}", report.destroyed.len(), planned.key);
            }
            Ok(report) => tracing::warn!(
                "skipped {} left resources behind: {}",
                planned.key,
                report.needs_manual_cleanup.join(", ")
            ),
            Err(e) => tracing::warn!("could not remove skipped {}: {}", planned.key, e),
        }
    }

    async fn create_resource(&self, run: &Run<'_>, planned: &PlannedResource) -> Result<String> {
        self.guard(run)?;

        let dependencies: Vec<String> = planned
            .depends_on
            .iter()
            .filter_map(|key| run.ids.get(key).cloned())
            .collect();
        let mut spec = ResourceSpec::new(&planned.name, &run.ctx.region)
            .with_attribute("stack", &run.ctx.stack_name)
            .with_attribute("environment", run.ctx.environment.as_str());
        for id in &dependencies {
            spec = spec.with_dependency(id);
        }

        let id = self.provider.create_resource(planned.resource_type, &spec).await?;
        run.registry.register(
            Registration::new(planned.resource_type, &id, &run.ctx.region)
                .metadata("name", &planned.name)
                .metadata("key", &planned.key)
                .depends_on_all(dependencies),
        )?;
        tracing::info!("created {} {} ({})", planned.resource_type, id, planned.name);

        if POLLED_TYPES.contains(&planned.resource_type) {
            if let Err(e) = self.wait_ready(&run.interrupt, planned.resource_type, &id).await {
                run.registry.transition(&id, ResourceStatus::Failed)?;
                return Err(e);
            }
        }

        run.registry.transition(&id, ResourceStatus::Created)?;
        Ok(id)
    }

    async fn wait_ready(&self, interrupt: &Interrupt, resource_type: ResourceType, id: &str) -> Result<()> {
        let timeouts = &self.config.timeouts;
        let operation = format!("{} {} readiness", resource_type, id);
        poll_until_interruptible(&operation, timeouts.resource_ready(), timeouts.poll_interval(), interrupt, || {
            self.probe_ready(resource_type, id)
        })
        .await
        .map_err(|e| match e {
            PollError::TimedOut { operation, waited } => OrchestratorError::Timeout { operation, waited },
            PollError::Probe(e) => e,
            PollError::Interrupted(reason) => self.interrupted(reason),
        })
    }

    async fn probe_ready(&self, resource_type: ResourceType, id: &str) -> Result<bool> {
        match self.provider.describe_resource(resource_type, id).await? {
            ResourceState::Available => Ok(true),
            ResourceState::Pending => Ok(false),
            state => Err(OrchestratorError::ResourceFailed {
                resource_type,
                id: id.to_string(),
                state: format!("{:?}", state),
            }),
        }
    }

    async fn provision_compute(&self, run: &mut Run<'_>, selector: &SpotSelector) -> std::result::Result<(), Failure> {
        let computes: Vec<PlannedResource> = run
            .plan
            .for_phase(DeploymentPhase::ProvisioningCompute)
            .cloned()
            .collect();
        self.guard(run)?;

        let placements = run
            .interrupt
            .run(self.placements(run.ctx, selector, computes.len()))
            .await
            .map_err(|reason| self.interrupted(reason))
            .and_then(|placements| placements)
            .map_err(|error| Failure {
                error,
                resource: Some(ResourceType::ComputeInstance),
            })?;

        for (planned, placement) in computes.iter().zip(placements) {
            let shared: &Run<'_> = run;
            let launched = retry_interruptible(
                &self.retry,
                &shared.interrupt,
                || self.launch(shared, planned, &placement),
                |e: &OrchestratorError| {
                    self.policies.decide_for(e, Some(ResourceType::ComputeInstance)) == FailurePolicy::Retry
                },
            )
            .await
            .map_err(|e| Failure {
                error: self.retry_failure(e),
                resource: Some(ResourceType::ComputeInstance),
            })?;

            let (id, handle, placement) = launched;
            if placement.is_spot() {
                if let Some(source) = &self.interruptions {
                    let watcher = InterruptionWatcher::new(Arc::clone(source), Arc::clone(&self.shutdown_hook))
                        .with_interval(self.config.interruption_interval());
                    run.watchers.push(watcher.spawn(&handle.instance_id));
                }
            }

            run.ids.insert(planned.key.clone(), id);
            run.instances.push(handle);
            run.record.placements.push(placement);
            self.persist(run).await?;
        }
        Ok(())
    }

    /// One placement per compute entry; on-demand when spot runs out
    async fn placements(&self, ctx: &DeploymentContext, selector: &SpotSelector, count: usize) -> Result<Vec<Placement>> {
        let regions = ctx.candidate_regions();
        if count <= 1 {
            let placement = selector
                .place(&ctx.instance_class, &regions, &ctx.fallback_classes)
                .await?;
            return Ok(vec![placement]);
        }

        match selector
            .select_fleet(&ctx.instance_class, &regions, &ctx.fallback_classes, count)
            .await
        {
            Ok(candidates) => Ok(candidates
                .into_iter()
                .map(|c| {
                    let on_demand = self.on_demand.price(&c.instance_class);
                    Placement::spot(c, on_demand)
                })
                .collect()),
            Err(SpotError::NoCapacityAvailable { .. }) => {
                let placement = selector
                    .place(&ctx.instance_class, &regions, &ctx.fallback_classes)
                    .await?;
                Ok(vec![placement; count])
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Launch, register, and wait for reachability. A spot launch that hits
    /// a capacity error is retried once on-demand.
    async fn launch(
        &self,
        run: &Run<'_>,
        planned: &PlannedResource,
        placement: &Placement,
    ) -> Result<(String, InstanceHandle, Placement)> {
        self.guard(run)?;

        let attachments: BTreeMap<String, String> = planned
            .depends_on
            .iter()
            .filter_map(|key| run.ids.get(key).map(|id| (key.clone(), id.clone())))
            .collect();
        let mut spec = LaunchSpec {
            stack_name: run.ctx.stack_name.clone(),
            region: placement.region.clone(),
            zone: placement.zone.clone(),
            instance_class: placement.instance_class.clone(),
            pricing: placement.pricing,
            max_price: if placement.is_spot() { run.ctx.max_spot_price } else { None },
            attachments,
        };

        let mut placement = placement.clone();
        let handle = match self.launcher.launch_instance(&spec).await {
            Ok(handle) => handle,
            Err(ProviderError::CapacityUnavailable { .. }) if placement.is_spot() => {
                tracing::warn!(
                    "spot capacity for {} in {} gone at launch; launching on-demand",
                    spec.instance_class,
                    spec.region
                );
                self.guard(run)?;
                spec.pricing = PricingModel::OnDemand;
                spec.max_price = None;
                spec.zone = None;
                placement = Placement::on_demand(
                    spec.region.clone(),
                    spec.instance_class.clone(),
                    self.on_demand.price(&spec.instance_class),
                );
                self.launcher.launch_instance(&spec).await?
            }
            Err(e) => return Err(e.into()),
        };

        let id = handle.instance_id.clone();
        run.registry.register(
            Registration::new(ResourceType::ComputeInstance, &id, &handle.region)
                .metadata("name", &planned.name)
                .metadata("key", &planned.key)
                .metadata("instance_class", &handle.instance_class)
                .metadata("pricing", handle.pricing.to_string())
                .depends_on_all(spec.attachments.values().cloned()),
        )?;
        tracing::info!(
            "launched {} {} in {} ({})",
            handle.instance_class,
            id,
            handle.region,
            handle.pricing
        );

        let timeout = self.config.timeouts.reachable();
        let waited = run
            .interrupt
            .run(tokio::time::timeout(timeout, self.launcher.wait_reachable(&handle, timeout)))
            .await;
        let reachable = match waited {
            Ok(reachable) => reachable,
            Err(reason) => {
                run.registry.transition(&id, ResourceStatus::Failed)?;
                return Err(self.interrupted(reason));
            }
        };
        match reachable {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) | Err(_) => {
                run.registry.transition(&id, ResourceStatus::Failed)?;
                return Err(OrchestratorError::Timeout {
                    operation: format!("instance {} reachability", id),
                    waited: timeout,
                });
            }
            Ok(Err(e)) => {
                run.registry.transition(&id, ResourceStatus::Failed)?;
                return Err(e.into());
            }
        }

        if let Some(address) = &handle.address {
            run.registry.annotate(&id, "address", address)?;
        }
        run.registry.transition(&id, ResourceStatus::Created)?;
        Ok((id, handle, placement))
    }

    /// Provider id of the first entry point that was actually created
    fn endpoint(&self, run: &Run<'_>) -> Option<String> {
        run.plan.entry_points().find_map(|entry| run.ids.get(&entry.key).cloned())
    }

    fn targets(&self, run: &Run<'_>) -> Vec<DeployTarget> {
        let endpoint = self.endpoint(run);
        run.instances
            .iter()
            .map(|instance| DeployTarget {
                stack_name: run.ctx.stack_name.clone(),
                instance: instance.clone(),
                endpoint: endpoint.clone(),
                health_check_path: run.ctx.health_check_path.clone(),
            })
            .collect()
    }

    async fn deploy_application(&self, run: &Run<'_>) -> Result<()> {
        for target in self.targets(run) {
            self.guard(run)?;
            let deployer = &self.deployer;
            retry_interruptible(
                &self.retry,
                &run.interrupt,
                || deployer.deploy(&target),
                |e: &ProviderError| e.is_retryable(),
            )
            .await
            .map_err(|e| match e.interrupted {
                Some(reason) => self.interrupted(reason),
                None => OrchestratorError::Provider(e.last_error),
            })?;
            tracing::info!("application deployed to {}", target.instance.instance_id);
        }
        Ok(())
    }

    async fn validate_health(&self, run: &Run<'_>) -> Result<()> {
        let timeouts = &self.config.timeouts;
        for target in self.targets(run) {
            self.guard(run)?;
            let operation = format!("health check of {}{}", target.instance.instance_id, target.health_check_path);
            let deployer = &self.deployer;
            poll_until_interruptible(
                &operation,
                timeouts.health_check(),
                timeouts.poll_interval(),
                &run.interrupt,
                || deployer.check_health(&target),
            )
            .await
            .map_err(|e| match e {
                PollError::TimedOut { operation, waited } => {
                    OrchestratorError::HealthCheckFailed(format!("{} not healthy after {:?}", operation, waited))
                }
                PollError::Probe(e) => OrchestratorError::Provider(e),
                PollError::Interrupted(reason) => self.interrupted(reason),
            })?;
        }
        Ok(())
    }

    async fn complete(&self, mut run: Run<'_>) -> Result<DeploymentOutcome> {
        run.record.state.transition(DeploymentPhase::Completed)?;
        run.record.checkpoints.discard();
        self.persist(&mut run).await?;

        for placement in &run.record.placements {
            if let Some(savings) = &placement.savings {
                tracing::info!(
                    "{} in {}: ${:.3}/hr spot, saving ${:.2}/month ({:.0}%)",
                    placement.instance_class,
                    placement.region,
                    savings.spot_price,
                    savings.monthly_savings,
                    savings.savings_percent
                );
            }
        }
        tracing::info!("stack {} deployed", run.ctx.stack_name);

        let endpoint = self.endpoint(&run);
        Ok(DeploymentOutcome {
            stack_name: run.ctx.stack_name.clone(),
            phase: run.record.state.phase,
            dry_run: false,
            resources: run.registry.snapshot(),
            placements: run.record.placements.clone(),
            instances: run.instances,
            endpoint,
            skipped: run.skipped,
            watchers: run.watchers,
            plan: run.plan,
        })
    }

    /// Route a failed step through its policy and produce the final error
    async fn handle_failure(&self, mut run: Run<'_>, failure: Failure) -> OrchestratorError {
        for watcher in run.watchers.drain(..) {
            watcher.stop();
        }

        let error = failure.error;
        let phase = run.record.state.phase;
        let policy = match self.policies.decide_for(&error, failure.resource) {
            FailurePolicy::Retry | FailurePolicy::Skip => FailurePolicy::Rollback,
            policy => policy,
        };
        tracing::error!("{} failed in {}: {} (policy {})", run.ctx.stack_name, phase, error, policy);

        let mut context = BTreeMap::new();
        context.insert("policy".to_string(), policy.to_string());
        if let Some(resource_type) = failure.resource {
            context.insert("resource_type".to_string(), resource_type.to_string());
        }
        if let Some(hint) = error.remediation_hint() {
            context.insert("hint".to_string(), hint);
        }
        run.record.state.record_error(error.code(), error.to_string(), context);

        let report = match policy {
            FailurePolicy::Abort => {
                let report = self.rollback_executor().emergency_cleanup(&run.registry).await;
                let _ = run.record.state.transition(DeploymentPhase::Failed);
                report
            }
            _ => self.unwind_run(&mut run).await,
        };

        run.record.rollback_report = Some(report.clone());
        if let Err(e) = self.persist(&mut run).await {
            tracing::error!("could not persist final state of {}: {}", run.ctx.stack_name, e);
        }

        OrchestratorError::DeploymentFailed {
            stack: run.ctx.stack_name.clone(),
            phase,
            source: Box::new(error),
            rollback: Some(report),
        }
    }

    /// `ROLLING_BACK`, unwind to the configured scope, then `ROLLED_BACK`
    /// or `FAILED`
    async fn unwind_run(&self, run: &mut Run<'_>) -> RollbackReport {
        if run.record.state.transition(DeploymentPhase::RollingBack).is_ok() {
            if let Err(e) = self.persist(run).await {
                tracing::error!("could not persist rollback start: {}", e);
            }
        }

        let executor = self.rollback_executor();
        let unwound = match (self.config.rollback_scope, run.record.checkpoints.last()) {
            (RollbackScope::LastCheckpoint, Some(checkpoint)) => {
                let ids = run.registry.registered_since(checkpoint.registry_seq);
                tracing::info!("rolling back to checkpoint {} ({} resource(s))", checkpoint.name, ids.len());
                executor.rollback_ids(&run.registry, &ids).await
            }
            _ => executor.rollback(&run.registry).await,
        };

        let report = match unwound {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("cleanup order unavailable ({}); falling back to emergency cleanup", e);
                executor.emergency_cleanup(&run.registry).await
            }
        };

        let end = if report.is_complete() {
            DeploymentPhase::RolledBack
        } else {
            DeploymentPhase::Failed
        };
        let _ = run.record.state.transition(end);
        report
    }

    async fn unwind_record(
        &self,
        mut record: StackRecord,
        start: DeploymentPhase,
        done: DeploymentPhase,
    ) -> Result<RollbackReport> {
        let registry = ResourceRegistry::from_snapshot(record.resources.clone())?;
        record.state.transition(start)?;
        record.updated_at = Utc::now();
        self.store.save(&record).await?;

        let report = match self.rollback_executor().rollback(&registry).await {
            Ok(report) => report,
            Err(e) => {
                let error = OrchestratorError::from(e);
                record.state.record_error(error.code(), error.to_string(), BTreeMap::new());
                record.state.transition(DeploymentPhase::Failed)?;
                record.updated_at = Utc::now();
                self.store.save(&record).await?;
                return Err(error);
            }
        };

        record.resources = registry.snapshot();
        record.rollback_report = Some(report.clone());
        if report.is_complete() {
            record.state.transition(done)?;
        } else {
            let error = OrchestratorError::RollbackIncomplete(report.clone());
            let mut context = BTreeMap::new();
            context.insert("manual_cleanup".to_string(), report.needs_manual_cleanup.join(","));
            record.state.record_error(error.code(), error.to_string(), context);
            record.state.transition(DeploymentPhase::Failed)?;
        }
        record.updated_at = Utc::now();
        self.store.save(&record).await?;

        if report.is_complete() {
            tracing::info!("stack {} is {}", record.stack_name, done);
            Ok(report)
        } else {
            Err(OrchestratorError::RollbackIncomplete(report))
        }
    }

    fn rollback_executor(&self) -> RollbackExecutor {
        RollbackExecutor::new(Arc::clone(&self.provider), self.retry.clone())
    }
}

/// Input checks of the `VALIDATING` phase
fn validate_context(ctx: &DeploymentContext) -> Result<()> {
    let invalid = |message: String| Err(OrchestratorError::Configuration(message));

    if !validators::is_valid_stack_name(&ctx.stack_name) {
        return invalid(format!(
            "invalid stack name '{}': 3-30 chars, starting with a letter, letters, digits and hyphens only",
            ctx.stack_name
        ));
    }
    for region in ctx.candidate_regions() {
        if !validators::is_supported_region(&region) {
            return invalid(format!("unsupported region: {}", region));
        }
    }
    for class in std::iter::once(&ctx.instance_class).chain(&ctx.fallback_classes) {
        if !validators::is_supported_instance_class(class) {
            return invalid(format!("unsupported instance class: {}", class));
        }
    }
    if !(1..=20).contains(&ctx.fleet_size) {
        return invalid(format!("fleet size must be between 1 and 20, got {}", ctx.fleet_size));
    }
    if !(0.0..=1.0).contains(&ctx.min_confidence) {
        return invalid(format!("capacity confidence must be within 0..1, got {}", ctx.min_confidence));
    }
    if let Some(price) = ctx.max_spot_price {
        if !validators::is_valid_spot_price(price) {
            return invalid(format!("spot price ceiling out of range: {}", price));
        }
    }
    if !ctx.health_check_path.starts_with('/') {
        return invalid(format!("health check path must start with '/': {}", ctx.health_check_path));
    }
    Ok(())
}
