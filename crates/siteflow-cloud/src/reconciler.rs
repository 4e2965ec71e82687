//! Plan execution
//!
//! Applies a [`Plan`] level by level. Steps within a level run concurrently,
//! bounded by a semaphore. The snapshot is saved after every confirmed
//! control plane call.

use crate::action::{Action, ActionType, ApplyResult, Plan};
use crate::error::{CloudError, Result};
use crate::outputs::evaluate_outputs;
use crate::planner::Planner;
use crate::provider::{ControlPlane, RemoteObject, Request, RetryConfig};
use crate::state::{ResourceState, ResourceStatus, Snapshot, StateManager};
use chrono::Utc;
use serde_json::Value;
use siteflow_core::{ResourceGraph, ResourceId, Site};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Cooperative cancellation shared by every step of a run
#[derive(Debug, Clone)]
pub struct CancelToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        let closed = receiver.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Executor tuning
#[derive(Debug, Clone)]
pub struct ReconcilerOptions {
    /// Maximum concurrent steps within a level
    pub parallelism: usize,
    pub retry: RetryConfig,
    /// Locks older than this are broken
    pub lock_stale_after: Duration,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self {
            parallelism: 10,
            retry: RetryConfig::default(),
            lock_stale_after: Duration::from_secs(3600),
        }
    }
}

/// What `refresh` found
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub checked: usize,
    /// Resources gone remotely; dropped from the snapshot
    pub removed: Vec<ResourceId>,
    /// Resources whose remote attributes changed
    pub drifted: Vec<ResourceId>,
}

/// Plans and applies sites against a control plane
pub struct Reconciler {
    plane: Arc<dyn ControlPlane>,
    state: StateManager,
    options: ReconcilerOptions,
}

impl Reconciler {
    pub fn new(plane: Arc<dyn ControlPlane>, state: StateManager) -> Self {
        Self {
            plane,
            state,
            options: ReconcilerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ReconcilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn plane(&self) -> &dyn ControlPlane {
        self.plane.as_ref()
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Plan against the persisted snapshot
    #[instrument(skip_all, fields(site = %site.name))]
    pub async fn plan(&self, site: &Site) -> Result<Plan> {
        let graph = ResourceGraph::build(site)?;
        let snapshot = self.state.load().await?;
        let plan = Planner::new(self.plane()).plan(site, &graph, &snapshot)?;
        info!(summary = %plan.summary(), serial = plan.snapshot_serial, "Plan computed");
        Ok(plan)
    }

    /// Plan deleting every resource in the snapshot
    pub async fn plan_destroy(&self) -> Result<Plan> {
        let snapshot = self.state.load().await?;
        Planner::new(self.plane()).plan_destroy(&snapshot)
    }

    /// Re-read every resource from the control plane
    #[instrument(skip_all)]
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let lock = self
            .state
            .acquire_lock("refresh", self.options.lock_stale_after)
            .await?;
        let result = self.refresh_locked().await;
        lock.release().await?;
        result
    }

    async fn refresh_locked(&self) -> Result<RefreshReport> {
        let mut snapshot = self.state.load().await?;
        let serial = snapshot.serial;
        let cancel = CancelToken::new();
        let mut report = RefreshReport::default();

        for address in snapshot.addresses() {
            let Some(prior) = snapshot.get(&address).cloned() else {
                continue;
            };
            report.checked += 1;

            let remote = with_retry(&self.options.retry, &cancel, "read", || {
                self.plane.read(&prior.resource_type, &prior.id)
            })
            .await?;

            match remote {
                None => {
                    warn!(resource = %address, id = %prior.id, "Resource no longer exists remotely");
                    snapshot.remove_resource(&address);
                    report.removed.push(address);
                }
                Some(object) if object.attributes != prior.attributes => {
                    info!(resource = %address, "Remote attributes changed");
                    let mut state = prior;
                    state.attributes = object.attributes;
                    state.updated_at = Utc::now();
                    snapshot.set_resource(state);
                    report.drifted.push(address);
                }
                Some(_) => debug!(resource = %address, "Up to date"),
            }
        }

        if snapshot.serial != serial {
            self.state.save(&snapshot).await?;
        }
        Ok(report)
    }

    /// Apply a plan made by [`Reconciler::plan`]
    #[instrument(skip_all, fields(site = %site.name, actions = plan.actions.len()))]
    pub async fn apply(&self, site: &Site, plan: &Plan, cancel: &CancelToken) -> Result<ApplyResult> {
        if plan.destroy {
            return Err(CloudError::InvalidConfig(
                "a destroy plan must be applied with destroy".to_string(),
            ));
        }
        let lock = self
            .state
            .acquire_lock("apply", self.options.lock_stale_after)
            .await?;
        let result = self.apply_locked(Some(site), plan, cancel).await;
        lock.release().await?;
        result
    }

    /// Apply a plan made by [`Reconciler::plan_destroy`]
    #[instrument(skip_all, fields(actions = plan.actions.len()))]
    pub async fn destroy(&self, plan: &Plan, cancel: &CancelToken) -> Result<ApplyResult> {
        if !plan.destroy {
            return Err(CloudError::InvalidConfig(
                "destroy requires a destroy plan".to_string(),
            ));
        }
        let lock = self
            .state
            .acquire_lock("destroy", self.options.lock_stale_after)
            .await?;
        let result = self.apply_locked(None, plan, cancel).await;
        lock.release().await?;
        result
    }

    async fn apply_locked(
        &self,
        site: Option<&Site>,
        plan: &Plan,
        cancel: &CancelToken,
    ) -> Result<ApplyResult> {
        let snapshot = self.state.load().await?;
        if snapshot.serial != plan.snapshot_serial {
            return Err(CloudError::RemoteConflict(format!(
                "state changed since the plan was made (serial {} -> {})",
                plan.snapshot_serial, snapshot.serial
            )));
        }

        let planner = Planner::new(self.plane());
        let current = match site {
            Some(site) => planner.plan(site, &ResourceGraph::build(site)?, &snapshot)?,
            None => planner.plan_destroy(&snapshot)?,
        };
        if current.fingerprint() != plan.fingerprint() {
            return Err(CloudError::RemoteConflict(
                "the plan no longer matches the site definition".to_string(),
            ));
        }

        self.execute(site, plan, snapshot, cancel).await
    }

    async fn execute(
        &self,
        site: Option<&Site>,
        plan: &Plan,
        snapshot: Snapshot,
        cancel: &CancelToken,
    ) -> Result<ApplyResult> {
        let start = Instant::now();
        let mut result = ApplyResult::new();
        let context = StepContext {
            plane: self.plane.clone(),
            state: self.state.clone(),
            snapshot: Arc::new(Mutex::new(snapshot)),
            retry: self.options.retry.clone(),
            cancel: cancel.clone(),
        };
        let semaphore = Arc::new(Semaphore::new(self.options.parallelism.max(1)));
        // failed, skipped or cancelled
        let mut unsettled: BTreeSet<ResourceId> = BTreeSet::new();

        for (index, level) in plan.levels().into_iter().enumerate() {
            let mut tasks = JoinSet::new();
            let mut running: BTreeSet<ResourceId> = BTreeSet::new();

            for action in level {
                if action.action_type == ActionType::NoOp {
                    continue;
                }
                if cancel.is_cancelled() {
                    result.add_skipped(action, "cancelled".to_string());
                    unsettled.insert(action.address.clone());
                    continue;
                }

                let blocked: Vec<String> = action
                    .depends_on
                    .iter()
                    .filter(|d| unsettled.contains(*d))
                    .map(|d| d.to_string())
                    .collect();
                if !blocked.is_empty() {
                    info!(resource = %action.address, ?blocked, "Skipping step due to failed dependencies");
                    result.add_skipped(
                        action,
                        format!("dependencies did not complete: {}", blocked.join(", ")),
                    );
                    unsettled.insert(action.address.clone());
                    continue;
                }

                let step = match context.prepare(site, action).await {
                    Ok(step) => step,
                    Err(e) => {
                        error!(resource = %action.address, error = %e, "Step could not be prepared");
                        result.add_failure(action, e.to_string());
                        unsettled.insert(action.address.clone());
                        continue;
                    }
                };

                running.insert(action.address.clone());
                let context = context.clone();
                let semaphore = semaphore.clone();
                tasks.spawn(async move {
                    let outcome = async {
                        let _permit = semaphore
                            .acquire_owned()
                            .await
                            .map_err(|_| CloudError::Cancelled)?;
                        tokio::select! {
                            outcome = context.run(&step) => outcome,
                            _ = context.cancel.cancelled() => Err(CloudError::Cancelled),
                        }
                    }
                    .await;
                    (step.action.address.clone(), outcome)
                });
            }

            let mut conflict = None;
            while let Some(joined) = tasks.join_next().await {
                let (address, outcome) = match joined {
                    Ok(done) => done,
                    Err(e) => {
                        error!(level = index, error = %e, "Step task aborted");
                        continue;
                    }
                };
                running.remove(&address);
                let Some(action) = plan.action(&address) else {
                    continue;
                };

                match outcome {
                    Ok(message) => {
                        info!(resource = %address, action = %action.action_type, "{}", message);
                        result.add_success(action, message);
                    }
                    Err(CloudError::Cancelled) => {
                        warn!(resource = %address, "Step cancelled");
                        result.add_skipped(action, "cancelled".to_string());
                        unsettled.insert(address);
                    }
                    Err(e) => {
                        error!(resource = %address, error = %e, "Step failed");
                        if let CloudError::RemoteConflict(message) = &e {
                            conflict = Some(format!("{}: {}", address, message));
                        }
                        result.add_failure(action, e.to_string());
                        unsettled.insert(address);
                    }
                }
            }

            for address in running {
                if let Some(action) = plan.action(&address) {
                    result.add_failure(action, "step task aborted".to_string());
                }
                unsettled.insert(address);
            }

            if let Some(message) = conflict {
                return Err(CloudError::RemoteConflict(message));
            }
        }

        {
            let mut snapshot = context.snapshot.lock().await;
            let outputs = match site {
                Some(site) => evaluate_outputs(site, &snapshot),
                None => BTreeMap::new(),
            };
            let serial = snapshot.serial;
            snapshot.set_outputs(outputs);
            if snapshot.serial != serial {
                self.state.save(&snapshot).await?;
            }
        }

        result.cancelled = cancel.is_cancelled();
        result.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            skipped = result.skipped.len(),
            duration_ms = result.duration_ms,
            "Apply finished"
        );
        Ok(result)
    }
}

/// A step ready to run: the action plus everything resolved before spawning
struct Step {
    action: Action,
    prior: Option<ResourceState>,
    inputs: BTreeMap<String, Value>,
    dependencies: Vec<ResourceId>,
    prevent_destroy: bool,
}

impl Step {
    fn prior(&self) -> Result<&ResourceState> {
        self.prior.as_ref().ok_or_else(|| {
            CloudError::RemoteConflict(format!("{} is not in the state", self.action.address))
        })
    }

    fn request(&self) -> Request {
        Request {
            resource_type: self.action.address.resource_type.clone(),
            name: self.action.address.name.clone(),
            attributes: self.inputs.clone(),
            idempotency_key: self.action.idempotency_key(),
        }
    }
}

#[derive(Clone)]
struct StepContext {
    plane: Arc<dyn ControlPlane>,
    state: StateManager,
    snapshot: Arc<Mutex<Snapshot>>,
    retry: RetryConfig,
    cancel: CancelToken,
}

impl StepContext {
    /// Resolve inputs against the snapshot as it is after earlier levels
    async fn prepare(&self, site: Option<&Site>, action: &Action) -> Result<Step> {
        let snapshot = self.snapshot.lock().await;
        let prior = snapshot.get(&action.address).cloned();

        let mut step = Step {
            action: action.clone(),
            prior,
            inputs: BTreeMap::new(),
            dependencies: Vec::new(),
            prevent_destroy: false,
        };
        if action.action_type == ActionType::Delete {
            return Ok(step);
        }

        let resource = site
            .and_then(|site| site.resource(&action.address))
            .ok_or_else(|| CloudError::ResourceNotFound(action.address.to_string()))?;
        for (name, expr) in &resource.attributes {
            let value = expr.evaluate(&|r| snapshot.lookup(r)).ok_or_else(|| {
                CloudError::InvalidConfig(format!(
                    "{}.{} is still unknown after its dependencies were applied",
                    action.address, name
                ))
            })?;
            step.inputs.insert(name.clone(), value);
        }
        step.dependencies = resource.dependencies().into_iter().collect();
        step.prevent_destroy = resource.lifecycle.prevent_destroy;
        Ok(step)
    }

    async fn run(&self, step: &Step) -> Result<String> {
        let address = &step.action.address;
        match step.action.action_type {
            ActionType::Create => {
                let object = self.create(step).await?;
                Ok(format!("created {} ({})", address, object.id))
            }
            ActionType::Update => {
                let prior = step.prior()?;
                self.check_drift(address, prior).await?;
                let request = step.request();
                let object = with_retry(&self.retry, &self.cancel, "update", || {
                    self.plane.update(&prior.id, &request)
                })
                .await?;

                let mut state = prior.clone();
                state.inputs = step.inputs.clone();
                state.attributes = object.attributes;
                state.dependencies = step.dependencies.clone();
                state.prevent_destroy = step.prevent_destroy;
                state.status = ResourceStatus::Ready;
                state.updated_at = Utc::now();
                self.persist(|snapshot| snapshot.set_resource(state)).await?;
                Ok(format!("updated {}", address))
            }
            ActionType::Replace => {
                let prior = step.prior()?;
                if !prior.is_tainted() {
                    self.check_drift(address, prior).await?;
                }
                self.delete(step, prior).await?;
                let object = self.create(step).await?;
                Ok(format!("replaced {} ({} -> {})", address, prior.id, object.id))
            }
            ActionType::Delete => {
                let prior = step.prior()?;
                self.check_drift(address, prior).await?;
                self.delete(step, prior).await?;
                Ok(format!("deleted {}", address))
            }
            ActionType::NoOp => Ok(String::new()),
        }
    }

    async fn create(&self, step: &Step) -> Result<RemoteObject> {
        let address = &step.action.address;
        let request = step.request();
        let created = with_retry(&self.retry, &self.cancel, "create", || {
            self.plane.create(&request)
        })
        .await;

        let (state, outcome) = match created {
            Ok(object) => {
                let state = ResourceState::new(address, &object.id)
                    .with_attributes(object.attributes.clone());
                (state, Ok(object))
            }
            Err(CloudError::PartiallyCreated {
                resource,
                id,
                message,
            }) => {
                warn!(resource = %address, id = %id, "Created resource is tainted");
                let state = ResourceState::new(address, &id).with_status(ResourceStatus::Tainted);
                let error = CloudError::PartiallyCreated {
                    resource,
                    id,
                    message,
                };
                (state, Err(error))
            }
            Err(e) => return Err(e),
        };

        let state = state
            .with_inputs(step.inputs.clone())
            .with_dependencies(step.dependencies.clone())
            .with_prevent_destroy(step.prevent_destroy);
        self.persist(|snapshot| snapshot.set_resource(state)).await?;
        outcome
    }

    async fn delete(&self, step: &Step, prior: &ResourceState) -> Result<()> {
        let key = step.action.idempotency_key();
        with_retry(&self.retry, &self.cancel, "delete", || {
            self.plane.delete(&prior.resource_type, &prior.id, &key)
        })
        .await?;

        let address = prior.address();
        self.persist(|snapshot| {
            snapshot.remove_resource(&address);
        })
        .await
    }

    /// The remote object must still match the snapshot before it is changed
    async fn check_drift(&self, address: &ResourceId, prior: &ResourceState) -> Result<()> {
        let remote = with_retry(&self.retry, &self.cancel, "read", || {
            self.plane.read(&prior.resource_type, &prior.id)
        })
        .await?;

        match remote {
            None => Err(CloudError::RemoteConflict(format!(
                "{} ({}) no longer exists remotely",
                address, prior.id
            ))),
            Some(object) if object.attributes != prior.attributes => {
                Err(CloudError::RemoteConflict(format!(
                    "{} ({}) was changed outside SiteFlow",
                    address, prior.id
                )))
            }
            Some(_) => Ok(()),
        }
    }

    async fn persist<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Snapshot),
    {
        let mut snapshot = self.snapshot.lock().await;
        mutate(&mut snapshot);
        self.state.save(&snapshot).await
    }
}

/// Run `operation`, retrying retryable errors with exponential backoff
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    cancel: &CancelToken,
    operation: &str,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                let delay = config.delay_for_retry(attempt);
                warn!(
                    operation,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(CloudError::Cancelled),
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
