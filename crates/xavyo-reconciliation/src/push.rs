//! Push orchestrator.
//!
//! Selects internal identities and propagates each one to every resource
//! listed by the task. Every (identity, resource) pair is registered with the
//! propagation tracker before dispatch and recorded exactly once. An
//! unreachable resource halts dispatch to that resource only; its unreached
//! pairs stay `NOT_ATTEMPTED` while the other targets carry on.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use xavyo_connector::error::ConnectorError;
use xavyo_connector::operation::AttributeDelta;

use crate::correlation::{correlate_outbound, outbound_filter};
use crate::engine::EngineInner;
use crate::error::{ReconciliationError, ReconciliationResult};
use crate::hooks::{ErrorVerdict, HookContext, HookVerdict};
use crate::ids::{ExecutionId, TenantId};
use crate::lock::{ExecutionGuard, LockKey};
use crate::model::{Any, Provision, PushTask, TaskDirection};
use crate::policy::{self, Decision, DecisionKind, Mutation};
use crate::registry::ResourceBinding;
use crate::remediation::{RemediationReason, RemediationRecord};
use crate::report::{ExecutionReport, ExecutionStatus, ItemOutcome, ProvisioningReport, ReportBuilder};
use crate::tracker::{PropagationOutcome, PropagationTracker};
use crate::worker::{Slot, WorkerPool};

/// One resource the task pushes to.
struct Target {
    binding: Arc<ResourceBinding>,
    provision: Provision,
    ctx: HookContext,
    /// Cancelled once the resource turns out to be unreachable.
    halt: CancellationToken,
}

impl Target {
    fn key(&self) -> &str {
        self.binding.key()
    }
}

/// State shared by the item tasks of one push execution.
struct PushRun {
    engine: Arc<EngineInner>,
    tenant: TenantId,
    execution_id: ExecutionId,
    task: PushTask,
    targets: Vec<Target>,
    halt: CancellationToken,
}

/// `Ok(None)` means the target was halted before this identity reached it.
type TargetResult = (String, ReconciliationResult<Option<ProvisioningReport>>);

pub(crate) async fn run(
    engine: Arc<EngineInner>,
    tenant: TenantId,
    task: PushTask,
    cancel: CancellationToken,
) -> ReconciliationResult<ExecutionReport> {
    if task.resources.is_empty() {
        return Err(ReconciliationError::invalid_task("push task lists no resources"));
    }

    let execution_id = ExecutionId::new();
    let mut targets = Vec::with_capacity(task.resources.len());
    let mut listed = HashSet::new();
    for resource in &task.resources {
        if !listed.insert(resource.as_str()) {
            return Err(ReconciliationError::invalid_task(format!(
                "resource '{resource}' listed twice"
            )));
        }
        targets.push(resolve_target(&engine, tenant, execution_id, &task, resource)?);
    }

    let _guards = targets
        .iter()
        .map(|target| {
            engine.locks.acquire(
                LockKey {
                    tenant_id: tenant,
                    resource: target.key().to_string(),
                    any_type: task.any_type.clone(),
                    direction: TaskDirection::Push,
                },
                execution_id,
            )
        })
        .collect::<ReconciliationResult<Vec<ExecutionGuard>>>()?;

    info!(
        execution_id = %execution_id,
        resources = targets.len(),
        dry_run = task.flags.dry_run,
        "Push started"
    );

    let mut report = ReportBuilder::new(
        execution_id,
        &task.key,
        tenant,
        TaskDirection::Push,
        task.flags.dry_run,
    );
    let tracker = PropagationTracker::new();
    let default_pool = engine.config.worker_pool_size;
    let pool = WorkerPool::new(
        targets
            .iter()
            .map(|t| t.binding.pool_size(default_pool))
            .min()
            .unwrap_or(default_pool),
    );

    let selected = engine
        .store
        .select(tenant, &task.any_type, task.filter.as_ref())
        .await;
    let run = Arc::new(PushRun {
        engine,
        tenant,
        execution_id,
        task,
        targets,
        halt: cancel.child_token(),
    });

    let mut identities = match selected {
        Ok(identities) => identities,
        Err(e) => {
            let err = ReconciliationError::from(e);
            error!(execution_id = %execution_id, error = %err, "Push selection failed");
            return Ok(report.finish(ExecutionStatus::Failed, &tracker, Some(err.to_string())));
        }
    };
    identities.sort_by_key(|any| any.key);

    let keys: Vec<String> = identities.iter().map(|any| any.key.to_string()).collect();
    for key in &keys {
        for target in &run.targets {
            tracker.begin(key, target.key());
        }
    }
    debug!(identities = keys.len(), "Identities selected for push");

    let slots = pool
        .run(identities, &run.halt, |any| {
            let run = Arc::clone(&run);
            let span = info_span!("push_item", any_key = %any.key);
            async move { run.process(any).await }.instrument(span)
        })
        .await;

    let mut fatal: Option<ReconciliationError> = None;
    let mut skipped = false;
    for (key, slot) in keys.into_iter().zip(slots) {
        match slot {
            Slot::Done(results) => {
                for (resource, result) in results {
                    let item = match result {
                        Ok(Some(item)) => item,
                        Ok(None) => continue,
                        Err(err) => {
                            let item = ProvisioningReport::new(&key, &resource, ItemOutcome::Failed)
                                .with_message(err.to_string());
                            fatal.get_or_insert(err);
                            item
                        }
                    };
                    if let Err(e) = tracker.record(
                        &key,
                        &resource,
                        item.outcome.propagation(),
                        item.message.clone(),
                    ) {
                        fatal.get_or_insert(e);
                    }
                    report.item(item);
                }
            }
            Slot::Skipped => skipped = true,
            Slot::Panicked(message) => {
                let message = format!("item task panicked: {message}");
                for target in &run.targets {
                    if let Err(e) = tracker.record(
                        &key,
                        target.key(),
                        PropagationOutcome::Failure,
                        Some(message.clone()),
                    ) {
                        fatal.get_or_insert(e);
                    }
                    report.item(
                        ProvisioningReport::new(&key, target.key(), ItemOutcome::Failed)
                            .with_message(message.clone()),
                    );
                }
                fatal.get_or_insert(ReconciliationError::invariant(message));
            }
        }
    }

    let status = if fatal.is_some() {
        ExecutionStatus::Failed
    } else if skipped {
        ExecutionStatus::Cancelled
    } else {
        tracker.execution_status()
    };

    let counts = *report.counts();
    match &fatal {
        Some(err) => error!(
            execution_id = %run.execution_id,
            error_code = err.error_code(),
            error = %err,
            "Push failed"
        ),
        None => info!(
            execution_id = %run.execution_id,
            status = %status,
            created = counts.created,
            updated = counts.updated,
            deleted = counts.deleted,
            ignored = counts.ignored,
            remediated = counts.remediated,
            failed = counts.failed,
            "Push finished"
        ),
    }

    Ok(report.finish(status, &tracker, fatal.map(|e| e.to_string())))
}

fn resolve_target(
    engine: &EngineInner,
    tenant: TenantId,
    execution_id: ExecutionId,
    task: &PushTask,
    resource: &str,
) -> ReconciliationResult<Target> {
    let binding = engine.resources.get(resource).ok_or_else(|| {
        ReconciliationError::invalid_task(format!("unknown resource '{resource}'"))
    })?;
    let provision = binding.provision(&task.any_type).cloned().ok_or_else(|| {
        ReconciliationError::invalid_task(format!(
            "resource '{resource}' has no provision for {}",
            task.any_type
        ))
    })?;
    engine
        .mapping
        .registry()
        .validate_provision(&provision)
        .map_err(|e| ReconciliationError::invalid_task(e.to_string()))?;

    for item in &task.correlation_rule.items {
        if !provision.maps(TaskDirection::Push, &item.attribute) {
            return Err(ReconciliationError::invalid_task(format!(
                "correlation attribute '{}' is not mapped outbound on resource '{resource}'",
                item.attribute
            )));
        }
    }

    Ok(Target {
        ctx: HookContext {
            tenant_id: tenant,
            task_key: task.key.clone(),
            execution_id,
            resource: resource.to_string(),
            any_type: task.any_type.clone(),
            dry_run: task.flags.dry_run,
        },
        binding,
        provision,
        halt: CancellationToken::new(),
    })
}

impl PushRun {
    /// Propagate one identity to every target concurrently.
    async fn process(self: Arc<Self>, any: Any) -> Vec<TargetResult> {
        let pending = self.targets.iter().map(|target| {
            let any = &any;
            let run = &self;
            async move {
                let result = run
                    .process_target(any, target)
                    .instrument(info_span!("push_target", resource = %target.key()))
                    .await;
                (target.key().to_string(), result)
            }
        });
        join_all(pending).await
    }

    /// `Err` is returned for fatal errors only.
    async fn process_target(
        &self,
        any: &Any,
        target: &Target,
    ) -> ReconciliationResult<Option<ProvisioningReport>> {
        if target.halt.is_cancelled() {
            return Ok(None);
        }

        let mut operation = None;
        let report = match self.apply(any, target, &mut operation).await {
            Ok(report) => report,
            Err(err @ ReconciliationError::ConnectorUnreachable { .. }) => {
                warn!(error = %err, "Resource unreachable, halting dispatch to it");
                target.halt.cancel();
                if self.targets.iter().all(|t| t.halt.is_cancelled()) {
                    self.halt.cancel();
                }
                return Err(err);
            }
            Err(err) if err.is_fatal() => {
                warn!(error = %err, "Fatal error, halting dispatch");
                self.halt.cancel();
                return Err(err);
            }
            Err(err) => self.failed(any, target, operation, err).await,
        };

        match self.task.actions.after(&target.ctx, any, &report).await {
            Ok(()) => Ok(Some(report)),
            Err(err) => {
                warn!(error = %err, "After hook failed");
                let mut failed = report;
                failed.outcome = ItemOutcome::Failed;
                failed.message = Some(err.to_string());
                Ok(Some(failed))
            }
        }
    }

    async fn apply(
        &self,
        any: &Any,
        target: &Target,
        operation: &mut Option<DecisionKind>,
    ) -> ReconciliationResult<ProvisioningReport> {
        let resource = target.key();
        let key = any.key.to_string();
        let mapped = self.engine.mapping.to_external(any, &target.provision)?;
        let object = self.task.actions.preprocess(&target.ctx, any, mapped).await?;

        let connector = target.binding.connector.as_ref();
        let object_class = target.provision.object_class.as_str();
        let filter = outbound_filter(&self.task.correlation_rule, &target.provision, &object)?;
        let matched = correlate_outbound(connector, resource, object_class, &filter).await?;
        let decision = policy::resolve(matched, &self.task.policy, TaskDirection::Push);
        let kind = decision.kind();
        *operation = Some(kind);

        let mutation = match decision {
            Decision::NoOp { reason } => {
                return Ok(report(&key, resource, kind, ItemOutcome::Ignored).with_message(reason));
            }
            Decision::Remediate(candidates) => {
                let count = candidates.len();
                let item = report(&key, resource, kind, ItemOutcome::Remediated)
                    .with_message(format!("{count} remote objects match"));
                if self.task.flags.dry_run {
                    return Ok(item);
                }
                let reason = RemediationReason::Ambiguous {
                    candidates: candidates.iter().map(|o| o.key().to_string()).collect(),
                };
                let id = self.remediate(any, target, reason, None).await?;
                warn!(candidates = count, remediation_id = %id, "Ambiguous correlation sent to remediation");
                return Ok(item.with_remediation(id));
            }
            Decision::Conflict(existing) => {
                return Err(ReconciliationError::Connector {
                    resource: resource.to_string(),
                    source: ConnectorError::conflict(
                        existing.key(),
                        "object already exists and the policy only allows creation",
                    ),
                });
            }
            Decision::Create => Mutation::Create,
            Decision::Update(existing) => Mutation::Update(existing),
            Decision::Delete(existing) => Mutation::Delete(existing),
        };

        if !self.task.flags.permits(kind) {
            return Ok(report(&key, resource, kind, ItemOutcome::Ignored)
                .with_message(format!("{kind} disabled for this task")));
        }

        let delta = match &mutation {
            Mutation::Update(existing) => {
                let delta = AttributeDelta::between(existing, &object);
                if delta.is_empty() {
                    return Ok(report(&key, resource, kind, ItemOutcome::Ignored)
                        .with_message("unchanged"));
                }
                Some(delta)
            }
            _ => None,
        };

        if let HookVerdict::Ignore { reason } = self
            .task
            .actions
            .before(&target.ctx, any, &object, kind)
            .await?
        {
            return Ok(report(&key, resource, kind, ItemOutcome::Ignored).with_message(reason));
        }

        if self.task.flags.dry_run {
            return Ok(report(&key, resource, kind, ItemOutcome::applied(kind))
                .with_message("dry run"));
        }

        let outcome = match (mutation, delta) {
            (Mutation::Create, _) => connector
                .create(object_class, &object)
                .await
                .map(|remote| debug!(remote_key = %remote, "Remote object created")),
            (Mutation::Update(existing), Some(delta)) => connector
                .update(object_class, existing.key(), &delta)
                .await
                .map(|()| debug!(remote_key = existing.key(), "Remote object updated")),
            (Mutation::Update(existing), None) => {
                return Err(ReconciliationError::invariant(format!(
                    "update of '{}' without a delta",
                    existing.key()
                )));
            }
            (Mutation::Delete(existing), _) => connector
                .delete(object_class, existing.key())
                .await
                .map(|()| debug!(remote_key = existing.key(), "Remote object deleted")),
        };
        outcome.map_err(|e| ReconciliationError::from_connector(resource, e))?;

        Ok(report(&key, resource, kind, ItemOutcome::applied(kind)))
    }

    async fn failed(
        &self,
        any: &Any,
        target: &Target,
        operation: Option<DecisionKind>,
        err: ReconciliationError,
    ) -> ProvisioningReport {
        let mut item = ProvisioningReport::new(any.key.to_string(), target.key(), ItemOutcome::Failed)
            .with_message(err.to_string());
        item.operation = operation;

        if let ErrorVerdict::Ignore { reason } =
            self.task.actions.on_error(&target.ctx, any, &err).await
        {
            debug!(error = %err, reason = %reason, "Item error ignored by hook");
            item.outcome = ItemOutcome::Ignored;
            item.message = Some(reason);
            return item;
        }

        warn!(error_code = err.error_code(), error = %err, "Push item failed");

        if self.task.flags.remediation && !self.task.flags.dry_run {
            let reason = RemediationReason::ItemFailed {
                error_code: err.error_code().to_string(),
            };
            match self.remediate(any, target, reason, Some(err.to_string())).await {
                Ok(id) => item = item.with_remediation(id),
                Err(e) => warn!(error = %e, "Failed to file remediation record"),
            }
        }
        item
    }

    async fn remediate(
        &self,
        any: &Any,
        target: &Target,
        reason: RemediationReason,
        error: Option<String>,
    ) -> ReconciliationResult<Uuid> {
        let record = RemediationRecord {
            id: Uuid::new_v4(),
            tenant_id: self.tenant,
            task_key: self.task.key.clone(),
            execution_id: self.execution_id,
            direction: TaskDirection::Push,
            resource: target.key().to_string(),
            any_type: self.task.any_type.clone(),
            key: any.key.to_string(),
            reason,
            error,
            payload: serde_json::to_value(any).unwrap_or_default(),
            created_at: Utc::now(),
        };
        Ok(self.engine.remediation.submit(record).await?)
    }
}

fn report(key: &str, resource: &str, kind: DecisionKind, outcome: ItemOutcome) -> ProvisioningReport {
    ProvisioningReport::new(key, resource, outcome).with_operation(kind)
}
