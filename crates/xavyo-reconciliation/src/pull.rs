//! Pull orchestrator.
//!
//! Pages through one resource's changes (or its full content), and for every
//! connector object runs preprocess hooks, inbound mapping, correlation and
//! the conflict policy before applying the resulting decision to the
//! identity store. Deletion notices are correlated by key alone and delete
//! the single matching identity.
//!
//! The sync token is persisted only after every item of a page has been
//! processed, so a failed or cancelled execution resumes from the last fully
//! processed page.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use xavyo_connector::object::{ConnObject, SyncDeltaKind};
use xavyo_connector::operation::{PageRequest, SearchResult, SyncToken};

use crate::correlation::{correlate_inbound, find_identities, Comparison, Criterion};
use crate::engine::EngineInner;
use crate::error::{ReconciliationError, ReconciliationResult, StoreError};
use crate::hooks::{ErrorVerdict, HookContext, HookVerdict};
use crate::ids::{AnyKey, ExecutionId, TenantId};
use crate::lock::LockKey;
use crate::model::{AnyDraft, Provision, PullMode, PullTask, TaskDirection};
use crate::policy::{self, Decision, DecisionKind, Mutation};
use crate::registry::ResourceBinding;
use crate::remediation::{RemediationReason, RemediationRecord};
use crate::report::{ExecutionReport, ExecutionStatus, ItemOutcome, ProvisioningReport, ReportBuilder};
use crate::tracker::{PropagationOutcome, PropagationTracker};
use crate::worker::{Slot, WorkerPool};

/// State shared by the item tasks of one pull execution.
struct PullRun {
    engine: Arc<EngineInner>,
    tenant: TenantId,
    execution_id: ExecutionId,
    task: PullTask,
    binding: Arc<ResourceBinding>,
    provision: Provision,
    ctx: HookContext,
    halt: CancellationToken,
}

pub(crate) async fn run(
    engine: Arc<EngineInner>,
    tenant: TenantId,
    task: PullTask,
    cancel: CancellationToken,
) -> ReconciliationResult<ExecutionReport> {
    let binding = engine.resources.get(&task.resource).ok_or_else(|| {
        ReconciliationError::invalid_task(format!("unknown resource '{}'", task.resource))
    })?;
    let provision = binding.provision(&task.any_type).cloned().ok_or_else(|| {
        ReconciliationError::invalid_task(format!(
            "resource '{}' has no provision for {}",
            task.resource, task.any_type
        ))
    })?;
    let schemas = engine.mapping.registry();
    schemas
        .validate_provision(&provision)
        .map_err(|e| ReconciliationError::invalid_task(e.to_string()))?;
    schemas
        .validate_rule(&task.any_type, &task.correlation_rule)
        .map_err(ReconciliationError::invalid_task)?;
    for item in &task.correlation_rule.items {
        if !provision.maps(TaskDirection::Pull, &item.attribute) {
            return Err(ReconciliationError::invalid_task(format!(
                "correlation attribute '{}' is not mapped inbound on resource '{}'",
                item.attribute, task.resource
            )));
        }
    }

    let execution_id = ExecutionId::new();
    let _guard = engine.locks.acquire(
        LockKey {
            tenant_id: tenant,
            resource: task.resource.clone(),
            any_type: task.any_type.clone(),
            direction: TaskDirection::Pull,
        },
        execution_id,
    )?;

    let start_token = match task.mode {
        PullMode::FullReconciliation => None,
        PullMode::Incremental => engine
            .tokens
            .load(tenant, &task.resource, &task.any_type)
            .await?
            .map(|stored| stored.token)
            .or_else(|| task.sync_token.clone()),
    };

    info!(
        execution_id = %execution_id,
        mode = ?task.mode,
        sync_token = start_token.as_ref().map(SyncToken::as_str),
        dry_run = task.flags.dry_run,
        "Pull started"
    );

    let ctx = HookContext {
        tenant_id: tenant,
        task_key: task.key.clone(),
        execution_id,
        resource: task.resource.clone(),
        any_type: task.any_type.clone(),
        dry_run: task.flags.dry_run,
    };
    let mut report = ReportBuilder::new(
        execution_id,
        &task.key,
        tenant,
        TaskDirection::Pull,
        task.flags.dry_run,
    );
    let pool = WorkerPool::new(binding.pool_size(engine.config.worker_pool_size));
    let page_size = engine.config.page_size;
    let run = Arc::new(PullRun {
        engine,
        tenant,
        execution_id,
        task,
        binding,
        provision,
        ctx,
        halt: cancel.child_token(),
    });

    let tracker = PropagationTracker::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut cursor: Option<String> = None;
    let mut fatal: Option<ReconciliationError> = None;
    let mut cancelled = false;
    let mut pages = 0usize;

    loop {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let request = PageRequest::new(page_size)
            .with_cursor(cursor.clone())
            .since(start_token.clone());
        let page = match run
            .binding
            .connector
            .search(
                &run.provision.object_class,
                run.task.filter.as_ref(),
                &request,
            )
            .await
        {
            Ok(page) => page,
            Err(e) => {
                let err = ReconciliationError::from_connector(&run.task.resource, e);
                error!(page = pages, error = %err, "Pull search failed");
                fatal = Some(err);
                break;
            }
        };
        pages += 1;

        let SearchResult {
            objects,
            next_cursor,
            sync_token,
            has_more,
        } = page;
        let objects = dedupe_last(objects);
        debug!(page = pages, objects = objects.len(), has_more, "Processing page");

        let keys: Vec<String> = objects.iter().map(|o| o.key().to_string()).collect();
        let identities: Vec<String> = keys
            .iter()
            .map(|key| {
                let seen = seen.entry(key.clone()).or_insert(0);
                let identity = if *seen == 0 {
                    key.clone()
                } else {
                    format!("{key}#{seen}")
                };
                *seen += 1;
                identity
            })
            .collect();

        let slots = pool
            .run(objects, &run.halt, |object| {
                let run = Arc::clone(&run);
                let span = info_span!("pull_item", conn_object_key = %object.key());
                async move { run.process(object).await }.instrument(span)
            })
            .await;

        let mut page_complete = true;
        for ((key, identity), slot) in keys.into_iter().zip(identities).zip(slots) {
            let resource = run.task.resource.as_str();
            match slot {
                Slot::Done(Ok(item)) => {
                    if let Err(e) = tracker.record(
                        &identity,
                        resource,
                        item.outcome.propagation(),
                        item.message.clone(),
                    ) {
                        fatal.get_or_insert(e);
                        page_complete = false;
                    }
                    report.item(item);
                }
                Slot::Done(Err(err)) => {
                    let message = err.to_string();
                    if let Err(e) = tracker.record(
                        &identity,
                        resource,
                        PropagationOutcome::Failure,
                        Some(message.clone()),
                    ) {
                        fatal.get_or_insert(e);
                    }
                    report.item(
                        ProvisioningReport::new(key, resource, ItemOutcome::Failed)
                            .with_message(message),
                    );
                    fatal.get_or_insert(err);
                    page_complete = false;
                }
                Slot::Skipped => {
                    tracker.begin(&identity, resource);
                    page_complete = false;
                }
                Slot::Panicked(message) => {
                    let message = format!("item task panicked: {message}");
                    if let Err(e) = tracker.record(
                        &identity,
                        resource,
                        PropagationOutcome::Failure,
                        Some(message.clone()),
                    ) {
                        fatal.get_or_insert(e);
                    }
                    report.item(
                        ProvisioningReport::new(key, resource, ItemOutcome::Failed)
                            .with_message(message.clone()),
                    );
                    fatal.get_or_insert(ReconciliationError::invariant(message));
                    page_complete = false;
                }
            }
        }

        if !page_complete {
            cancelled = fatal.is_none() && cancel.is_cancelled();
            break;
        }

        if let Some(token) = sync_token {
            if run.task.flags.dry_run {
                debug!(sync_token = token.as_str(), "Dry run, sync token not persisted");
            } else if let Err(e) = run
                .engine
                .tokens
                .save(run.tenant, &run.task.resource, &run.task.any_type, token.clone())
                .await
            {
                error!(error = %e, "Failed to persist sync token");
                fatal = Some(e.into());
                break;
            } else {
                debug!(sync_token = token.as_str(), "Sync token advanced");
            }
        }

        match next_cursor {
            Some(next) if has_more => cursor = Some(next),
            _ => break,
        }
    }

    let status = if fatal.is_some() {
        ExecutionStatus::Failed
    } else if cancelled {
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
            pages,
            "Pull failed"
        ),
        None => info!(
            execution_id = %run.execution_id,
            status = %status,
            pages,
            created = counts.created,
            updated = counts.updated,
            deleted = counts.deleted,
            ignored = counts.ignored,
            remediated = counts.remediated,
            failed = counts.failed,
            "Pull finished"
        ),
    }

    Ok(report.finish(status, &tracker, fatal.map(|e| e.to_string())))
}

/// Keep only the last occurrence of each key, preserving order.
fn dedupe_last(objects: Vec<ConnObject>) -> Vec<ConnObject> {
    let mut last: HashMap<String, usize> = HashMap::new();
    for (index, object) in objects.iter().enumerate() {
        last.insert(object.key().to_string(), index);
    }
    objects
        .into_iter()
        .enumerate()
        .filter(|(index, object)| last.get(object.key()) == Some(index))
        .map(|(_, object)| object)
        .collect()
}

impl PullRun {
    /// Process one connector object. `Err` is returned for fatal errors only;
    /// item failures are folded into the report.
    async fn process(self: Arc<Self>, object: ConnObject) -> ReconciliationResult<ProvisioningReport> {
        let mut operation = None;
        let report = match self.apply(object.clone(), &mut operation).await {
            Ok(report) => report,
            Err(err) if err.is_fatal() => {
                warn!(error = %err, "Fatal error, halting dispatch");
                self.halt.cancel();
                return Err(err);
            }
            Err(err) => self.failed(&object, operation, err).await,
        };

        match self.task.actions.after(&self.ctx, &object, &report).await {
            Ok(()) => Ok(report),
            Err(err) => {
                warn!(error = %err, "After hook failed");
                let mut failed = report;
                failed.outcome = ItemOutcome::Failed;
                failed.message = Some(err.to_string());
                Ok(failed)
            }
        }
    }

    async fn apply(
        &self,
        object: ConnObject,
        operation: &mut Option<DecisionKind>,
    ) -> ReconciliationResult<ProvisioningReport> {
        let delta = object.delta();
        let object = self.task.actions.preprocess(&self.ctx, object).await?;
        let key = object.key().to_string();
        let store = self.engine.store.as_ref();

        let (draft, decision) = match delta {
            SyncDeltaKind::CreateOrUpdate => {
                let draft = self.engine.mapping.to_internal(&object, &self.provision)?;
                let matched = correlate_inbound(
                    store,
                    self.tenant,
                    &self.task.any_type,
                    &self.task.correlation_rule,
                    &draft,
                )
                .await?;
                let decision = policy::resolve(matched, &self.task.policy, TaskDirection::Pull);
                (draft, decision)
            }
            SyncDeltaKind::Delete => {
                let (attribute, value) = self.engine.mapping.key_to_internal(&object, &self.provision)?;
                let criteria = [Criterion {
                    attribute,
                    comparison: Comparison::Equals,
                    value,
                }];
                let matched = find_identities(store, self.tenant, &self.task.any_type, &criteria).await?;
                let decision = policy::resolve_deletion(matched, &self.task.policy);
                (AnyDraft::new(self.task.any_type.clone()), decision)
            }
        };
        let kind = decision.kind();
        *operation = Some(kind);

        let mutation = match decision {
            Decision::NoOp { reason } => {
                return Ok(self.report(&key, kind, ItemOutcome::Ignored).with_message(reason));
            }
            Decision::Remediate(candidates) => {
                let count = candidates.len();
                let report = self
                    .report(&key, kind, ItemOutcome::Remediated)
                    .with_message(format!("{count} identities match"));
                if self.task.flags.dry_run {
                    return Ok(report);
                }
                let reason = RemediationReason::Ambiguous {
                    candidates: candidates.iter().map(|any| any.key.to_string()).collect(),
                };
                let id = self.remediate(&key, &object, reason, None).await?;
                warn!(candidates = count, remediation_id = %id, "Ambiguous correlation sent to remediation");
                return Ok(report.with_remediation(id));
            }
            Decision::Conflict(existing) => {
                return Err(StoreError::constraint(format!(
                    "identity {} already matches and the policy only allows creation",
                    existing.key
                ))
                .into());
            }
            Decision::Create => Mutation::Create,
            Decision::Update(existing) => Mutation::Update(existing),
            Decision::Delete(existing) => Mutation::Delete(existing),
        };

        if !self.task.flags.permits(kind) {
            return Ok(self
                .report(&key, kind, ItemOutcome::Ignored)
                .with_message(format!("{kind} disabled for this task")));
        }

        if let Mutation::Update(existing) = &mutation {
            if !draft.changes(existing) {
                self.refresh_virtual(existing.key, &draft);
                return Ok(self
                    .report(&key, kind, ItemOutcome::Ignored)
                    .with_message("unchanged"));
            }
        }

        if let HookVerdict::Ignore { reason } = self
            .task
            .actions
            .before(&self.ctx, &object, &draft, kind)
            .await?
        {
            return Ok(self.report(&key, kind, ItemOutcome::Ignored).with_message(reason));
        }

        if self.task.flags.dry_run {
            return Ok(self
                .report(&key, kind, ItemOutcome::applied(kind))
                .with_message("dry run"));
        }

        let listener = &self.engine.cache;
        match mutation {
            Mutation::Create => {
                let created = store.create(self.tenant, &draft, listener).await?;
                self.refresh_virtual(created, &draft);
                debug!(any_key = %created, "Identity created");
            }
            Mutation::Update(existing) => {
                store.update(self.tenant, existing.key, &draft, listener).await?;
                self.refresh_virtual(existing.key, &draft);
                debug!(any_key = %existing.key, "Identity updated");
            }
            Mutation::Delete(existing) => {
                store.delete(self.tenant, existing.key, listener).await?;
                debug!(any_key = %existing.key, "Identity deleted");
            }
        }

        Ok(self.report(&key, kind, ItemOutcome::applied(kind)))
    }

    /// Turn an item error into a report, consulting the error hooks and
    /// filing a remediation record when the task asks for one.
    async fn failed(
        &self,
        object: &ConnObject,
        operation: Option<DecisionKind>,
        err: ReconciliationError,
    ) -> ProvisioningReport {
        let key = object.key();
        let mut report = ProvisioningReport::new(key, &self.task.resource, ItemOutcome::Failed)
            .with_message(err.to_string());
        report.operation = operation;

        if let ErrorVerdict::Ignore { reason } =
            self.task.actions.on_error(&self.ctx, object, &err).await
        {
            debug!(error = %err, reason = %reason, "Item error ignored by hook");
            report.outcome = ItemOutcome::Ignored;
            report.message = Some(reason);
            return report;
        }

        warn!(error_code = err.error_code(), error = %err, "Pull item failed");

        if self.task.flags.remediation && !self.task.flags.dry_run {
            let reason = RemediationReason::ItemFailed {
                error_code: err.error_code().to_string(),
            };
            match self.remediate(key, object, reason, Some(err.to_string())).await {
                Ok(id) => report = report.with_remediation(id),
                Err(e) => warn!(error = %e, "Failed to file remediation record"),
            }
        }
        report
    }

    async fn remediate(
        &self,
        key: &str,
        object: &ConnObject,
        reason: RemediationReason,
        error: Option<String>,
    ) -> ReconciliationResult<Uuid> {
        let record = RemediationRecord {
            id: Uuid::new_v4(),
            tenant_id: self.tenant,
            task_key: self.task.key.clone(),
            execution_id: self.execution_id,
            direction: TaskDirection::Pull,
            resource: self.task.resource.clone(),
            any_type: self.task.any_type.clone(),
            key: key.to_string(),
            reason,
            error,
            payload: serde_json::to_value(object).unwrap_or_default(),
            created_at: Utc::now(),
        };
        Ok(self.engine.remediation.submit(record).await?)
    }

    fn refresh_virtual(&self, key: AnyKey, draft: &AnyDraft) {
        self.engine.cache.refresh(self.tenant, key, &draft.virtual_attrs);
    }

    fn report(&self, key: &str, kind: DecisionKind, outcome: ItemOutcome) -> ProvisioningReport {
        ProvisioningReport::new(key, &self.task.resource, outcome).with_operation(kind)
    }
}
