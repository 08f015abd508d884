//! The workflow engine facade.
//!
//! `Engine` owns instance lifecycle on top of the repository ports. Every
//! frontier change goes through `settle`, the commit loop:
//!
//! 1. Read the instance and its version. Terminal instances only get their
//!    leftover pending records skipped.
//! 2. Plan the transition from that snapshot (`plan_transition`).
//! 3. Apply the idempotent pre-commit effects (record creation, skipping the
//!    records of nodes whose verdict is already decided).
//! 4. Write the planned instance conditioned on the version read in step 1.
//! 5. On success, enqueue notifications and publish events. On a version
//!    conflict, go back to step 1, up to `max_commit_attempts`.
//!
//! Only the commit that wins enqueues notifications, so concurrent approvals
//! produce exactly one transition. A cancellation bumps the version too, so a
//! commit racing it loses, re-reads `Cancelled`, and stops.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use hrflow_types::approval::{ApprovalAction, ApprovalRecord, ApprovalStatus};
use hrflow_types::config::EngineConfig;
use hrflow_types::definition::{BusinessType, NodeKind, WorkflowDefinition};
use hrflow_types::error::RepositoryError;
use hrflow_types::event::WorkflowEvent;
use hrflow_types::instance::{InstanceFilter, InstanceSnapshot, InstanceStatus, WorkflowInstance};
use hrflow_types::notification::{DeliveryStatus, NotificationDelivery};
use hrflow_types::NodeId;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::repository::outbox::OutboxRepository;
use crate::repository::workflow::WorkflowRepository;

use super::definition::{ValidationError, validate_definition};
use super::executor::{Effect, ExecutionError};
use super::transition::{TransitionPlan, plan_transition};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("definition not found: {0}")]
    DefinitionNotFound(Uuid),

    #[error("definition is invalid: {0}")]
    DefinitionInvalid(#[from] ValidationError),

    #[error("definition {0} has no active version")]
    DefinitionInactive(Uuid),

    #[error("instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("instance {id} is {status}, not running")]
    InstanceNotRunning { id: Uuid, status: InstanceStatus },

    #[error("node '{0}' is not in the frontier")]
    NodeNotInFrontier(NodeId),

    #[error("'{approver_id}' is not an approver of node '{node_id}'")]
    NotAnApprover { node_id: NodeId, approver_id: String },

    #[error("'{approver_id}' already decided on node '{node_id}'")]
    AlreadyDecided { node_id: NodeId, approver_id: String },

    #[error("node '{0}' already resolved")]
    NodeAlreadyResolved(NodeId),

    #[error("instance {0} changed concurrently too many times, giving up")]
    ConcurrentModification(Uuid),

    #[error("no dead-lettered notification with key '{0}'")]
    DeliveryNotFound(String),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    /// Late actions: the caller was right when they looked, but someone got
    /// there first. These are expected under concurrency, not faults.
    pub fn is_late_action(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyDecided { .. } | EngineError::NodeAlreadyResolved(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Workflow orchestration facade over a `WorkflowRepository` and an
/// `OutboxRepository`.
pub struct Engine<R, O> {
    repo: R,
    outbox: O,
    config: EngineConfig,
    event_bus: EventBus,
    dispatch_signal: Arc<Notify>,
}

impl<R, O> Engine<R, O>
where
    R: WorkflowRepository,
    O: OutboxRepository,
{
    pub fn new(repo: R, outbox: O, config: EngineConfig, event_bus: EventBus) -> Self {
        Self {
            repo,
            outbox,
            config,
            event_bus,
            dispatch_signal: Arc::new(Notify::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Handle the dispatcher waits on; notified whenever a delivery is
    /// enqueued or requeued.
    pub fn dispatch_signal(&self) -> Arc<Notify> {
        self.dispatch_signal.clone()
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Validate and store a new active version of a definition.
    ///
    /// The version is `latest + 1` (1 for a new id); `version`, `active`,
    /// and `created_at` on the input are overwritten.
    pub async fn publish_definition(
        &self,
        mut def: WorkflowDefinition,
    ) -> Result<WorkflowDefinition, EngineError> {
        validate_definition(&def)?;

        for _ in 0..self.commit_attempts() {
            let latest = self.repo.get_latest_definition(&def.id).await?;
            def.version = latest.map_or(1, |d| d.version + 1);
            def.active = true;
            def.created_at = Utc::now();

            match self.repo.insert_definition(&def).await {
                Ok(()) => {
                    tracing::info!(
                        definition_id = %def.id,
                        version = def.version,
                        name = %def.name,
                        "definition published"
                    );
                    return Ok(def);
                }
                Err(RepositoryError::Conflict(reason)) => {
                    tracing::debug!(definition_id = %def.id, %reason, "version taken, retrying publish");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::ConcurrentModification(def.id))
    }

    /// Mark every version of a definition inactive. Running instances keep
    /// their pinned version.
    pub async fn deactivate_definition(&self, id: Uuid) -> Result<(), EngineError> {
        if self.repo.get_latest_definition(&id).await?.is_none() {
            return Err(EngineError::DefinitionNotFound(id));
        }
        let touched = self.repo.deactivate_definition(&id).await?;
        tracing::info!(definition_id = %id, versions = touched, "definition deactivated");
        Ok(())
    }

    /// One version of a definition, or the latest when `version` is `None`.
    pub async fn get_definition(
        &self,
        id: Uuid,
        version: Option<u32>,
    ) -> Result<Option<WorkflowDefinition>, EngineError> {
        let def = match version {
            Some(v) => self.repo.get_definition(&id, v).await?,
            None => self.repo.get_latest_definition(&id).await?,
        };
        Ok(def)
    }

    pub async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, EngineError> {
        Ok(self.repo.list_definitions().await?)
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Start an instance of the latest active version of a definition.
    ///
    /// The first transition (from the start node through every non-blocking
    /// node) is planned before anything is written, so an invalid definition
    /// or a failing condition leaves no instance behind.
    pub async fn create_instance(
        &self,
        definition_id: Uuid,
        business_type: BusinessType,
        business_id: &str,
        initiator_id: &str,
        variables: Map<String, Value>,
    ) -> Result<Uuid, EngineError> {
        if self.repo.get_latest_definition(&definition_id).await?.is_none() {
            return Err(EngineError::DefinitionNotFound(definition_id));
        }
        let def = self
            .repo
            .get_active_definition(&definition_id)
            .await?
            .ok_or(EngineError::DefinitionInactive(definition_id))?;
        validate_definition(&def)?;
        let start = def
            .start_node()
            .ok_or(EngineError::DefinitionInvalid(ValidationError::NoStartNode))?;

        let now = Utc::now();
        let seed = WorkflowInstance {
            id: Uuid::now_v7(),
            definition_id: def.id,
            definition_version: def.version,
            business_type,
            business_id: business_id.to_string(),
            initiator_id: initiator_id.to_string(),
            status: InstanceStatus::Running,
            frontier: [start.id.clone()].into_iter().collect(),
            variables,
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancel_reason: None,
        };

        let plan = plan_transition(&def, &seed, &[])?;
        let mut instance = plan.instance.clone();
        if instance.status.is_terminal() {
            instance.completed_at = Some(now);
        }

        self.repo.insert_instance(&instance).await?;
        // The instance exists from here on. Missing records are recreated by
        // `approve` or `resume_instance`.
        if let Err(e) = self.apply_pre_commit(instance.id, &plan.pre_commit).await {
            tracing::error!(instance_id = %instance.id, error = %e, "approval record creation failed after instance insert");
        }

        tracing::info!(
            instance_id = %instance.id,
            definition_id = %def.id,
            definition_version = def.version,
            business_id = %instance.business_id,
            "instance created"
        );
        self.event_bus.publish(WorkflowEvent::InstanceCreated {
            instance_id: instance.id,
            definition_id: def.id,
            definition_version: def.version,
            business_type,
            business_id: instance.business_id.clone(),
        });
        self.after_commit(&instance, &plan).await;

        Ok(instance.id)
    }

    /// Record one approver's decision on an Approval node, then advance the
    /// instance if the node's verdict is now decided.
    pub async fn approve(
        &self,
        instance_id: Uuid,
        node_id: &str,
        approver_id: &str,
        action: ApprovalAction,
        comment: Option<&str>,
    ) -> Result<InstanceSnapshot, EngineError> {
        let instance = self.load_instance(instance_id).await?;
        ensure_running(&instance)?;
        let def = self.pinned_definition(&instance).await?;

        let approvers = match def.node(node_id).map(|n| &n.kind) {
            Some(NodeKind::Approval { approvers, .. }) => approvers,
            _ => return Err(EngineError::NodeNotInFrontier(node_id.to_string())),
        };
        if !approvers.contains(approver_id) {
            return Err(EngineError::NotAnApprover {
                node_id: node_id.to_string(),
                approver_id: approver_id.to_string(),
            });
        }

        if !instance.frontier.contains(node_id) {
            let records = self.repo.list_approval_records(&instance.id).await?;
            let existing = records
                .iter()
                .find(|r| r.node_id == node_id && r.approver_id == approver_id)
                .map(|r| r.status);
            let err = match existing {
                Some(ApprovalStatus::Skipped) => EngineError::NodeAlreadyResolved(node_id.to_string()),
                Some(ApprovalStatus::Approved | ApprovalStatus::Rejected) => EngineError::AlreadyDecided {
                    node_id: node_id.to_string(),
                    approver_id: approver_id.to_string(),
                },
                _ => return Err(EngineError::NodeNotInFrontier(node_id.to_string())),
            };
            tracing::debug!(instance_id = %instance.id, node_id, approver_id, error = %err, "late approval action");
            return Err(err);
        }

        // Records are normally created when the node enters the frontier;
        // this covers a crash between that commit and record creation.
        let records: Vec<ApprovalRecord> = approvers
            .iter()
            .map(|a| ApprovalRecord::pending(instance.id, node_id, a))
            .collect();
        self.repo.insert_approval_records(&records).await?;

        match self
            .repo
            .decide_approval(&instance.id, node_id, approver_id, action.status(), comment, Utc::now())
            .await
        {
            Ok(()) => {
                tracing::info!(
                    instance_id = %instance.id,
                    node_id,
                    approver_id,
                    action = ?action,
                    "approval recorded"
                );
            }
            Err(RepositoryError::Conflict(_)) => {
                let err = self.classify_late_action(instance.id, node_id, approver_id).await?;
                if err.is_late_action() {
                    tracing::debug!(instance_id = %instance.id, node_id, approver_id, error = %err, "late approval action");
                }
                return Err(err);
            }
            Err(e) => return Err(e.into()),
        }

        let settled = self.settle(instance.id).await?;
        if settled.status == InstanceStatus::Cancelled {
            // The decision landed but a cancellation committed before it
            // could advance anything.
            tracing::debug!(instance_id = %settled.id, node_id, approver_id, "approval overtaken by cancellation");
            return Err(EngineError::InstanceNotRunning {
                id: settled.id,
                status: settled.status,
            });
        }
        Ok(settled.snapshot())
    }

    /// Cancel a running instance. Cancellation skips every pending record
    /// and always wins against concurrent commits.
    pub async fn cancel_instance(
        &self,
        instance_id: Uuid,
        reason: Option<&str>,
    ) -> Result<InstanceSnapshot, EngineError> {
        for attempt in 1..=self.commit_attempts() {
            let current = self.load_instance(instance_id).await?;
            ensure_running(&current)?;

            let now = Utc::now();
            let mut next = current.clone();
            next.status = InstanceStatus::Cancelled;
            next.frontier.clear();
            next.cancel_reason = reason.map(str::to_string);
            next.completed_at = Some(now);
            next.updated_at = now;
            next.version = current.version + 1;

            match self.repo.update_instance(&next, current.version).await {
                Ok(()) => {
                    // Leftovers are skipped again by any later settle.
                    let skipped = match self.repo.skip_pending_approvals(&next.id, None).await {
                        Ok(n) => n,
                        Err(e) => {
                            tracing::error!(instance_id = %next.id, error = %e, "skipping approvals after cancel failed");
                            0
                        }
                    };
                    tracing::info!(
                        instance_id = %next.id,
                        skipped_records = skipped,
                        reason = reason.unwrap_or(""),
                        "instance cancelled"
                    );
                    self.event_bus.publish(WorkflowEvent::InstanceCancelled {
                        instance_id: next.id,
                        reason: next.cancel_reason.clone(),
                    });
                    return Ok(next.snapshot());
                }
                Err(RepositoryError::Conflict(_)) => {
                    tracing::debug!(instance_id = %instance_id, attempt, "cancel lost version race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::ConcurrentModification(instance_id))
    }

    /// Re-run the commit loop for an instance, e.g. after a caller gave up
    /// with `ConcurrentModification` or a process died mid-transition.
    pub async fn resume_instance(&self, instance_id: Uuid) -> Result<InstanceSnapshot, EngineError> {
        Ok(self.settle(instance_id).await?.snapshot())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get_instance(&self, instance_id: Uuid) -> Result<Option<InstanceSnapshot>, EngineError> {
        Ok(self
            .repo
            .get_instance(&instance_id)
            .await?
            .map(|i| i.snapshot()))
    }

    pub async fn get_approval_records(&self, instance_id: Uuid) -> Result<Vec<ApprovalRecord>, EngineError> {
        Ok(self.repo.list_approval_records(&instance_id).await?)
    }

    /// Running instances waiting on `approver_id`.
    pub async fn get_pending_approvals(
        &self,
        approver_id: &str,
    ) -> Result<Vec<InstanceSnapshot>, EngineError> {
        let records = self.repo.list_pending_approvals(approver_id).await?;
        let mut included = HashSet::new();
        let mut out = Vec::new();

        for record in records {
            if included.contains(&record.instance_id) {
                continue;
            }
            let Some(instance) = self.repo.get_instance(&record.instance_id).await? else {
                continue;
            };
            if instance.status == InstanceStatus::Running && instance.frontier.contains(&record.node_id) {
                included.insert(instance.id);
                out.push(instance.snapshot());
            }
        }
        Ok(out)
    }

    pub async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<InstanceSnapshot>, EngineError> {
        Ok(self
            .repo
            .list_instances(filter)
            .await?
            .iter()
            .map(WorkflowInstance::snapshot)
            .collect())
    }

    pub async fn list_dead_letters(&self) -> Result<Vec<NotificationDelivery>, EngineError> {
        Ok(self.outbox.list_by_status(DeliveryStatus::DeadLettered).await?)
    }

    /// Give a dead-lettered notification a fresh retry budget.
    pub async fn requeue_dead_letter(&self, key: &str) -> Result<(), EngineError> {
        if !self.outbox.requeue(key).await? {
            return Err(EngineError::DeliveryNotFound(key.to_string()));
        }
        tracing::info!(key, "dead letter requeued");
        self.dispatch_signal.notify_one();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commit loop
    // -----------------------------------------------------------------------

    async fn settle(&self, instance_id: Uuid) -> Result<WorkflowInstance, EngineError> {
        for attempt in 1..=self.commit_attempts() {
            let current = self.load_instance(instance_id).await?;
            if current.status.is_terminal() {
                // A commit that lost against a cancellation may have created
                // records after the canceller's cleanup.
                self.repo.skip_pending_approvals(&current.id, None).await?;
                return Ok(current);
            }

            let def = self.pinned_definition(&current).await?;
            let records = self.repo.list_approval_records(&current.id).await?;
            let plan = plan_transition(&def, &current, &records)?;
            self.apply_pre_commit(current.id, &plan.pre_commit).await?;

            if !plan.changes(&current) {
                return Ok(current);
            }

            let now = Utc::now();
            let mut next = plan.instance.clone();
            next.version = current.version + 1;
            next.updated_at = now;
            if next.status.is_terminal() {
                next.completed_at = Some(now);
            }

            match self.repo.update_instance(&next, current.version).await {
                Ok(()) => {
                    tracing::debug!(
                        instance_id = %next.id,
                        version = next.version,
                        attempt,
                        frontier = ?next.frontier,
                        "transition committed"
                    );
                    self.after_commit(&next, &plan).await;
                    return Ok(next);
                }
                Err(RepositoryError::Conflict(_)) => {
                    tracing::debug!(instance_id = %instance_id, attempt, "commit lost version race, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::warn!(
            instance_id = %instance_id,
            attempts = self.commit_attempts(),
            "commit attempts exhausted"
        );
        Err(EngineError::ConcurrentModification(instance_id))
    }

    async fn apply_pre_commit(&self, instance_id: Uuid, effects: &[Effect]) -> Result<(), EngineError> {
        for effect in effects {
            match effect {
                Effect::CreateApprovalRecords { node_id, approvers } => {
                    let records: Vec<ApprovalRecord> = approvers
                        .iter()
                        .map(|a| ApprovalRecord::pending(instance_id, node_id, a))
                        .collect();
                    self.repo.insert_approval_records(&records).await?;
                }
                Effect::SkipPending { node_id } => {
                    self.repo
                        .skip_pending_approvals(&instance_id, Some(node_id))
                        .await?;
                }
                Effect::Notify { .. } => {}
            }
        }
        Ok(())
    }

    /// Effects and events owned by the winning commit. The transition is
    /// already durable, so failures here are logged and never returned.
    async fn after_commit(&self, instance: &WorkflowInstance, plan: &TransitionPlan) {
        if instance.status.is_terminal() {
            if let Err(e) = self.repo.skip_pending_approvals(&instance.id, None).await {
                tracing::error!(instance_id = %instance.id, error = %e, "skipping leftover approvals failed");
            }
        }

        let mut enqueued = false;
        for effect in &plan.post_commit {
            if let Effect::Notify { node_id, request } = effect {
                let delivery = NotificationDelivery::new(instance.id, node_id, request.clone());
                match self.outbox.enqueue(&delivery).await {
                    Ok(true) => {
                        tracing::debug!(instance_id = %instance.id, node_id = %node_id, key = %delivery.key(), "notification enqueued");
                        enqueued = true;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(
                            instance_id = %instance.id,
                            node_id = %node_id,
                            key = %delivery.key(),
                            error = %e,
                            "notification enqueue failed"
                        );
                    }
                }
            }
        }
        if enqueued {
            self.dispatch_signal.notify_one();
        }

        for node_id in &plan.entered {
            self.event_bus.publish(WorkflowEvent::NodeEntered {
                instance_id: instance.id,
                node_id: node_id.clone(),
            });
        }
        for (node_id, verdict) in &plan.resolved {
            self.event_bus.publish(WorkflowEvent::NodeResolved {
                instance_id: instance.id,
                node_id: node_id.clone(),
                verdict: *verdict,
            });
        }

        match instance.status {
            InstanceStatus::Completed => {
                tracing::info!(instance_id = %instance.id, "instance completed");
                self.event_bus.publish(WorkflowEvent::InstanceCompleted {
                    instance_id: instance.id,
                });
            }
            InstanceStatus::Rejected => {
                let node_id = plan.rejected_at.clone().unwrap_or_default();
                tracing::info!(instance_id = %instance.id, node_id = %node_id, "instance rejected");
                self.event_bus.publish(WorkflowEvent::InstanceRejected {
                    instance_id: instance.id,
                    node_id,
                });
            }
            InstanceStatus::Running | InstanceStatus::Cancelled => {}
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn commit_attempts(&self) -> u32 {
        self.config.max_commit_attempts.max(1)
    }

    async fn load_instance(&self, id: Uuid) -> Result<WorkflowInstance, EngineError> {
        self.repo
            .get_instance(&id)
            .await?
            .ok_or(EngineError::InstanceNotFound(id))
    }

    async fn pinned_definition(&self, instance: &WorkflowInstance) -> Result<WorkflowDefinition, EngineError> {
        self.repo
            .get_definition(&instance.definition_id, instance.definition_version)
            .await?
            .ok_or(EngineError::DefinitionNotFound(instance.definition_id))
    }

    /// Explain why a `Pending -> decided` write found the record already
    /// decided.
    async fn classify_late_action(
        &self,
        instance_id: Uuid,
        node_id: &str,
        approver_id: &str,
    ) -> Result<EngineError, EngineError> {
        let instance = self.load_instance(instance_id).await?;
        if instance.status.is_terminal() {
            return Ok(EngineError::InstanceNotRunning {
                id: instance.id,
                status: instance.status,
            });
        }
        let records = self.repo.list_approval_records(&instance_id).await?;
        let status = records
            .iter()
            .find(|r| r.node_id == node_id && r.approver_id == approver_id)
            .map(|r| r.status);
        Ok(match status {
            Some(ApprovalStatus::Skipped) => EngineError::NodeAlreadyResolved(node_id.to_string()),
            _ => EngineError::AlreadyDecided {
                node_id: node_id.to_string(),
                approver_id: approver_id.to_string(),
            },
        })
    }
}

fn ensure_running(instance: &WorkflowInstance) -> Result<(), EngineError> {
    if instance.status.is_terminal() {
        return Err(EngineError::InstanceNotRunning {
            id: instance.id,
            status: instance.status,
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use hrflow_types::notification::NotificationRequest;
    use serde_json::json;

    use crate::repository::memory::{MemoryOutboxRepository, MemoryWorkflowRepository};
    use crate::workflow::definition::parse_definition_yaml;
    use crate::workflow::dispatch::{DispatchError, NotificationDispatcher, NotificationSink};

    type TestEngine = Engine<MemoryWorkflowRepository, MemoryOutboxRepository>;

    fn engine() -> TestEngine {
        Engine::new(
            MemoryWorkflowRepository::new(),
            MemoryOutboxRepository::new(),
            EngineConfig::default(),
            EventBus::new(1024),
        )
    }

    /// `approval(quorum, approvers) -> notification -> end`
    fn approval_flow(quorum: &str, approvers: &[&str]) -> WorkflowDefinition {
        let yaml = format!(
            r#"
organization_id: acme
name: Salary adjustment
category: salary_adjustment
nodes:
  - id: review
    name: Review
    kind: {{ type: approval, approvers: [{approvers}], quorum: {quorum} }}
  - id: inform
    name: Inform payroll
    kind: {{ type: notification, recipients: [payroll], channel: email }}
  - id: done
    name: Done
    kind: {{ type: end }}
edges:
  - {{ from: review, to: inform }}
  - {{ from: inform, to: done }}
"#,
            approvers = approvers.join(", "),
        );
        parse_definition_yaml(&yaml).unwrap()
    }

    fn leave_flow() -> WorkflowDefinition {
        parse_definition_yaml(
            r#"
organization_id: acme
name: Leave
category: custom
nodes:
  - id: long
    name: Long leave?
    kind:
      type: condition
      predicate: { field: days, operator: gt, value: 3 }
  - id: manager
    name: Manager
    kind: { type: approval, approvers: [mia], quorum: any }
  - id: auto
    name: Auto-approved notice
    kind: { type: notification, recipients: [employee], channel: in_app }
  - id: done
    name: Done
    kind: { type: end }
edges:
  - { from: long, to: manager, guard: then }
  - { from: long, to: auto, guard: else }
  - { from: manager, to: done }
  - { from: auto, to: done }
"#,
        )
        .unwrap()
    }

    async fn start(engine: &TestEngine, def: WorkflowDefinition, variables: Value) -> Uuid {
        let def = engine.publish_definition(def).await.unwrap();
        engine
            .create_instance(
                def.id,
                def.category,
                "EMP-1001",
                "initiator",
                variables.as_object().cloned().unwrap_or_default(),
            )
            .await
            .unwrap()
    }

    async fn status(engine: &TestEngine, id: Uuid) -> InstanceStatus {
        engine.get_instance(id).await.unwrap().unwrap().status
    }

    struct CountingSink {
        calls: AtomicU32,
    }

    impl NotificationSink for CountingSink {
        async fn deliver(&self, _request: &NotificationRequest) -> Result<(), DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // -----------------------------------------------------------------------
    // End to end
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_all_approval_then_notification_completes_with_one_dispatch() {
        let engine = engine();
        let id = start(&engine, approval_flow("all", &["a", "b"]), json!({})).await;
        assert_eq!(status(&engine, id).await, InstanceStatus::Running);
        assert_eq!(engine.get_approval_records(id).await.unwrap().len(), 2);

        let snap = engine
            .approve(id, "review", "a", ApprovalAction::Approve, Some("fine"))
            .await
            .unwrap();
        assert_eq!(snap.frontier, vec!["review".to_string()]);

        let snap = engine
            .approve(id, "review", "b", ApprovalAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(snap.status, InstanceStatus::Completed);
        assert!(snap.frontier.is_empty());
        assert!(snap.completed_at.is_some());
        assert_eq!(snap.variables["approval.review"], json!("approved"));

        let records = engine.get_approval_records(id).await.unwrap();
        assert!(records.iter().all(|r| r.status == ApprovalStatus::Approved));

        let sink = Arc::new(CountingSink { calls: AtomicU32::new(0) });
        let dispatcher = NotificationDispatcher::new(
            engine.outbox.clone(),
            sink.clone(),
            engine.config().dispatch.clone(),
            engine.event_bus().clone(),
            engine.dispatch_signal(),
        );
        assert_eq!(dispatcher.run_pending().await.unwrap().delivered, 1);
        assert_eq!(dispatcher.run_pending().await.unwrap().delivered, 0);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_any_of_three_resolves_on_first_approval() {
        let engine = engine();
        let id = start(&engine, approval_flow("any", &["a", "b", "c"]), json!({})).await;

        let snap = engine
            .approve(id, "review", "b", ApprovalAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(snap.status, InstanceStatus::Completed);

        let records = engine.get_approval_records(id).await.unwrap();
        let skipped = records.iter().filter(|r| r.status == ApprovalStatus::Skipped).count();
        assert_eq!(skipped, 2);

        let err = engine
            .approve(id, "review", "c", ApprovalAction::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InstanceNotRunning { .. }));
    }

    #[tokio::test]
    async fn test_any_of_three_rejects_only_when_all_reject() {
        let engine = engine();
        let id = start(&engine, approval_flow("any", &["a", "b", "c"]), json!({})).await;
        for who in ["a", "b"] {
            let snap = engine
                .approve(id, "review", who, ApprovalAction::Reject, None)
                .await
                .unwrap();
            assert_eq!(snap.status, InstanceStatus::Running);
        }
        let snap = engine
            .approve(id, "review", "c", ApprovalAction::Reject, None)
            .await
            .unwrap();
        assert_eq!(snap.status, InstanceStatus::Rejected);
    }

    #[tokio::test]
    async fn test_all_of_three_rejects_on_first_rejection() {
        let engine = engine();
        let mut rx = engine.event_bus().subscribe();
        let id = start(&engine, approval_flow("all", &["a", "b", "c"]), json!({})).await;

        engine
            .approve(id, "review", "a", ApprovalAction::Approve, None)
            .await
            .unwrap();
        let snap = engine
            .approve(id, "review", "b", ApprovalAction::Reject, Some("budget"))
            .await
            .unwrap();
        assert_eq!(snap.status, InstanceStatus::Rejected);
        assert_eq!(snap.variables["approval.review"], json!("rejected"));

        let records = engine.get_approval_records(id).await.unwrap();
        let c = records.iter().find(|r| r.approver_id == "c").unwrap();
        assert_eq!(c.status, ApprovalStatus::Skipped);
        assert!(engine.outbox.list_by_status(DeliveryStatus::Pending).await.unwrap().is_empty());

        let mut rejected = 0;
        while let Ok(event) = rx.try_recv() {
            if let WorkflowEvent::InstanceRejected { node_id, .. } = event {
                assert_eq!(node_id, "review");
                rejected += 1;
            }
        }
        assert_eq!(rejected, 1);
    }

    // -----------------------------------------------------------------------
    // Condition routing
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_condition_routing() {
        let engine = engine();
        let long = start(&engine, leave_flow(), json!({"days": 5})).await;
        let snap = engine.get_instance(long).await.unwrap().unwrap();
        assert_eq!(snap.frontier, vec!["manager".to_string()]);

        let def_id = engine.list_definitions().await.unwrap()[0].id;
        let short = engine
            .create_instance(def_id, BusinessType::Custom, "EMP-2", "x", json!({"days": 2}).as_object().cloned().unwrap())
            .await
            .unwrap();
        assert_eq!(status(&engine, short).await, InstanceStatus::Completed);
    }

    #[tokio::test]
    async fn test_undefined_field_fails_without_creating_instance() {
        let engine = engine();
        let def = engine.publish_definition(leave_flow()).await.unwrap();
        let err = engine
            .create_instance(def.id, BusinessType::Custom, "EMP-3", "x", Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Execution(ExecutionError::Evaluation { .. })));
        assert!(engine.list_instances(&InstanceFilter::default()).await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Cancellation and terminal states
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_cancel_skips_records_and_is_absorbing() {
        let engine = engine();
        let id = start(&engine, approval_flow("all", &["a", "b"]), json!({})).await;
        engine
            .approve(id, "review", "a", ApprovalAction::Approve, None)
            .await
            .unwrap();

        let snap = engine.cancel_instance(id, Some("withdrawn")).await.unwrap();
        assert_eq!(snap.status, InstanceStatus::Cancelled);
        assert_eq!(snap.cancel_reason.as_deref(), Some("withdrawn"));
        assert!(snap.frontier.is_empty());

        let records = engine.get_approval_records(id).await.unwrap();
        assert!(!records.iter().any(|r| r.status == ApprovalStatus::Pending));

        let late = engine
            .approve(id, "review", "b", ApprovalAction::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(
            late,
            EngineError::InstanceNotRunning { status: InstanceStatus::Cancelled, .. }
        ));
        assert!(matches!(
            engine.cancel_instance(id, None).await.unwrap_err(),
            EngineError::InstanceNotRunning { .. }
        ));
        assert_eq!(engine.get_instance(id).await.unwrap().unwrap(), snap);
    }

    #[tokio::test]
    async fn test_completed_instance_is_absorbing() {
        let engine = engine();
        let id = start(&engine, approval_flow("any", &["a"]), json!({})).await;
        let done = engine
            .approve(id, "review", "a", ApprovalAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(done.status, InstanceStatus::Completed);
        assert!(matches!(
            engine.cancel_instance(id, None).await.unwrap_err(),
            EngineError::InstanceNotRunning { status: InstanceStatus::Completed, .. }
        ));
        assert_eq!(engine.get_instance(id).await.unwrap().unwrap(), done);
    }

    // -----------------------------------------------------------------------
    // Authorization and late actions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_authorization_and_late_action_errors() {
        let engine = engine();
        let id = start(&engine, approval_flow("all", &["a", "b"]), json!({})).await;

        assert!(matches!(
            engine.approve(id, "review", "mallory", ApprovalAction::Approve, None).await,
            Err(EngineError::NotAnApprover { .. })
        ));
        assert!(matches!(
            engine.approve(id, "inform", "a", ApprovalAction::Approve, None).await,
            Err(EngineError::NodeNotInFrontier(_))
        ));
        assert!(matches!(
            engine.approve(Uuid::now_v7(), "review", "a", ApprovalAction::Approve, None).await,
            Err(EngineError::InstanceNotFound(_))
        ));

        engine
            .approve(id, "review", "a", ApprovalAction::Approve, None)
            .await
            .unwrap();
        let again = engine
            .approve(id, "review", "a", ApprovalAction::Reject, None)
            .await
            .unwrap_err();
        assert!(matches!(again, EngineError::AlreadyDecided { .. }));
        assert!(again.is_late_action());

        // The failed second decision changed nothing.
        let records = engine.get_approval_records(id).await.unwrap();
        let a = records.iter().find(|r| r.approver_id == "a").unwrap();
        assert_eq!(a.status, ApprovalStatus::Approved);
        assert_eq!(status(&engine, id).await, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_skipped_approver_gets_node_already_resolved() {
        // review (any of a, b) -> second (all of c) -> end: after "a" approves,
        // the instance keeps running on "second" and "b" was skipped.
        let engine = engine();
        let def = parse_definition_yaml(
            r#"
organization_id: acme
name: Transfer
category: transfer
nodes:
  - { id: review, name: Review, kind: { type: approval, approvers: [a, b], quorum: any } }
  - { id: second, name: Second, kind: { type: approval, approvers: [c], quorum: all } }
  - { id: done, name: Done, kind: { type: end } }
edges:
  - { from: review, to: second }
  - { from: second, to: done }
"#,
        )
        .unwrap();
        let id = start(&engine, def, json!({})).await;
        engine
            .approve(id, "review", "a", ApprovalAction::Approve, None)
            .await
            .unwrap();

        let err = engine
            .approve(id, "review", "b", ApprovalAction::Approve, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeAlreadyResolved(n) if n == "review"));

        let pending = engine.get_pending_approvals("c").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].frontier, vec!["second".to_string()]);
        assert!(engine.get_pending_approvals("b").await.unwrap().is_empty());
    }

    // -----------------------------------------------------------------------
    // Concurrency
    // -----------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_approvals_transition_exactly_once() {
        let approvers: Vec<String> = (0..8).map(|i| format!("approver{i}")).collect();
        let names: Vec<&str> = approvers.iter().map(String::as_str).collect();

        for quorum in ["all", "any", "majority"] {
            let engine = Arc::new(engine());
            let mut rx = engine.event_bus().subscribe();
            let id = start(&engine, approval_flow(quorum, &names), json!({})).await;

            let mut handles = Vec::new();
            for who in approvers.clone() {
                let engine = engine.clone();
                handles.push(tokio::spawn(async move {
                    engine
                        .approve(id, "review", &who, ApprovalAction::Approve, None)
                        .await
                }));
            }
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => {}
                    Err(e) if e.is_late_action() => {}
                    Err(EngineError::InstanceNotRunning { .. }) => {}
                    Err(other) => panic!("unexpected error under {quorum}: {other}"),
                }
            }

            assert_eq!(status(&engine, id).await, InstanceStatus::Completed);
            let mut completed = 0;
            let mut resolved = 0;
            while let Ok(event) = rx.try_recv() {
                match event {
                    WorkflowEvent::InstanceCompleted { .. } => completed += 1,
                    WorkflowEvent::NodeResolved { node_id, .. } if node_id == "review" => resolved += 1,
                    _ => {}
                }
            }
            assert_eq!(completed, 1, "{quorum}: exactly one completion");
            assert_eq!(resolved, 1, "{quorum}: review resolved once");
            let outbox = engine.outbox.list_by_status(DeliveryStatus::Pending).await.unwrap();
            assert_eq!(outbox.len(), 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_cancellation_races_final_approval() {
        for _ in 0..20 {
            let engine = Arc::new(engine());
            let mut rx = engine.event_bus().subscribe();
            let id = start(&engine, approval_flow("all", &["a", "b"]), json!({})).await;
            engine
                .approve(id, "review", "a", ApprovalAction::Approve, None)
                .await
                .unwrap();

            let approver = {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .approve(id, "review", "b", ApprovalAction::Approve, None)
                        .await
                })
            };
            let canceller = {
                let engine = engine.clone();
                tokio::spawn(async move { engine.cancel_instance(id, Some("race")).await })
            };
            let approved = approver.await.unwrap();
            let cancelled = canceller.await.unwrap();

            let final_status = status(&engine, id).await;
            assert!(final_status.is_terminal());
            match final_status {
                InstanceStatus::Cancelled => {
                    assert!(cancelled.is_ok());
                    let records = engine.get_approval_records(id).await.unwrap();
                    assert!(!records.iter().any(|r| r.status == ApprovalStatus::Pending));
                }
                InstanceStatus::Completed => {
                    assert!(approved.is_ok());
                    assert!(matches!(cancelled, Err(EngineError::InstanceNotRunning { .. })));
                }
                other => panic!("unexpected status {other}"),
            }

            let mut terminal_events = 0;
            while let Ok(event) = rx.try_recv() {
                if matches!(
                    event,
                    WorkflowEvent::InstanceCompleted { .. } | WorkflowEvent::InstanceCancelled { .. }
                ) {
                    terminal_events += 1;
                }
            }
            assert_eq!(terminal_events, 1);
        }
    }

    // -----------------------------------------------------------------------
    // Definitions and recovery
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_definition_lifecycle() {
        let engine = engine();
        let v1 = engine
            .publish_definition(approval_flow("all", &["a"]))
            .await
            .unwrap();
        assert_eq!(v1.version, 1);
        assert!(v1.active);

        let pinned = engine
            .create_instance(v1.id, v1.category, "EMP-5", "x", Map::new())
            .await
            .unwrap();

        let mut edit = approval_flow("any", &["a", "b"]);
        edit.id = v1.id;
        let v2 = engine.publish_definition(edit).await.unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(engine.get_definition(v1.id, None).await.unwrap().unwrap().version, 2);

        let fresh = engine
            .create_instance(v1.id, v1.category, "EMP-6", "x", Map::new())
            .await
            .unwrap();
        assert_eq!(engine.get_instance(pinned).await.unwrap().unwrap().definition_version, 1);
        assert_eq!(engine.get_instance(fresh).await.unwrap().unwrap().definition_version, 2);

        // The pinned instance still follows v1 (single approver "a").
        let done = engine
            .approve(pinned, "review", "a", ApprovalAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(done.status, InstanceStatus::Completed);

        engine.deactivate_definition(v1.id).await.unwrap();
        assert!(matches!(
            engine.create_instance(v1.id, v1.category, "EMP-7", "x", Map::new()).await,
            Err(EngineError::DefinitionInactive(_))
        ));
        assert!(matches!(
            engine.create_instance(Uuid::now_v7(), v1.category, "EMP-7", "x", Map::new()).await,
            Err(EngineError::DefinitionNotFound(_))
        ));
        assert!(matches!(
            engine.deactivate_definition(Uuid::now_v7()).await,
            Err(EngineError::DefinitionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_publish_rejects_invalid_definition() {
        let engine = engine();
        let mut def = approval_flow("all", &["a"]);
        def.edges.pop();
        assert!(matches!(
            engine.publish_definition(def).await,
            Err(EngineError::DefinitionInvalid(_))
        ));
        assert!(engine.list_definitions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_records_are_recreated() {
        let engine = engine();
        let def = engine
            .publish_definition(approval_flow("all", &["a"]))
            .await
            .unwrap();
        // An instance committed waiting on "review" whose records were never
        // written, as after a crash between the two.
        let now = Utc::now();
        let orphan = WorkflowInstance {
            id: Uuid::now_v7(),
            definition_id: def.id,
            definition_version: def.version,
            business_type: def.category,
            business_id: "EMP-8".into(),
            initiator_id: "x".into(),
            status: InstanceStatus::Running,
            frontier: ["review".to_string()].into_iter().collect(),
            variables: Map::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            completed_at: None,
            cancel_reason: None,
        };
        engine.repo.insert_instance(&orphan).await.unwrap();
        let id = orphan.id;
        assert!(engine.get_approval_records(id).await.unwrap().is_empty());

        engine.resume_instance(id).await.unwrap();
        assert_eq!(engine.get_approval_records(id).await.unwrap().len(), 1);

        let snap = engine
            .approve(id, "review", "a", ApprovalAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(snap.status, InstanceStatus::Completed);
    }

    // -----------------------------------------------------------------------
    // Post-commit failures
    // -----------------------------------------------------------------------

    /// Memory repository with injectable stalls and failures.
    #[derive(Default)]
    struct InstrumentedRepository {
        inner: MemoryWorkflowRepository,
        before_decide: Duration,
        after_decide: Duration,
        before_skip_all: Duration,
        failing_record_inserts: AtomicU32,
    }

    impl WorkflowRepository for InstrumentedRepository {
        async fn insert_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
            self.inner.insert_definition(def).await
        }

        async fn get_definition(&self, id: &Uuid, version: u32) -> Result<Option<WorkflowDefinition>, RepositoryError> {
            self.inner.get_definition(id, version).await
        }

        async fn get_latest_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
            self.inner.get_latest_definition(id).await
        }

        async fn get_active_definition(&self, id: &Uuid) -> Result<Option<WorkflowDefinition>, RepositoryError> {
            self.inner.get_active_definition(id).await
        }

        async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
            self.inner.list_definitions().await
        }

        async fn deactivate_definition(&self, id: &Uuid) -> Result<u64, RepositoryError> {
            self.inner.deactivate_definition(id).await
        }

        async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
            self.inner.insert_instance(instance).await
        }

        async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
            self.inner.get_instance(id).await
        }

        async fn update_instance(&self, instance: &WorkflowInstance, expected_version: u64) -> Result<(), RepositoryError> {
            self.inner.update_instance(instance, expected_version).await
        }

        async fn list_instances(&self, filter: &InstanceFilter) -> Result<Vec<WorkflowInstance>, RepositoryError> {
            self.inner.list_instances(filter).await
        }

        async fn insert_approval_records(&self, records: &[ApprovalRecord]) -> Result<u64, RepositoryError> {
            let failing = self
                .failing_record_inserts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(RepositoryError::Query("approval table unavailable".into()));
            }
            self.inner.insert_approval_records(records).await
        }

        async fn list_approval_records(&self, instance_id: &Uuid) -> Result<Vec<ApprovalRecord>, RepositoryError> {
            self.inner.list_approval_records(instance_id).await
        }

        async fn decide_approval(
            &self,
            instance_id: &Uuid,
            node_id: &str,
            approver_id: &str,
            status: ApprovalStatus,
            comment: Option<&str>,
            acted_at: chrono::DateTime<Utc>,
        ) -> Result<(), RepositoryError> {
            tokio::time::sleep(self.before_decide).await;
            let result = self
                .inner
                .decide_approval(instance_id, node_id, approver_id, status, comment, acted_at)
                .await;
            tokio::time::sleep(self.after_decide).await;
            result
        }

        async fn skip_pending_approvals(&self, instance_id: &Uuid, node_id: Option<&str>) -> Result<u64, RepositoryError> {
            if node_id.is_none() {
                tokio::time::sleep(self.before_skip_all).await;
            }
            self.inner.skip_pending_approvals(instance_id, node_id).await
        }

        async fn list_pending_approvals(&self, approver_id: &str) -> Result<Vec<ApprovalRecord>, RepositoryError> {
            self.inner.list_pending_approvals(approver_id).await
        }
    }

    /// Outbox whose enqueue always fails.
    #[derive(Default)]
    struct UnavailableOutbox {
        inner: MemoryOutboxRepository,
    }

    impl OutboxRepository for UnavailableOutbox {
        async fn enqueue(&self, _delivery: &NotificationDelivery) -> Result<bool, RepositoryError> {
            Err(RepositoryError::Query("outbox unavailable".into()))
        }

        async fn get_delivery(&self, key: &str) -> Result<Option<NotificationDelivery>, RepositoryError> {
            self.inner.get_delivery(key).await
        }

        async fn list_by_status(&self, status: DeliveryStatus) -> Result<Vec<NotificationDelivery>, RepositoryError> {
            self.inner.list_by_status(status).await
        }

        async fn update_delivery(&self, delivery: &NotificationDelivery) -> Result<(), RepositoryError> {
            self.inner.update_delivery(delivery).await
        }

        async fn requeue(&self, key: &str) -> Result<bool, RepositoryError> {
            self.inner.requeue(key).await
        }
    }

    async fn start_with<R: WorkflowRepository, O: OutboxRepository>(
        engine: &Engine<R, O>,
        def: WorkflowDefinition,
    ) -> Uuid {
        let def = engine.publish_definition(def).await.unwrap();
        engine
            .create_instance(def.id, def.category, "EMP-1001", "initiator", Map::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_failure_does_not_fail_committed_transition() {
        let engine = Engine::new(
            MemoryWorkflowRepository::new(),
            UnavailableOutbox::default(),
            EngineConfig::default(),
            EventBus::new(64),
        );
        let mut rx = engine.event_bus().subscribe();
        let id = start_with(&engine, approval_flow("any", &["a"])).await;

        let snap = engine
            .approve(id, "review", "a", ApprovalAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(snap.status, InstanceStatus::Completed);
        assert_eq!(engine.get_instance(id).await.unwrap().unwrap().status, InstanceStatus::Completed);

        let mut entered_inform = false;
        let mut completed = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                WorkflowEvent::NodeEntered { node_id, .. } if node_id == "inform" => entered_inform = true,
                WorkflowEvent::InstanceCompleted { instance_id } => completed = instance_id == id,
                _ => {}
            }
        }
        assert!(entered_inform);
        assert!(completed);
    }

    #[tokio::test]
    async fn test_record_creation_failure_after_insert_still_starts_instance() {
        let repo = InstrumentedRepository {
            failing_record_inserts: AtomicU32::new(1),
            ..Default::default()
        };
        let engine = Engine::new(repo, MemoryOutboxRepository::new(), EngineConfig::default(), EventBus::new(64));
        let mut rx = engine.event_bus().subscribe();
        let id = start_with(&engine, approval_flow("any", &["a", "b"])).await;

        let snap = engine.get_instance(id).await.unwrap().unwrap();
        assert_eq!(snap.status, InstanceStatus::Running);
        assert_eq!(snap.frontier, vec!["review".to_string()]);
        assert!(engine.get_approval_records(id).await.unwrap().is_empty());
        assert!(matches!(rx.try_recv(), Ok(WorkflowEvent::InstanceCreated { .. })));

        let snap = engine
            .approve(id, "review", "b", ApprovalAction::Approve, None)
            .await
            .unwrap();
        assert_eq!(snap.status, InstanceStatus::Completed);
        let records = engine.get_approval_records(id).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().any(|r| r.approver_id == "a" && r.status == ApprovalStatus::Skipped));
    }

    // -----------------------------------------------------------------------
    // Approvals racing a cancellation
    // -----------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_decision_stalled_behind_cancel_is_refused() {
        let repo = InstrumentedRepository {
            before_decide: Duration::from_millis(100),
            before_skip_all: Duration::from_millis(300),
            ..Default::default()
        };
        let engine = Arc::new(Engine::new(repo, MemoryOutboxRepository::new(), EngineConfig::default(), EventBus::new(64)));
        let id = start_with(&*engine, approval_flow("all", &["a", "b"])).await;
        engine
            .approve(id, "review", "a", ApprovalAction::Approve, None)
            .await
            .unwrap();

        let approver = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .approve(id, "review", "b", ApprovalAction::Approve, None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cancelled = engine.cancel_instance(id, Some("withdrawn")).await.unwrap();
        assert_eq!(cancelled.status, InstanceStatus::Cancelled);

        assert!(matches!(
            approver.await.unwrap(),
            Err(EngineError::InstanceNotRunning {
                status: InstanceStatus::Cancelled,
                ..
            })
        ));
        let records = engine.get_approval_records(id).await.unwrap();
        let b = records.iter().find(|r| r.approver_id == "b").unwrap();
        assert_eq!(b.status, ApprovalStatus::Skipped);
        assert_eq!(engine.get_instance(id).await.unwrap().unwrap().status, InstanceStatus::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_decision_overtaken_before_settle_reports_cancelled() {
        let repo = InstrumentedRepository {
            after_decide: Duration::from_millis(100),
            ..Default::default()
        };
        let engine = Arc::new(Engine::new(repo, MemoryOutboxRepository::new(), EngineConfig::default(), EventBus::new(64)));
        let mut rx = engine.event_bus().subscribe();
        let id = start_with(&*engine, approval_flow("any", &["a"])).await;

        let approver = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .approve(id, "review", "a", ApprovalAction::Approve, None)
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.cancel_instance(id, None).await.unwrap();

        assert!(matches!(
            approver.await.unwrap(),
            Err(EngineError::InstanceNotRunning {
                status: InstanceStatus::Cancelled,
                ..
            })
        ));
        assert_eq!(engine.get_instance(id).await.unwrap().unwrap().status, InstanceStatus::Cancelled);
        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(
                event,
                WorkflowEvent::InstanceCompleted { .. } | WorkflowEvent::NodeResolved { .. }
            ));
        }
    }

    // -----------------------------------------------------------------------
    // Determinism
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_same_actions_replay_to_same_state() {
        let steps: [(&str, ApprovalAction); 3] = [
            ("a", ApprovalAction::Approve),
            ("b", ApprovalAction::Reject),
            ("c", ApprovalAction::Approve),
        ];
        let engine = engine();
        let def = engine
            .publish_definition(approval_flow("majority", &["a", "b", "c"]))
            .await
            .unwrap();

        let mut runs = Vec::new();
        for _ in 0..2 {
            let id = engine
                .create_instance(
                    def.id,
                    def.category,
                    "EMP-1001",
                    "initiator",
                    json!({ "amount": 1200, "currency": "EUR" }).as_object().cloned().unwrap(),
                )
                .await
                .unwrap();
            let mut trace = Vec::new();
            for (who, action) in steps {
                let snap = engine.approve(id, "review", who, action, None).await;
                trace.push(snap.map(|s| (s.status, s.frontier, s.variables)).map_err(|e| e.to_string()));
            }
            let records: Vec<(String, ApprovalStatus)> = engine
                .get_approval_records(id)
                .await
                .unwrap()
                .into_iter()
                .map(|r| (r.approver_id, r.status))
                .collect();
            runs.push((trace, records));
        }

        assert_eq!(runs[0], runs[1]);
        let (trace, _) = &runs[0];
        assert!(matches!(&trace[1], Ok((InstanceStatus::Running, _, _))));
        assert!(matches!(&trace[2], Ok((InstanceStatus::Completed, _, _))));
    }

    #[tokio::test]
    async fn test_dead_letter_requeue_errors_and_lists() {
        let engine = engine();
        assert!(engine.list_dead_letters().await.unwrap().is_empty());
        assert!(matches!(
            engine.requeue_dead_letter("nope").await,
            Err(EngineError::DeliveryNotFound(_))
        ));
    }
}
