//! In-memory repository adapters backed by `DashMap`.
//!
//! Conditional writes run while holding the shard lock of the affected key,
//! which gives the same compare-and-swap guarantees as the SQLite adapter's
//! `WHERE version = ?` updates. Cloning shares the underlying maps.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use hrflow_types::approval::{ApprovalRecord, ApprovalStatus};
use hrflow_types::definition::WorkflowDefinition;
use hrflow_types::error::RepositoryError;
use hrflow_types::instance::{InstanceFilter, InstanceStatus, WorkflowInstance};
use hrflow_types::notification::{DeliveryStatus, NotificationDelivery};
use uuid::Uuid;

use super::outbox::OutboxRepository;
use super::workflow::WorkflowRepository;

// ---------------------------------------------------------------------------
// Workflow repository
// ---------------------------------------------------------------------------

#[derive(Default)]
struct WorkflowTables {
    definitions: DashMap<Uuid, BTreeMap<u32, WorkflowDefinition>>,
    instances: DashMap<Uuid, WorkflowInstance>,
    /// Records grouped by instance id.
    approvals: DashMap<Uuid, Vec<ApprovalRecord>>,
}

/// In-memory `WorkflowRepository`.
#[derive(Clone, Default)]
pub struct MemoryWorkflowRepository {
    tables: Arc<WorkflowTables>,
}

impl MemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn insert_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let mut versions = self.tables.definitions.entry(def.id).or_default();
        if versions.contains_key(&def.version) {
            return Err(RepositoryError::Conflict(format!(
                "definition {} version {} already exists",
                def.id, def.version
            )));
        }
        versions.insert(def.version, def.clone());
        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .tables
            .definitions
            .get(id)
            .and_then(|versions| versions.get(&version).cloned()))
    }

    async fn get_latest_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self
            .tables
            .definitions
            .get(id)
            .and_then(|versions| versions.values().next_back().cloned()))
    }

    async fn get_active_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.tables.definitions.get(id).and_then(|versions| {
            versions.values().rev().find(|d| d.active).cloned()
        }))
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<WorkflowDefinition> = self
            .tables
            .definitions
            .iter()
            .filter_map(|entry| entry.value().values().next_back().cloned())
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(defs)
    }

    async fn deactivate_definition(&self, id: &Uuid) -> Result<u64, RepositoryError> {
        let Some(mut versions) = self.tables.definitions.get_mut(id) else {
            return Ok(0);
        };
        let mut touched = 0;
        for def in versions.values_mut() {
            if def.active {
                def.active = false;
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        match self.tables.instances.entry(instance.id) {
            Entry::Occupied(_) => Err(RepositoryError::Conflict(format!(
                "instance {} already exists",
                instance.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(instance.clone());
                Ok(())
            }
        }
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.tables.instances.get(id).map(|i| i.clone()))
    }

    async fn update_instance(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let mut stored = self
            .tables
            .instances
            .get_mut(&instance.id)
            .ok_or(RepositoryError::NotFound)?;
        if stored.version != expected_version {
            return Err(RepositoryError::Conflict(format!(
                "instance {} is at version {}, expected {}",
                instance.id, stored.version, expected_version
            )));
        }
        *stored = instance.clone();
        Ok(())
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let mut out: Vec<WorkflowInstance> = self
            .tables
            .instances
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }

    async fn insert_approval_records(
        &self,
        records: &[ApprovalRecord],
    ) -> Result<u64, RepositoryError> {
        let mut inserted = 0;
        for record in records {
            let mut existing = self.tables.approvals.entry(record.instance_id).or_default();
            let duplicate = existing
                .iter()
                .any(|r| r.node_id == record.node_id && r.approver_id == record.approver_id);
            if !duplicate {
                existing.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn list_approval_records(
        &self,
        instance_id: &Uuid,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let mut records = self
            .tables
            .approvals
            .get(instance_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        records.sort_by(|a, b| {
            a.node_id
                .cmp(&b.node_id)
                .then_with(|| a.approver_id.cmp(&b.approver_id))
        });
        Ok(records)
    }

    async fn decide_approval(
        &self,
        instance_id: &Uuid,
        node_id: &str,
        approver_id: &str,
        status: ApprovalStatus,
        comment: Option<&str>,
        acted_at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        // Held until the record is written: a concurrent cancel needs the
        // write lock on this entry to flip the status.
        let instance = self
            .tables
            .instances
            .get(instance_id)
            .ok_or(RepositoryError::NotFound)?;
        if instance.status != InstanceStatus::Running {
            return Err(RepositoryError::Conflict(format!(
                "instance is {}",
                instance.status
            )));
        }

        let mut records = self
            .tables
            .approvals
            .get_mut(instance_id)
            .ok_or(RepositoryError::NotFound)?;
        let record = records
            .iter_mut()
            .find(|r| r.node_id == node_id && r.approver_id == approver_id)
            .ok_or(RepositoryError::NotFound)?;
        if record.status != ApprovalStatus::Pending {
            return Err(RepositoryError::Conflict(format!(
                "approval record is already {}",
                record.status
            )));
        }
        record.status = status;
        record.comment = comment.map(str::to_string);
        record.acted_at = Some(acted_at);
        Ok(())
    }

    async fn skip_pending_approvals(
        &self,
        instance_id: &Uuid,
        node_id: Option<&str>,
    ) -> Result<u64, RepositoryError> {
        let Some(mut records) = self.tables.approvals.get_mut(instance_id) else {
            return Ok(0);
        };
        let mut skipped = 0;
        for record in records.iter_mut() {
            let in_scope = node_id.is_none_or(|n| n == record.node_id);
            if in_scope && record.status == ApprovalStatus::Pending {
                record.status = ApprovalStatus::Skipped;
                skipped += 1;
            }
        }
        Ok(skipped)
    }

    async fn list_pending_approvals(
        &self,
        approver_id: &str,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let mut out: Vec<ApprovalRecord> = self
            .tables
            .approvals
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|r| r.approver_id == approver_id && r.status == ApprovalStatus::Pending)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Outbox repository
// ---------------------------------------------------------------------------

/// In-memory `OutboxRepository`.
#[derive(Clone, Default)]
pub struct MemoryOutboxRepository {
    deliveries: Arc<DashMap<String, NotificationDelivery>>,
}

impl MemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutboxRepository for MemoryOutboxRepository {
    async fn enqueue(&self, delivery: &NotificationDelivery) -> Result<bool, RepositoryError> {
        match self.deliveries.entry(delivery.key().to_string()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(delivery.clone());
                Ok(true)
            }
        }
    }

    async fn get_delivery(&self, key: &str) -> Result<Option<NotificationDelivery>, RepositoryError> {
        Ok(self.deliveries.get(key).map(|d| d.clone()))
    }

    async fn list_by_status(
        &self,
        status: DeliveryStatus,
    ) -> Result<Vec<NotificationDelivery>, RepositoryError> {
        let mut out: Vec<NotificationDelivery> = self
            .deliveries
            .iter()
            .filter(|entry| entry.value().status == status)
            .map(|entry| entry.value().clone())
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn update_delivery(&self, delivery: &NotificationDelivery) -> Result<(), RepositoryError> {
        let mut stored = self
            .deliveries
            .get_mut(delivery.key())
            .ok_or(RepositoryError::NotFound)?;
        *stored = delivery.clone();
        Ok(())
    }

    async fn requeue(&self, key: &str) -> Result<bool, RepositoryError> {
        let Some(mut stored) = self.deliveries.get_mut(key) else {
            return Ok(false);
        };
        if stored.status != DeliveryStatus::DeadLettered {
            return Ok(false);
        }
        stored.status = DeliveryStatus::Pending;
        stored.attempts = 0;
        stored.updated_at = Utc::now();
        Ok(true)
    }
}
