//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `hrflow-core` using sqlx with split
//! read/write pools. Definitions are stored as JSON blobs, one row per
//! version. Instance transitions are conditional on the stored version, and
//! approval decisions are conditional on the record still being pending.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use hrflow_core::repository::workflow::WorkflowRepository;
use hrflow_types::approval::{ApprovalRecord, ApprovalStatus};
use hrflow_types::definition::WorkflowDefinition;
use hrflow_types::error::RepositoryError;
use hrflow_types::instance::{InstanceFilter, WorkflowInstance};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;
use super::{format_datetime, insert_err, parse_datetime, parse_enum, parse_uuid, query_err};

/// SQLite-backed implementation of `WorkflowRepository`.
#[derive(Clone)]
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct DefinitionRow {
    active: bool,
    definition: String,
}

impl DefinitionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            active: row.try_get("active")?,
            definition: row.try_get("definition")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        let mut def: WorkflowDefinition = serde_json::from_str(&self.definition)
            .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))?;
        def.active = self.active;
        Ok(def)
    }
}

struct InstanceRow {
    id: String,
    definition_id: String,
    definition_version: i64,
    business_type: String,
    business_id: String,
    initiator_id: String,
    status: String,
    frontier: String,
    variables: String,
    version: i64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
    cancel_reason: Option<String>,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            definition_id: row.try_get("definition_id")?,
            definition_version: row.try_get("definition_version")?,
            business_type: row.try_get("business_type")?,
            business_id: row.try_get("business_id")?,
            initiator_id: row.try_get("initiator_id")?,
            status: row.try_get("status")?,
            frontier: row.try_get("frontier")?,
            variables: row.try_get("variables")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
            cancel_reason: row.try_get("cancel_reason")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        let frontier: BTreeSet<String> = serde_json::from_str(&self.frontier)
            .map_err(|e| RepositoryError::Query(format!("invalid frontier JSON: {e}")))?;
        let variables: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&self.variables)
                .map_err(|e| RepositoryError::Query(format!("invalid variables JSON: {e}")))?;

        Ok(WorkflowInstance {
            id: parse_uuid(&self.id)?,
            definition_id: parse_uuid(&self.definition_id)?,
            definition_version: self.definition_version as u32,
            business_type: parse_enum(&self.business_type)?,
            business_id: self.business_id,
            initiator_id: self.initiator_id,
            status: parse_enum(&self.status)?,
            frontier,
            variables,
            version: self.version as u64,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            completed_at: self.completed_at.as_deref().map(parse_datetime).transpose()?,
            cancel_reason: self.cancel_reason,
        })
    }
}

struct ApprovalRow {
    id: String,
    instance_id: String,
    node_id: String,
    approver_id: String,
    status: String,
    comment: Option<String>,
    created_at: String,
    acted_at: Option<String>,
}

impl ApprovalRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            node_id: row.try_get("node_id")?,
            approver_id: row.try_get("approver_id")?,
            status: row.try_get("status")?,
            comment: row.try_get("comment")?,
            created_at: row.try_get("created_at")?,
            acted_at: row.try_get("acted_at")?,
        })
    }

    fn into_record(self) -> Result<ApprovalRecord, RepositoryError> {
        Ok(ApprovalRecord {
            id: parse_uuid(&self.id)?,
            instance_id: parse_uuid(&self.instance_id)?,
            node_id: self.node_id,
            approver_id: self.approver_id,
            status: parse_enum(&self.status)?,
            comment: self.comment,
            created_at: parse_datetime(&self.created_at)?,
            acted_at: self.acted_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

fn definitions_from_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
    rows.iter()
        .map(|row| {
            DefinitionRow::from_row(row)
                .map_err(query_err)?
                .into_definition()
        })
        .collect()
}

fn instances_from_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<WorkflowInstance>, RepositoryError> {
    rows.iter()
        .map(|row| InstanceRow::from_row(row).map_err(query_err)?.into_instance())
        .collect()
}

fn records_from_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<ApprovalRecord>, RepositoryError> {
    rows.iter()
        .map(|row| ApprovalRow::from_row(row).map_err(query_err)?.into_record())
        .collect()
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(format!("serialize {what}: {e}")))
}

const INSTANCE_COLUMNS: &str = "id, definition_id, definition_version, business_type, business_id, \
     initiator_id, status, frontier, variables, version, created_at, updated_at, completed_at, cancel_reason";

const APPROVAL_COLUMNS: &str =
    "id, instance_id, node_id, approver_id, status, comment, created_at, acted_at";

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn insert_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let definition_json = to_json(def, "definition")?;

        sqlx::query(
            r#"INSERT INTO workflow_definitions (id, version, name, category, active, definition, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(def.id.to_string())
        .bind(def.version as i64)
        .bind(&def.name)
        .bind(def.category.to_string())
        .bind(def.active)
        .bind(&definition_json)
        .bind(format_datetime(&def.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| insert_err(e, &format!("definition {} version {}", def.id, def.version)))?;

        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
        version: u32,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT active, definition FROM workflow_definitions WHERE id = ? AND version = ?")
            .bind(id.to_string())
            .bind(version as i64)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|r| DefinitionRow::from_row(&r).map_err(query_err)?.into_definition())
            .transpose()
    }

    async fn get_latest_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT active, definition FROM workflow_definitions WHERE id = ? ORDER BY version DESC LIMIT 1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|r| DefinitionRow::from_row(&r).map_err(query_err)?.into_definition())
            .transpose()
    }

    async fn get_active_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query(
            "SELECT active, definition FROM workflow_definitions WHERE id = ? AND active = 1 ORDER BY version DESC LIMIT 1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_err)?;

        row.map(|r| DefinitionRow::from_row(&r).map_err(query_err)?.into_definition())
            .transpose()
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT d.active, d.definition FROM workflow_definitions d
               WHERE d.version = (SELECT MAX(version) FROM workflow_definitions WHERE id = d.id)
               ORDER BY d.name, d.id"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        definitions_from_rows(&rows)
    }

    async fn deactivate_definition(&self, id: &Uuid) -> Result<u64, RepositoryError> {
        let result = sqlx::query("UPDATE workflow_definitions SET active = 0 WHERE id = ? AND active = 1")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(query_err)?;

        Ok(result.rows_affected())
    }

    async fn insert_instance(&self, instance: &WorkflowInstance) -> Result<(), RepositoryError> {
        sqlx::query(&format!(
            "INSERT INTO workflow_instances ({INSTANCE_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(instance.id.to_string())
        .bind(instance.definition_id.to_string())
        .bind(instance.definition_version as i64)
        .bind(instance.business_type.to_string())
        .bind(&instance.business_id)
        .bind(&instance.initiator_id)
        .bind(instance.status.to_string())
        .bind(to_json(&instance.frontier, "frontier")?)
        .bind(to_json(&instance.variables, "variables")?)
        .bind(instance.version as i64)
        .bind(format_datetime(&instance.created_at))
        .bind(format_datetime(&instance.updated_at))
        .bind(instance.completed_at.as_ref().map(format_datetime))
        .bind(&instance.cancel_reason)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| insert_err(e, &format!("instance {}", instance.id)))?;

        Ok(())
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {INSTANCE_COLUMNS} FROM workflow_instances WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_err)?;

        row.map(|r| InstanceRow::from_row(&r).map_err(query_err)?.into_instance())
            .transpose()
    }

    async fn update_instance(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE workflow_instances
               SET status = ?, frontier = ?, variables = ?, version = ?,
                   updated_at = ?, completed_at = ?, cancel_reason = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(instance.status.to_string())
        .bind(to_json(&instance.frontier, "frontier")?)
        .bind(to_json(&instance.variables, "variables")?)
        .bind(instance.version as i64)
        .bind(format_datetime(&instance.updated_at))
        .bind(instance.completed_at.as_ref().map(format_datetime))
        .bind(&instance.cancel_reason)
        .bind(instance.id.to_string())
        .bind(expected_version as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let stored: Option<(i64,)> = sqlx::query_as("SELECT version FROM workflow_instances WHERE id = ?")
            .bind(instance.id.to_string())
            .fetch_optional(&self.pool.writer)
            .await
            .map_err(query_err)?;

        match stored {
            None => Err(RepositoryError::NotFound),
            Some((version,)) => Err(RepositoryError::Conflict(format!(
                "instance {} is at version {version}, expected {expected_version}",
                instance.id
            ))),
        }
    }

    async fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let status = filter.status.map(|s| s.to_string());
        let business_type = filter.business_type.map(|b| b.to_string());

        let rows = sqlx::query(&format!(
            r#"SELECT {INSTANCE_COLUMNS} FROM workflow_instances
               WHERE (? IS NULL OR status = ?)
                 AND (? IS NULL OR business_type = ?)
                 AND (? IS NULL OR business_id = ?)
               ORDER BY created_at DESC, id DESC"#
        ))
        .bind(&status)
        .bind(&status)
        .bind(&business_type)
        .bind(&business_type)
        .bind(&filter.business_id)
        .bind(&filter.business_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        instances_from_rows(&rows)
    }

    async fn insert_approval_records(
        &self,
        records: &[ApprovalRecord],
    ) -> Result<u64, RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(query_err)?;
        let mut inserted = 0;

        for record in records {
            let result = sqlx::query(&format!(
                r#"INSERT INTO approval_records ({APPROVAL_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                   ON CONFLICT(instance_id, node_id, approver_id) DO NOTHING"#
            ))
            .bind(record.id.to_string())
            .bind(record.instance_id.to_string())
            .bind(&record.node_id)
            .bind(&record.approver_id)
            .bind(record.status.to_string())
            .bind(&record.comment)
            .bind(format_datetime(&record.created_at))
            .bind(record.acted_at.as_ref().map(format_datetime))
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
            inserted += result.rows_affected();
        }

        tx.commit().await.map_err(query_err)?;
        Ok(inserted)
    }

    async fn list_approval_records(
        &self,
        instance_id: &Uuid,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_records WHERE instance_id = ? ORDER BY node_id, approver_id"
        ))
        .bind(instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        records_from_rows(&rows)
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
        let result = sqlx::query(
            r#"UPDATE approval_records SET status = ?, comment = ?, acted_at = ?
               WHERE instance_id = ? AND node_id = ? AND approver_id = ? AND status = 'pending'
                 AND EXISTS (SELECT 1 FROM workflow_instances WHERE id = ? AND status = 'running')"#,
        )
        .bind(status.to_string())
        .bind(comment)
        .bind(format_datetime(&acted_at))
        .bind(instance_id.to_string())
        .bind(node_id)
        .bind(approver_id)
        .bind(instance_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let current: Option<(String,)> = sqlx::query_as(
            "SELECT status FROM approval_records WHERE instance_id = ? AND node_id = ? AND approver_id = ?",
        )
        .bind(instance_id.to_string())
        .bind(node_id)
        .bind(approver_id)
        .fetch_optional(&self.pool.writer)
        .await
        .map_err(query_err)?;

        match current {
            None => Err(RepositoryError::NotFound),
            Some((status,)) if status == "pending" => Err(RepositoryError::Conflict(
                "instance is no longer running".to_string(),
            )),
            Some((status,)) => Err(RepositoryError::Conflict(format!(
                "approval record is already {status}"
            ))),
        }
    }

    async fn skip_pending_approvals(
        &self,
        instance_id: &Uuid,
        node_id: Option<&str>,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE approval_records SET status = 'skipped'
               WHERE instance_id = ? AND status = 'pending' AND (? IS NULL OR node_id = ?)"#,
        )
        .bind(instance_id.to_string())
        .bind(node_id)
        .bind(node_id)
        .execute(&self.pool.writer)
        .await
        .map_err(query_err)?;

        Ok(result.rows_affected())
    }

    async fn list_pending_approvals(
        &self,
        approver_id: &str,
    ) -> Result<Vec<ApprovalRecord>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_records WHERE approver_id = ? AND status = 'pending' ORDER BY created_at, id"
        ))
        .bind(approver_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_err)?;

        records_from_rows(&rows)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
