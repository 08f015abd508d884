//! Workflow repository trait definition.
//!
//! Defines the storage interface for definitions, instances, and approval
//! records. Implementations must provide two conditional writes that the
//! engine's concurrency model relies on:
//!
//! - `update_instance` succeeds only if the stored version equals
//!   `expected_version`, otherwise `RepositoryError::Conflict`.
//! - `decide_approval` succeeds only if the record is still `Pending` and
//!   the instance is still `Running`, otherwise `RepositoryError::Conflict`.

use chrono::{DateTime, Utc};
use hrflow_types::approval::{ApprovalRecord, ApprovalStatus};
use hrflow_types::definition::WorkflowDefinition;
use hrflow_types::error::RepositoryError;
use hrflow_types::instance::{InstanceFilter, WorkflowInstance};
use uuid::Uuid;

/// Repository trait for workflow persistence.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait WorkflowRepository: Send + Sync {
    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Store a new definition version. `Conflict` if `(id, version)` exists.
    fn insert_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get one exact version of a definition.
    fn get_definition(
        &self,
        id: &Uuid,
        version: u32,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Highest version of a definition, active or not.
    fn get_latest_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Highest active version of a definition.
    fn get_active_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// Latest version of every definition, ordered by name.
    fn list_definitions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Mark every version of a definition inactive. Returns rows touched.
    fn deactivate_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    fn insert_instance(
        &self,
        instance: &WorkflowInstance,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_instance(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// Compare-and-swap write of the whole instance row.
    ///
    /// `instance.version` is the new version; the write applies only if the
    /// stored row is still at `expected_version`.
    fn update_instance(
        &self,
        instance: &WorkflowInstance,
        expected_version: u64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Instances matching the filter, newest first.
    fn list_instances(
        &self,
        filter: &InstanceFilter,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Approval records
    // -----------------------------------------------------------------------

    /// Insert records that do not exist yet (unique on instance, node,
    /// approver). Returns how many were actually inserted.
    fn insert_approval_records(
        &self,
        records: &[ApprovalRecord],
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// All records of an instance, ordered by node then approver.
    fn list_approval_records(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRecord>, RepositoryError>> + Send;

    /// Conditional `Pending -> decided` write of one record.
    ///
    /// Checked atomically against the instance status: `NotFound` when the
    /// record does not exist, `Conflict` when it is no longer pending or the
    /// instance has left `Running`.
    fn decide_approval(
        &self,
        instance_id: &Uuid,
        node_id: &str,
        approver_id: &str,
        status: ApprovalStatus,
        comment: Option<&str>,
        acted_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Move pending records to `Skipped`, for one node or (with `None`) the
    /// whole instance. Returns how many records changed.
    fn skip_pending_approvals(
        &self,
        instance_id: &Uuid,
        node_id: Option<&str>,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;

    /// Pending records assigned to an approver, across all instances.
    fn list_pending_approvals(
        &self,
        approver_id: &str,
    ) -> impl std::future::Future<Output = Result<Vec<ApprovalRecord>, RepositoryError>> + Send;
}
