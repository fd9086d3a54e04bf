//! Audit ledger repository
//!
//! Approval rows are insert-only; nothing here issues UPDATE or DELETE
//! against workflow_approval_audits. Rejection rows accept the single
//! unresolved to resolved update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use procura_models::{
    ApprovalAction, EntitySnapshot, EntityType, RejectionAction, Role, UnifiedStatus,
    WorkflowApprovalAudit, WorkflowRejection,
};
use procura_utils::{ProcuraError, ProcuraResult};

use super::{db_err, parse_enum};
use crate::stores::AuditLedger;

pub struct PgAuditLedger {
    pool: PgPool,
}

impl PgAuditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLedger for PgAuditLedger {
    async fn append_approval(&self, audit: WorkflowApprovalAudit) -> ProcuraResult<()> {
        let snapshot = serde_json::to_value(&audit.entity_snapshot)
            .map_err(|e| ProcuraError::internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_approval_audits
                (id, entity_type, entity_id, workflow_config_id, workflow_version,
                 from_stage, to_stage, action, approved_by, approved_by_role,
                 previous_status, new_status, remarks, entity_snapshot,
                 approved_at, hash, previous_hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(audit.id)
        .bind(audit.entity_type.to_string())
        .bind(&audit.entity_id)
        .bind(audit.workflow_config_id)
        .bind(audit.workflow_version)
        .bind(&audit.from_stage)
        .bind(&audit.to_stage)
        .bind(audit.action.to_string())
        .bind(&audit.approved_by)
        .bind(audit.approved_by_role.to_string())
        .bind(audit.previous_status.to_string())
        .bind(audit.new_status.to_string())
        .bind(&audit.remarks)
        .bind(&snapshot)
        .bind(audit.approved_at)
        .bind(&audit.hash)
        .bind(&audit.previous_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("append approval audit", e))?;
        Ok(())
    }

    async fn append_rejection(&self, rejection: WorkflowRejection) -> ProcuraResult<()> {
        let snapshot = serde_json::to_value(&rejection.entity_snapshot)
            .map_err(|e| ProcuraError::internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_rejections
                (id, entity_type, entity_id, workflow_stage, action, reason_code,
                 rejected_by, rejected_by_role, previous_status, new_status,
                 remarks, entity_snapshot, rejected_at, is_resolved,
                 resolved_at, resolved_by, resolution_action)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(rejection.id)
        .bind(rejection.entity_type.to_string())
        .bind(&rejection.entity_id)
        .bind(&rejection.workflow_stage)
        .bind(rejection.action.to_string())
        .bind(&rejection.reason_code)
        .bind(&rejection.rejected_by)
        .bind(rejection.rejected_by_role.to_string())
        .bind(rejection.previous_status.to_string())
        .bind(rejection.new_status.to_string())
        .bind(&rejection.remarks)
        .bind(&snapshot)
        .bind(rejection.rejected_at)
        .bind(rejection.is_resolved)
        .bind(rejection.resolved_at)
        .bind(&rejection.resolved_by)
        .bind(&rejection.resolution_action)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("append rejection", e))?;
        Ok(())
    }

    async fn latest_hash(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT hash FROM workflow_approval_audits
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(entity_type.to_string())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch latest audit hash", e))?;

        Ok(row.map(|(hash,)| hash))
    }

    async fn approvals_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Vec<WorkflowApprovalAudit>> {
        let rows: Vec<ApprovalRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, entity_id, workflow_config_id, workflow_version,
                   from_stage, to_stage, action, approved_by, approved_by_role,
                   previous_status, new_status, remarks, entity_snapshot,
                   approved_at, hash, previous_hash
            FROM workflow_approval_audits
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY seq ASC
            "#,
        )
        .bind(entity_type.to_string())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("fetch approval audits", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn rejections_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Vec<WorkflowRejection>> {
        let rows: Vec<RejectionRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, entity_id, workflow_stage, action, reason_code,
                   rejected_by, rejected_by_role, previous_status, new_status,
                   remarks, entity_snapshot, rejected_at, is_resolved,
                   resolved_at, resolved_by, resolution_action
            FROM workflow_rejections
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY rejected_at ASC
            "#,
        )
        .bind(entity_type.to_string())
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("fetch rejections", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn resolve_rejection(
        &self,
        rejection_id: Uuid,
        resolved_by: &str,
        resolution_action: &str,
    ) -> ProcuraResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE workflow_rejections
            SET is_resolved = TRUE, resolved_at = NOW(),
                resolved_by = $2, resolution_action = $3
            WHERE id = $1 AND is_resolved = FALSE
            "#,
        )
        .bind(rejection_id)
        .bind(resolved_by)
        .bind(resolution_action)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("resolve rejection", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let (found,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM workflow_rejections WHERE id = $1)")
                .bind(rejection_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db_err("check rejection existence", e))?;
        if !found {
            return Err(ProcuraError::not_found(format!(
                "rejection {rejection_id} not found"
            )));
        }
        Ok(false)
    }
}

#[derive(Debug, FromRow)]
struct ApprovalRow {
    id: Uuid,
    entity_type: String,
    entity_id: String,
    workflow_config_id: Uuid,
    workflow_version: i32,
    from_stage: Option<String>,
    to_stage: Option<String>,
    action: String,
    approved_by: String,
    approved_by_role: String,
    previous_status: String,
    new_status: String,
    remarks: Option<String>,
    entity_snapshot: serde_json::Value,
    approved_at: DateTime<Utc>,
    hash: String,
    previous_hash: Option<String>,
}

impl From<ApprovalRow> for WorkflowApprovalAudit {
    fn from(row: ApprovalRow) -> Self {
        let entity_type = EntityType::from_str(&row.entity_type).unwrap_or(EntityType::Order);
        Self {
            id: row.id,
            entity_type,
            entity_id: row.entity_id.clone(),
            workflow_config_id: row.workflow_config_id,
            workflow_version: row.workflow_version,
            from_stage: row.from_stage,
            to_stage: row.to_stage,
            action: parse_enum(&row.action, ApprovalAction::Approve),
            approved_by: row.approved_by,
            approved_by_role: parse_enum(&row.approved_by_role, Role::System),
            previous_status: parse_enum(&row.previous_status, UnifiedStatus::Draft),
            new_status: parse_enum(&row.new_status, UnifiedStatus::Draft),
            remarks: row.remarks,
            entity_snapshot: serde_json::from_value(row.entity_snapshot)
                .unwrap_or_else(|_| empty_snapshot(entity_type, row.entity_id)),
            approved_at: row.approved_at,
            hash: row.hash,
            previous_hash: row.previous_hash,
        }
    }
}

#[derive(Debug, FromRow)]
struct RejectionRow {
    id: Uuid,
    entity_type: String,
    entity_id: String,
    workflow_stage: Option<String>,
    action: String,
    reason_code: String,
    rejected_by: String,
    rejected_by_role: String,
    previous_status: String,
    new_status: String,
    remarks: Option<String>,
    entity_snapshot: serde_json::Value,
    rejected_at: DateTime<Utc>,
    is_resolved: bool,
    resolved_at: Option<DateTime<Utc>>,
    resolved_by: Option<String>,
    resolution_action: Option<String>,
}

impl From<RejectionRow> for WorkflowRejection {
    fn from(row: RejectionRow) -> Self {
        let entity_type = EntityType::from_str(&row.entity_type).unwrap_or(EntityType::Order);
        Self {
            id: row.id,
            entity_type,
            entity_id: row.entity_id.clone(),
            workflow_stage: row.workflow_stage,
            action: parse_enum(&row.action, RejectionAction::Reject),
            reason_code: row.reason_code,
            rejected_by: row.rejected_by,
            rejected_by_role: parse_enum(&row.rejected_by_role, Role::System),
            previous_status: parse_enum(&row.previous_status, UnifiedStatus::Draft),
            new_status: parse_enum(&row.new_status, UnifiedStatus::Rejected),
            remarks: row.remarks,
            entity_snapshot: serde_json::from_value(row.entity_snapshot)
                .unwrap_or_else(|_| empty_snapshot(entity_type, row.entity_id)),
            rejected_at: row.rejected_at,
            is_resolved: row.is_resolved,
            resolved_at: row.resolved_at,
            resolved_by: row.resolved_by,
            resolution_action: row.resolution_action,
        }
    }
}

fn empty_snapshot(entity_type: EntityType, entity_id: String) -> EntitySnapshot {
    EntitySnapshot {
        entity_type,
        entity_id,
        company_id: String::new(),
        vendor_id: None,
        location_id: None,
        requested_by: None,
        requestor_email: None,
        owner_email: None,
        amount: 0.0,
        current_stage: None,
        status: UnifiedStatus::Draft,
        carrier_name: None,
        tracking_number: None,
        shipment_reference_number: None,
        updated_at: Utc::now(),
    }
}
