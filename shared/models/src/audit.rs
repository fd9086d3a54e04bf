//! Append-only audit ledger records
//!
//! One [`WorkflowApprovalAudit`] per successful transition and one
//! [`WorkflowRejection`] per negative outcome. Approval rows are immutable
//! and hash-chained; rejection rows permit a single unresolved → resolved
//! update of their resolution fields and nothing else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{EntitySnapshot, EntityType, UnifiedStatus};
use crate::workflow::{ApprovalAction, RejectionAction, Role};

/// Actor id recorded for engine-initiated auto-approvals.
pub const SYSTEM_ACTOR: &str = "system";

/// Immutable record of one successful workflow transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowApprovalAudit {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub workflow_config_id: Uuid,
    pub workflow_version: i32,
    pub from_stage: Option<String>,
    /// `None` denotes a terminal transition.
    pub to_stage: Option<String>,
    pub action: ApprovalAction,
    pub approved_by: String,
    pub approved_by_role: Role,
    pub previous_status: UnifiedStatus,
    pub new_status: UnifiedStatus,
    pub remarks: Option<String>,
    pub entity_snapshot: EntitySnapshot,
    pub approved_at: DateTime<Utc>,
    pub hash: String,
    pub previous_hash: Option<String>,
}

impl WorkflowApprovalAudit {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config_id: Uuid,
        config_version: i32,
        snapshot: EntitySnapshot,
        action: ApprovalAction,
        from_stage: Option<String>,
        to_stage: Option<String>,
        new_status: UnifiedStatus,
        approved_by: String,
        approved_by_role: Role,
        remarks: Option<String>,
        previous_hash: Option<String>,
    ) -> Self {
        let id = Uuid::new_v4();
        let approved_at = Utc::now();
        let hash = Self::calculate_hash(
            id,
            &snapshot.entity_id,
            action,
            from_stage.as_deref(),
            to_stage.as_deref(),
            &approved_by,
            approved_at,
            previous_hash.as_deref(),
        );

        Self {
            id,
            entity_type: snapshot.entity_type,
            entity_id: snapshot.entity_id.clone(),
            workflow_config_id: config_id,
            workflow_version: config_version,
            from_stage,
            to_stage,
            action,
            approved_by,
            approved_by_role,
            previous_status: snapshot.status,
            new_status,
            remarks,
            entity_snapshot: snapshot,
            approved_at,
            hash,
            previous_hash,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn calculate_hash(
        id: Uuid,
        entity_id: &str,
        action: ApprovalAction,
        from_stage: Option<&str>,
        to_stage: Option<&str>,
        approved_by: &str,
        approved_at: DateTime<Utc>,
        previous_hash: Option<&str>,
    ) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(id.to_string().as_bytes());
        hasher.update(entity_id.as_bytes());
        hasher.update(action.to_string().as_bytes());
        hasher.update(from_stage.unwrap_or("").as_bytes());
        hasher.update(to_stage.unwrap_or("").as_bytes());
        hasher.update(approved_by.as_bytes());
        hasher.update(approved_at.to_rfc3339().as_bytes());
        if let Some(prev) = previous_hash {
            hasher.update(prev.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    pub fn verify_integrity(&self) -> bool {
        let expected = Self::calculate_hash(
            self.id,
            &self.entity_id,
            self.action,
            self.from_stage.as_deref(),
            self.to_stage.as_deref(),
            &self.approved_by,
            self.approved_at,
            self.previous_hash.as_deref(),
        );
        expected == self.hash
    }

    /// Verifies the `previous_hash` links of an ordered slice of rows.
    pub fn verify_chain(entries: &[WorkflowApprovalAudit]) -> bool {
        let mut previous: Option<&str> = None;
        for entry in entries {
            if !entry.verify_integrity() || entry.previous_hash.as_deref() != previous {
                return false;
            }
            previous = Some(&entry.hash);
        }
        true
    }
}

/// Record of one rejection, send-back, cancellation, or hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRejection {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub workflow_stage: Option<String>,
    pub action: RejectionAction,
    pub reason_code: String,
    pub rejected_by: String,
    pub rejected_by_role: Role,
    pub previous_status: UnifiedStatus,
    pub new_status: UnifiedStatus,
    pub remarks: Option<String>,
    pub entity_snapshot: EntitySnapshot,
    pub rejected_at: DateTime<Utc>,
    pub is_resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution_action: Option<String>,
}

impl WorkflowRejection {
    pub fn new(
        snapshot: EntitySnapshot,
        action: RejectionAction,
        reason_code: String,
        rejected_by: String,
        rejected_by_role: Role,
        remarks: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type: snapshot.entity_type,
            entity_id: snapshot.entity_id.clone(),
            workflow_stage: snapshot.current_stage.clone(),
            action,
            reason_code,
            rejected_by,
            rejected_by_role,
            previous_status: snapshot.status,
            new_status: action.parked_status(),
            remarks,
            entity_snapshot: snapshot,
            rejected_at: Utc::now(),
            is_resolved: false,
            resolved_at: None,
            resolved_by: None,
            resolution_action: None,
        }
    }

    /// Marks the rejection resolved. Allowed exactly once; the transition is
    /// never reversed.
    pub fn resolve(&mut self, resolved_by: &str, resolution_action: &str) -> anyhow::Result<()> {
        if self.is_resolved {
            anyhow::bail!("rejection {} is already resolved", self.id);
        }
        self.is_resolved = true;
        self.resolved_at = Some(Utc::now());
        self.resolved_by = Some(resolved_by.to_string());
        self.resolution_action = Some(resolution_action.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntitySnapshot;

    fn snapshot() -> EntitySnapshot {
        EntitySnapshot {
            entity_type: EntityType::Order,
            entity_id: "ORD-1001".to_string(),
            company_id: "CMP-001".to_string(),
            vendor_id: Some("VND-01".to_string()),
            location_id: None,
            requested_by: Some("usr-7".to_string()),
            requestor_email: Some("requestor@example.com".to_string()),
            owner_email: None,
            amount: 1250.0,
            current_stage: Some("PENDING_SITE_ADMIN_APPROVAL".to_string()),
            status: UnifiedStatus::InReview,
            carrier_name: None,
            tracking_number: None,
            shipment_reference_number: None,
            updated_at: Utc::now(),
        }
    }

    fn audit(previous_hash: Option<String>) -> WorkflowApprovalAudit {
        WorkflowApprovalAudit::new(
            Uuid::new_v4(),
            1,
            snapshot(),
            ApprovalAction::Approve,
            Some("PENDING_SITE_ADMIN_APPROVAL".to_string()),
            Some("PENDING_FINANCE_APPROVAL".to_string()),
            UnifiedStatus::InReview,
            "usr-9".to_string(),
            Role::SiteAdmin,
            None,
            previous_hash,
        )
    }

    #[test]
    fn test_audit_hash_integrity() {
        let entry = audit(None);
        assert!(entry.verify_integrity());

        let mut tampered = entry.clone();
        tampered.approved_by = "someone-else".to_string();
        assert!(!tampered.verify_integrity());
    }

    #[test]
    fn test_audit_chain_verification() {
        let first = audit(None);
        let second = audit(Some(first.hash.clone()));
        assert!(WorkflowApprovalAudit::verify_chain(&[first.clone(), second]));

        let orphan = audit(Some("bogus".to_string()));
        assert!(!WorkflowApprovalAudit::verify_chain(&[first, orphan]));
    }

    #[test]
    fn test_rejection_resolves_exactly_once() {
        let mut rejection = WorkflowRejection::new(
            snapshot(),
            RejectionAction::SendBack,
            "INCOMPLETE_SPEC".to_string(),
            "usr-9".to_string(),
            Role::SiteAdmin,
            Some("missing line items".to_string()),
        );
        assert_eq!(rejection.new_status, UnifiedStatus::Draft);
        assert!(!rejection.is_resolved);

        rejection.resolve("usr-7", "RESUBMITTED").unwrap();
        assert!(rejection.is_resolved);
        assert!(rejection.resolved_at.is_some());

        assert!(rejection.resolve("usr-7", "RESUBMITTED").is_err());
    }
}
