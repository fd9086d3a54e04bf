//! Approval stage engine
//!
//! Pure transition planning against a workflow configuration. No IO here;
//! the service layer applies the plan with a compare-and-set write and
//! appends the audit row.

use procura_models::{
    ApprovalAction, EntitySnapshot, RejectionAction, Role, UnifiedStatus,
    WorkflowConfiguration, WorkflowEventType,
};
use procura_utils::{ProcuraError, ProcuraResult};

/// Outcome of validating one approval action.
#[derive(Debug, Clone)]
pub struct TransitionPlan {
    pub action: ApprovalAction,
    pub from_stage: Option<String>,
    /// `None` means the workflow completed.
    pub to_stage: Option<String>,
    pub new_status: UnifiedStatus,
    pub events: Vec<WorkflowEventType>,
}

/// Outcome of validating one rejection-family action.
#[derive(Debug, Clone)]
pub struct RejectionPlan {
    pub action: RejectionAction,
    pub from_stage: Option<String>,
    pub new_status: UnifiedStatus,
    pub events: Vec<WorkflowEventType>,
}

pub fn plan_transition(
    config: &WorkflowConfiguration,
    snapshot: &EntitySnapshot,
    action: ApprovalAction,
    actor_role: Role,
) -> ProcuraResult<TransitionPlan> {
    if snapshot.status.is_workflow_terminal() {
        return Err(ProcuraError::EntityAlreadyTerminal {
            entity_id: snapshot.entity_id.clone(),
            status: snapshot.status.to_string(),
        });
    }

    match action {
        ApprovalAction::Submit | ApprovalAction::Resubmit => {
            plan_submission(config, snapshot, action)
        }
        ApprovalAction::Approve
        | ApprovalAction::AutoApprove
        | ApprovalAction::SkipStage
        | ApprovalAction::Escalate => plan_stage_action(config, snapshot, action, actor_role),
    }
}

fn plan_submission(
    config: &WorkflowConfiguration,
    snapshot: &EntitySnapshot,
    action: ApprovalAction,
) -> ProcuraResult<TransitionPlan> {
    if action == ApprovalAction::Submit && snapshot.current_stage.is_some() {
        return Err(invalid(snapshot, action));
    }
    if action == ApprovalAction::Resubmit && !snapshot.status.allows_resubmit() {
        return Err(invalid(snapshot, action));
    }

    let first = config
        .first_stage()
        .ok_or_else(|| ProcuraError::validation("workflow", "configuration has no stages"))?;

    let event = if action == ApprovalAction::Submit {
        WorkflowEventType::EntitySubmitted
    } else {
        WorkflowEventType::EntityResubmitted
    };

    Ok(TransitionPlan {
        action,
        from_stage: snapshot.current_stage.clone(),
        to_stage: Some(first.stage_key.clone()),
        new_status: UnifiedStatus::Submitted,
        events: vec![event],
    })
}

fn plan_stage_action(
    config: &WorkflowConfiguration,
    snapshot: &EntitySnapshot,
    action: ApprovalAction,
    actor_role: Role,
) -> ProcuraResult<TransitionPlan> {
    let stage_key = snapshot
        .current_stage
        .as_deref()
        .ok_or_else(|| invalid(snapshot, action))?;
    let stage = config
        .stage(stage_key)
        .ok_or_else(|| invalid(snapshot, action))?;

    if actor_role != Role::System && !stage.permits(actor_role) {
        return Err(ProcuraError::unauthorized_role(
            stage_key,
            actor_role.to_string(),
        ));
    }

    match action {
        ApprovalAction::AutoApprove => {
            if actor_role != Role::System || !stage.auto_approvable {
                return Err(invalid(snapshot, action));
            }
        }
        ApprovalAction::SkipStage => {
            if !stage.skippable {
                return Err(invalid(snapshot, action));
            }
        }
        ApprovalAction::Escalate => {
            // Escalation hands off to the next authority; the final stage
            // has nowhere to escalate to.
            if stage.next_stage.is_none() {
                return Err(invalid(snapshot, action));
            }
        }
        _ => {}
    }

    let (to_stage, new_status, mut events) = match &stage.next_stage {
        Some(next) => (
            Some(next.clone()),
            UnifiedStatus::InReview,
            vec![WorkflowEventType::EntityApprovedAtStage],
        ),
        None => (
            None,
            UnifiedStatus::Approved,
            vec![WorkflowEventType::EntityApproved],
        ),
    };
    if action == ApprovalAction::Escalate {
        events = vec![WorkflowEventType::ApprovalEscalation];
    }

    Ok(TransitionPlan {
        action,
        from_stage: Some(stage_key.to_string()),
        to_stage,
        new_status,
        events,
    })
}

pub fn plan_rejection(
    config: &WorkflowConfiguration,
    snapshot: &EntitySnapshot,
    action: RejectionAction,
    actor_role: Role,
) -> ProcuraResult<RejectionPlan> {
    if snapshot.status.is_workflow_terminal() {
        return Err(ProcuraError::EntityAlreadyTerminal {
            entity_id: snapshot.entity_id.clone(),
            status: snapshot.status.to_string(),
        });
    }

    if let Some(stage_key) = snapshot.current_stage.as_deref() {
        if let Some(stage) = config.stage(stage_key) {
            if actor_role != Role::System && !stage.permits(actor_role) {
                return Err(ProcuraError::unauthorized_role(
                    stage_key,
                    actor_role.to_string(),
                ));
            }
        }
    } else if action != RejectionAction::Cancel {
        // Only cancellation makes sense before the workflow started.
        return Err(ProcuraError::invalid_transition(
            snapshot.entity_type.to_string(),
            snapshot.entity_id.clone(),
            "<none>".to_string(),
            format!("{action}"),
        ));
    }

    Ok(RejectionPlan {
        action,
        from_stage: snapshot.current_stage.clone(),
        new_status: action.parked_status(),
        events: vec![WorkflowEventType::EntityRejected],
    })
}

fn invalid(snapshot: &EntitySnapshot, action: ApprovalAction) -> ProcuraError {
    ProcuraError::invalid_transition(
        snapshot.entity_type.to_string(),
        snapshot.entity_id.clone(),
        snapshot
            .current_stage
            .clone()
            .unwrap_or_else(|| "<none>".to_string()),
        action.to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use procura_models::{CompanyScope, EntityType, WorkflowStage};

    fn config() -> WorkflowConfiguration {
        WorkflowConfiguration::new(
            CompanyScope::company("CMP-001"),
            EntityType::Order,
            1,
            vec![
                WorkflowStage {
                    stage_key: "PENDING_SITE_ADMIN_APPROVAL".to_string(),
                    allowed_roles: vec![Role::SiteAdmin],
                    skippable: false,
                    auto_approvable: true,
                    next_stage: Some("PENDING_FINANCE_APPROVAL".to_string()),
                },
                WorkflowStage {
                    stage_key: "PENDING_FINANCE_APPROVAL".to_string(),
                    allowed_roles: vec![Role::FinanceAdmin],
                    skippable: true,
                    auto_approvable: false,
                    next_stage: None,
                },
            ],
        )
    }

    fn snapshot(stage: Option<&str>, status: UnifiedStatus) -> EntitySnapshot {
        EntitySnapshot {
            entity_type: EntityType::Order,
            entity_id: "ORD-1001".to_string(),
            company_id: "CMP-001".to_string(),
            vendor_id: None,
            location_id: None,
            requested_by: Some("usr-req".to_string()),
            requestor_email: Some("req@example.com".to_string()),
            owner_email: None,
            amount: 900.0,
            current_stage: stage.map(|s| s.to_string()),
            status,
            carrier_name: None,
            tracking_number: None,
            shipment_reference_number: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_submit_enters_first_stage() {
        let plan = plan_transition(
            &config(),
            &snapshot(None, UnifiedStatus::Draft),
            ApprovalAction::Submit,
            Role::Employee,
        )
        .unwrap();
        assert_eq!(plan.to_stage.as_deref(), Some("PENDING_SITE_ADMIN_APPROVAL"));
        assert_eq!(plan.new_status, UnifiedStatus::Submitted);
        assert_eq!(plan.events, vec![WorkflowEventType::EntitySubmitted]);
    }

    #[test]
    fn test_submit_rejected_when_already_in_workflow() {
        let err = plan_transition(
            &config(),
            &snapshot(Some("PENDING_SITE_ADMIN_APPROVAL"), UnifiedStatus::InReview),
            ApprovalAction::Submit,
            Role::Employee,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "invalid_transition");
    }

    #[test]
    fn test_approve_advances_and_completes() {
        let cfg = config();
        let plan = plan_transition(
            &cfg,
            &snapshot(Some("PENDING_SITE_ADMIN_APPROVAL"), UnifiedStatus::Submitted),
            ApprovalAction::Approve,
            Role::SiteAdmin,
        )
        .unwrap();
        assert_eq!(plan.to_stage.as_deref(), Some("PENDING_FINANCE_APPROVAL"));
        assert_eq!(plan.new_status, UnifiedStatus::InReview);
        assert_eq!(plan.events, vec![WorkflowEventType::EntityApprovedAtStage]);

        let final_plan = plan_transition(
            &cfg,
            &snapshot(Some("PENDING_FINANCE_APPROVAL"), UnifiedStatus::InReview),
            ApprovalAction::Approve,
            Role::FinanceAdmin,
        )
        .unwrap();
        assert_eq!(final_plan.to_stage, None);
        assert_eq!(final_plan.new_status, UnifiedStatus::Approved);
        assert_eq!(final_plan.events, vec![WorkflowEventType::EntityApproved]);
    }

    #[test]
    fn test_unauthorized_role_is_rejected() {
        let err = plan_transition(
            &config(),
            &snapshot(Some("PENDING_SITE_ADMIN_APPROVAL"), UnifiedStatus::Submitted),
            ApprovalAction::Approve,
            Role::Employee,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "unauthorized_role");
        assert_eq!(err.http_status_code(), 403);
    }

    #[test]
    fn test_terminal_entities_accept_nothing() {
        let err = plan_transition(
            &config(),
            &snapshot(None, UnifiedStatus::Approved),
            ApprovalAction::Submit,
            Role::Employee,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "entity_already_terminal");

        let err = plan_rejection(
            &config(),
            &snapshot(None, UnifiedStatus::Approved),
            RejectionAction::Cancel,
            Role::CompanyAdmin,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "entity_already_terminal");
    }

    #[test]
    fn test_skip_requires_skippable_stage() {
        let err = plan_transition(
            &config(),
            &snapshot(Some("PENDING_SITE_ADMIN_APPROVAL"), UnifiedStatus::Submitted),
            ApprovalAction::SkipStage,
            Role::SiteAdmin,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "invalid_transition");

        let plan = plan_transition(
            &config(),
            &snapshot(Some("PENDING_FINANCE_APPROVAL"), UnifiedStatus::InReview),
            ApprovalAction::SkipStage,
            Role::FinanceAdmin,
        )
        .unwrap();
        assert_eq!(plan.new_status, UnifiedStatus::Approved);
    }

    #[test]
    fn test_escalate_requires_successor_stage() {
        let plan = plan_transition(
            &config(),
            &snapshot(Some("PENDING_SITE_ADMIN_APPROVAL"), UnifiedStatus::Submitted),
            ApprovalAction::Escalate,
            Role::SiteAdmin,
        )
        .unwrap();
        assert_eq!(plan.events, vec![WorkflowEventType::ApprovalEscalation]);
        assert_eq!(plan.to_stage.as_deref(), Some("PENDING_FINANCE_APPROVAL"));

        let err = plan_transition(
            &config(),
            &snapshot(Some("PENDING_FINANCE_APPROVAL"), UnifiedStatus::InReview),
            ApprovalAction::Escalate,
            Role::FinanceAdmin,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "invalid_transition");
    }

    #[test]
    fn test_auto_approve_is_system_only() {
        let err = plan_transition(
            &config(),
            &snapshot(Some("PENDING_SITE_ADMIN_APPROVAL"), UnifiedStatus::Submitted),
            ApprovalAction::AutoApprove,
            Role::SiteAdmin,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "invalid_transition");

        let plan = plan_transition(
            &config(),
            &snapshot(Some("PENDING_SITE_ADMIN_APPROVAL"), UnifiedStatus::Submitted),
            ApprovalAction::AutoApprove,
            Role::System,
        )
        .unwrap();
        assert_eq!(plan.action, ApprovalAction::AutoApprove);
    }

    #[test]
    fn test_rejection_parks_the_entity() {
        let plan = plan_rejection(
            &config(),
            &snapshot(Some("PENDING_SITE_ADMIN_APPROVAL"), UnifiedStatus::Submitted),
            RejectionAction::SendBack,
            Role::SiteAdmin,
        )
        .unwrap();
        assert_eq!(plan.new_status, UnifiedStatus::Draft);
        assert_eq!(plan.events, vec![WorkflowEventType::EntityRejected]);

        // Hold by an unauthorized role is refused.
        let err = plan_rejection(
            &config(),
            &snapshot(Some("PENDING_SITE_ADMIN_APPROVAL"), UnifiedStatus::Submitted),
            RejectionAction::Hold,
            Role::Vendor,
        )
        .unwrap_err();
        assert_eq!(err.error_code(), "unauthorized_role");
    }
}
