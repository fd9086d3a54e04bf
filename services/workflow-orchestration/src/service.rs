//! Workflow orchestration service
//!
//! Applies planned transitions with a compare-and-set entity update, appends
//! hash-chained audit rows, runs the auto-approve cascade, and emits events
//! synchronously to the notification resolver. Resolver failures are logged
//! and never surface to the caller.

use std::sync::Arc;

use uuid::Uuid;

use procura_database::{
    AuditLedger, EntityStore, RecipientDirectory, WorkflowConfigStore,
};
use procura_models::{
    ApprovalAction, CompanyScope, EntitySnapshot, EntityType, Role, StatusProjection,
    WorkflowActionKind, WorkflowApprovalAudit, WorkflowConfiguration, WorkflowRejection,
    SYSTEM_ACTOR,
};
use procura_utils::{ProcuraError, ProcuraResult};

use crate::notifier::{Notifier, WorkflowEvent};
use crate::stage_engine::{plan_rejection, plan_transition, RejectionPlan, TransitionPlan};

/// Caller-supplied action parameters, already parsed off the wire.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub action: WorkflowActionKind,
    pub actor_id: String,
    pub actor_role: Role,
    pub remarks: Option<String>,
    pub reason_code: Option<String>,
}

/// Result of one accepted workflow action.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransitionOutcome {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub from_stage: Option<String>,
    pub current_stage: Option<String>,
    #[serde(flatten)]
    pub projection: StatusProjection,
    pub auto_approved_stages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_id: Option<Uuid>,
}

/// Audit trail read model, approvals verified as a chain.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditTrail {
    pub approvals: Vec<WorkflowApprovalAudit>,
    pub rejections: Vec<WorkflowRejection>,
    pub chain_valid: bool,
}

#[derive(Clone)]
pub struct WorkflowService {
    configs: Arc<dyn WorkflowConfigStore>,
    entities: Arc<dyn EntityStore>,
    ledger: Arc<dyn AuditLedger>,
    directory: Arc<dyn RecipientDirectory>,
    notifier: Arc<Notifier>,
}

impl WorkflowService {
    pub fn new(
        configs: Arc<dyn WorkflowConfigStore>,
        entities: Arc<dyn EntityStore>,
        ledger: Arc<dyn AuditLedger>,
        directory: Arc<dyn RecipientDirectory>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            configs,
            entities,
            ledger,
            directory,
            notifier,
        }
    }

    /// Applies one workflow action end to end.
    pub async fn execute(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        request: ActionRequest,
    ) -> ProcuraResult<TransitionOutcome> {
        let snapshot = self
            .entities
            .snapshot(entity_type, entity_id)
            .await?
            .ok_or_else(|| ProcuraError::not_found(format!("{entity_type} {entity_id}")))?;
        let config = self.resolve_config(&snapshot.company_id, entity_type).await?;

        match request.action {
            WorkflowActionKind::Approval(action) => {
                self.apply_approval(snapshot, &config, action, request).await
            }
            WorkflowActionKind::Rejection(action) => {
                self.apply_rejection(snapshot, &config, action, request).await
            }
        }
    }

    /// Active configuration for the company, falling back to `*`.
    pub async fn resolve_config(
        &self,
        company_id: &str,
        entity_type: EntityType,
    ) -> ProcuraResult<WorkflowConfiguration> {
        let company_scope = CompanyScope::company(company_id);
        if let Some(config) = self.configs.find_active(&company_scope, entity_type).await? {
            return Ok(config);
        }
        if let Some(config) = self
            .configs
            .find_active(&CompanyScope::Global, entity_type)
            .await?
        {
            return Ok(config);
        }
        Err(ProcuraError::not_found(format!(
            "active workflow configuration for {entity_type} in company {company_id}"
        )))
    }

    pub async fn activate_config(&self, config: WorkflowConfiguration) -> ProcuraResult<()> {
        self.configs.activate(config).await
    }

    pub async fn audit_trail(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<AuditTrail> {
        let approvals = self.ledger.approvals_for(entity_type, entity_id).await?;
        let rejections = self.ledger.rejections_for(entity_type, entity_id).await?;
        let chain_valid = WorkflowApprovalAudit::verify_chain(&approvals);
        Ok(AuditTrail {
            approvals,
            rejections,
            chain_valid,
        })
    }

    /// Marks a rejection resolved. A second resolution attempt is a conflict.
    pub async fn resolve_rejection(
        &self,
        rejection_id: Uuid,
        resolved_by: &str,
        resolution_action: &str,
    ) -> ProcuraResult<()> {
        let resolved = self
            .ledger
            .resolve_rejection(rejection_id, resolved_by, resolution_action)
            .await?;
        if !resolved {
            return Err(ProcuraError::conflict(format!(
                "rejection {rejection_id} is already resolved"
            )));
        }
        tracing::info!(%rejection_id, resolved_by, resolution_action, "Rejection resolved");
        Ok(())
    }

    async fn apply_approval(
        &self,
        snapshot: EntitySnapshot,
        config: &WorkflowConfiguration,
        action: ApprovalAction,
        request: ActionRequest,
    ) -> ProcuraResult<TransitionOutcome> {
        let plan = plan_transition(config, &snapshot, action, request.actor_role)?;
        let correlation_id = Uuid::new_v4().to_string();

        self.commit_transition(
            &snapshot,
            config,
            &plan,
            &request.actor_id,
            request.actor_role,
            request.remarks.clone(),
            &correlation_id,
        )
        .await?;

        let auto_approved_stages = self
            .auto_approve_cascade(config, snapshot.entity_type, &snapshot.entity_id, &correlation_id)
            .await?;

        let current = self
            .entities
            .snapshot(snapshot.entity_type, &snapshot.entity_id)
            .await?
            .ok_or_else(|| ProcuraError::not_found(snapshot.entity_id.clone()))?;

        tracing::info!(
            entity_type = %snapshot.entity_type,
            entity_id = %snapshot.entity_id,
            action = %plan.action,
            from_stage = plan.from_stage.as_deref().unwrap_or("-"),
            to_stage = current.current_stage.as_deref().unwrap_or("-"),
            status = %current.status,
            "Workflow transition applied"
        );

        Ok(TransitionOutcome {
            entity_type: snapshot.entity_type,
            entity_id: snapshot.entity_id,
            from_stage: plan.from_stage.clone(),
            current_stage: current.current_stage.clone(),
            projection: current.status.project(),
            auto_approved_stages,
            rejection_id: None,
        })
    }

    /// CAS write + audit append for one planned transition. The caller holds
    /// the pre-transition snapshot; a CAS miss means a concurrent writer won.
    async fn commit_transition(
        &self,
        snapshot: &EntitySnapshot,
        config: &WorkflowConfiguration,
        plan: &TransitionPlan,
        actor_id: &str,
        actor_role: Role,
        remarks: Option<String>,
        correlation_id: &str,
    ) -> ProcuraResult<()> {
        let applied = self
            .entities
            .apply_transition(
                snapshot.entity_type,
                &snapshot.entity_id,
                snapshot.current_stage.as_deref(),
                plan.to_stage.as_deref(),
                plan.new_status,
            )
            .await?;
        if !applied {
            return Err(ProcuraError::conflict(format!(
                "{} {} was modified concurrently, retry the action",
                snapshot.entity_type, snapshot.entity_id
            )));
        }

        let previous_hash = self
            .ledger
            .latest_hash(snapshot.entity_type, &snapshot.entity_id)
            .await?;
        let audit = WorkflowApprovalAudit::new(
            config.id,
            config.version,
            snapshot.clone(),
            plan.action,
            plan.from_stage.clone(),
            plan.to_stage.clone(),
            plan.new_status,
            actor_id.to_string(),
            actor_role,
            remarks,
            previous_hash,
        );
        self.ledger.append_approval(audit).await?;

        let mut post = snapshot.clone();
        post.current_stage = plan.to_stage.clone();
        post.status = plan.new_status;
        for event_type in &plan.events {
            self.emit(
                WorkflowEvent {
                    event_type: *event_type,
                    snapshot: post.clone(),
                    stage_key: plan.from_stage.clone().or_else(|| plan.to_stage.clone()),
                    actor_id: actor_id.to_string(),
                    actor_role,
                    action_label: plan.action.to_string(),
                    reason: None,
                    correlation_id: correlation_id.to_string(),
                },
                config,
            )
            .await;
        }
        Ok(())
    }

    /// Auto-approves stages that are marked auto-approvable and have no user
    /// holding any of their allowed roles. Stops at the first stage with a
    /// live approver, at workflow completion, or on a lost CAS.
    async fn auto_approve_cascade(
        &self,
        config: &WorkflowConfiguration,
        entity_type: EntityType,
        entity_id: &str,
        correlation_id: &str,
    ) -> ProcuraResult<Vec<String>> {
        let mut auto_approved = Vec::new();
        loop {
            let Some(snapshot) = self.entities.snapshot(entity_type, entity_id).await? else {
                break;
            };
            let Some(stage_key) = snapshot.current_stage.clone() else {
                break;
            };
            let Some(stage) = config.stage(&stage_key) else {
                break;
            };
            if !stage.auto_approvable || self.stage_has_approvers(&snapshot, stage).await? {
                break;
            }

            let plan = match plan_transition(
                config,
                &snapshot,
                ApprovalAction::AutoApprove,
                Role::System,
            ) {
                Ok(plan) => plan,
                Err(_) => break,
            };
            match self
                .commit_transition(
                    &snapshot,
                    config,
                    &plan,
                    SYSTEM_ACTOR,
                    Role::System,
                    Some("no eligible approver".to_string()),
                    correlation_id,
                )
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        %entity_type,
                        entity_id,
                        stage = %stage_key,
                        "Stage auto-approved"
                    );
                    auto_approved.push(stage_key);
                }
                // A concurrent writer moved the entity; it owns the cascade.
                Err(ProcuraError::Conflict { .. }) => break,
                Err(other) => return Err(other),
            }
        }
        Ok(auto_approved)
    }

    async fn stage_has_approvers(
        &self,
        snapshot: &EntitySnapshot,
        stage: &procura_models::WorkflowStage,
    ) -> ProcuraResult<bool> {
        for role in &stage.allowed_roles {
            if !self
                .directory
                .users_with_role(&snapshot.company_id, *role)
                .await?
                .is_empty()
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn apply_rejection(
        &self,
        snapshot: EntitySnapshot,
        config: &WorkflowConfiguration,
        action: procura_models::RejectionAction,
        request: ActionRequest,
    ) -> ProcuraResult<TransitionOutcome> {
        let plan: RejectionPlan = plan_rejection(config, &snapshot, action, request.actor_role)?;

        // Rejection parks the entity outside the stage graph.
        let applied = self
            .entities
            .apply_transition(
                snapshot.entity_type,
                &snapshot.entity_id,
                snapshot.current_stage.as_deref(),
                None,
                plan.new_status,
            )
            .await?;
        if !applied {
            return Err(ProcuraError::conflict(format!(
                "{} {} was modified concurrently, retry the action",
                snapshot.entity_type, snapshot.entity_id
            )));
        }

        let rejection = WorkflowRejection::new(
            snapshot.clone(),
            plan.action,
            request
                .reason_code
                .clone()
                .unwrap_or_else(|| "UNSPECIFIED".to_string()),
            request.actor_id.clone(),
            request.actor_role,
            request.remarks.clone(),
        );
        let rejection_id = rejection.id;
        self.ledger.append_rejection(rejection).await?;

        let correlation_id = Uuid::new_v4().to_string();
        let mut post = snapshot.clone();
        post.current_stage = None;
        post.status = plan.new_status;
        for event_type in &plan.events {
            self.emit(
                WorkflowEvent {
                    event_type: *event_type,
                    snapshot: post.clone(),
                    stage_key: plan.from_stage.clone(),
                    actor_id: request.actor_id.clone(),
                    actor_role: request.actor_role,
                    action_label: format!("{}", plan.action),
                    reason: request.remarks.clone(),
                    correlation_id: correlation_id.clone(),
                },
                config,
            )
            .await;
        }

        tracing::info!(
            entity_type = %snapshot.entity_type,
            entity_id = %snapshot.entity_id,
            action = %plan.action,
            stage = plan.from_stage.as_deref().unwrap_or("-"),
            status = %plan.new_status,
            "Workflow rejection recorded"
        );

        Ok(TransitionOutcome {
            entity_type: snapshot.entity_type,
            entity_id: snapshot.entity_id,
            from_stage: plan.from_stage,
            current_stage: None,
            projection: plan.new_status.project(),
            auto_approved_stages: Vec::new(),
            rejection_id: Some(rejection_id),
        })
    }

    /// Awaited before the action returns; resolver problems are logged and
    /// swallowed so they never fail the transition.
    async fn emit(&self, event: WorkflowEvent, config: &WorkflowConfiguration) {
        if let Err(error) = self.notifier.notify(&event, config).await {
            tracing::warn!(
                %error,
                event = %event.event_type,
                entity_id = %event.snapshot.entity_id,
                "Notification fan-out failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use procura_database::memory::MemoryDirectory;
    use procura_database::{MemoryStore, NotificationQueueStore};
    use procura_models::{RejectionAction, UnifiedStatus, WorkflowStage};
    use procura_utils::config::NotificationConfig;

    use crate::templates::TemplateCatalog;

    fn stage(key: &str, roles: Vec<Role>, auto: bool, next: Option<&str>) -> WorkflowStage {
        WorkflowStage {
            stage_key: key.to_string(),
            allowed_roles: roles,
            skippable: false,
            auto_approvable: auto,
            next_stage: next.map(|s| s.to_string()),
        }
    }

    fn order_snapshot(entity_id: &str) -> EntitySnapshot {
        EntitySnapshot {
            entity_type: EntityType::Order,
            entity_id: entity_id.to_string(),
            company_id: "CMP-001".to_string(),
            vendor_id: Some("VND-01".to_string()),
            location_id: None,
            requested_by: Some("usr-req".to_string()),
            requestor_email: Some("req@example.com".to_string()),
            owner_email: None,
            amount: 2500.0,
            current_stage: None,
            status: UnifiedStatus::Draft,
            carrier_name: None,
            tracking_number: None,
            shipment_reference_number: None,
            updated_at: Utc::now(),
        }
    }

    async fn service_with(
        stages: Vec<WorkflowStage>,
        directory: Arc<MemoryDirectory>,
    ) -> (WorkflowService, Arc<MemoryStore>) {
        let store = MemoryStore::new();
        store
            .activate(WorkflowConfiguration::new(
                CompanyScope::company("CMP-001"),
                EntityType::Order,
                1,
                stages,
            ))
            .await
            .unwrap();
        store.put_snapshot(order_snapshot("ORD-1001")).await.unwrap();

        let notifier = Arc::new(Notifier::new(
            store.clone(),
            store.clone(),
            directory.clone(),
            Arc::new(TemplateCatalog::new()),
            NotificationConfig {
                default_max_attempts: 5,
                backoff_base_seconds: 60,
                dispatch_interval_seconds: 15,
                dispatch_batch_size: 50,
            },
        ));
        let service = WorkflowService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            directory,
            notifier,
        );
        (service, store)
    }

    fn request(action: &str, actor_id: &str, role: Role) -> ActionRequest {
        ActionRequest {
            action: WorkflowActionKind::from_str(action).unwrap(),
            actor_id: actor_id.to_string(),
            actor_role: role,
            remarks: None,
            reason_code: None,
        }
    }

    #[tokio::test]
    async fn test_multi_stage_approval_chains_audits() {
        let directory = MemoryDirectory::new();
        directory
            .add_user("usr-site", "CMP-001", "site@example.com", "Site", Role::SiteAdmin)
            .await;
        directory
            .add_user("usr-fin", "CMP-001", "fin@example.com", "Fin", Role::FinanceAdmin)
            .await;
        let (service, store) = service_with(
            vec![
                stage("STAGE_SITE", vec![Role::SiteAdmin], false, Some("STAGE_FIN")),
                stage("STAGE_FIN", vec![Role::FinanceAdmin], false, None),
            ],
            directory,
        )
        .await;

        let out = service
            .execute(EntityType::Order, "ORD-1001", request("SUBMIT", "usr-req", Role::Employee))
            .await
            .unwrap();
        assert_eq!(out.current_stage.as_deref(), Some("STAGE_SITE"));
        assert_eq!(out.projection.status, "PENDING");

        service
            .execute(EntityType::Order, "ORD-1001", request("APPROVE", "usr-site", Role::SiteAdmin))
            .await
            .unwrap();
        let out = service
            .execute(EntityType::Order, "ORD-1001", request("APPROVE", "usr-fin", Role::FinanceAdmin))
            .await
            .unwrap();
        assert_eq!(out.current_stage, None);
        assert_eq!(out.projection.unified_status, UnifiedStatus::Approved);
        assert_eq!(out.projection.status, "APPROVED");

        let trail = service.audit_trail(EntityType::Order, "ORD-1001").await.unwrap();
        assert_eq!(trail.approvals.len(), 3);
        assert!(trail.chain_valid);
        assert_eq!(trail.approvals[0].previous_hash, None);
        assert_eq!(
            trail.approvals[2].previous_hash.as_deref(),
            Some(trail.approvals[1].hash.as_str())
        );

        // Terminal entities accept nothing further.
        let err = service
            .execute(EntityType::Order, "ORD-1001", request("APPROVE", "usr-fin", Role::FinanceAdmin))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "entity_already_terminal");
        drop(store);
    }

    #[tokio::test]
    async fn test_auto_approve_cascade_skips_unstaffed_stages() {
        // No site admin exists, so the first stage auto-approves; the finance
        // stage is staffed and stops the cascade.
        let directory = MemoryDirectory::new();
        directory
            .add_user("usr-fin", "CMP-001", "fin@example.com", "Fin", Role::FinanceAdmin)
            .await;
        let (service, store) = service_with(
            vec![
                stage("STAGE_SITE", vec![Role::SiteAdmin], true, Some("STAGE_FIN")),
                stage("STAGE_FIN", vec![Role::FinanceAdmin], true, None),
            ],
            directory,
        )
        .await;

        let out = service
            .execute(EntityType::Order, "ORD-1001", request("SUBMIT", "usr-req", Role::Employee))
            .await
            .unwrap();
        assert_eq!(out.auto_approved_stages, vec!["STAGE_SITE".to_string()]);
        assert_eq!(out.current_stage.as_deref(), Some("STAGE_FIN"));

        let approvals = store.approvals_for(EntityType::Order, "ORD-1001").await.unwrap();
        assert_eq!(approvals.len(), 2);
        assert_eq!(approvals[1].action, ApprovalAction::AutoApprove);
        assert_eq!(approvals[1].approved_by, SYSTEM_ACTOR);
        assert_eq!(approvals[1].approved_by_role, Role::System);
        assert!(WorkflowApprovalAudit::verify_chain(&approvals));
    }

    #[tokio::test]
    async fn test_concurrent_approvals_produce_one_audit_row() {
        let directory = MemoryDirectory::new();
        directory
            .add_user("usr-site", "CMP-001", "site@example.com", "Site", Role::SiteAdmin)
            .await;
        directory
            .add_user("usr-fin", "CMP-001", "fin@example.com", "Fin", Role::FinanceAdmin)
            .await;
        let (service, store) = service_with(
            vec![
                stage("STAGE_SITE", vec![Role::SiteAdmin], false, Some("STAGE_FIN")),
                stage("STAGE_FIN", vec![Role::FinanceAdmin], false, None),
            ],
            directory,
        )
        .await;
        service
            .execute(EntityType::Order, "ORD-1001", request("SUBMIT", "usr-req", Role::Employee))
            .await
            .unwrap();

        let a = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .execute(EntityType::Order, "ORD-1001", request("APPROVE", "usr-site", Role::SiteAdmin))
                    .await
            })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .execute(EntityType::Order, "ORD-1001", request("APPROVE", "usr-site", Role::SiteAdmin))
                    .await
            })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);

        // SUBMIT plus exactly one APPROVE, chain intact.
        let approvals = store.approvals_for(EntityType::Order, "ORD-1001").await.unwrap();
        assert_eq!(approvals.len(), 2);
        assert!(WorkflowApprovalAudit::verify_chain(&approvals));
    }

    #[tokio::test]
    async fn test_send_back_resolve_and_resubmit() {
        let directory = MemoryDirectory::new();
        directory
            .add_user("usr-site", "CMP-001", "site@example.com", "Site", Role::SiteAdmin)
            .await;
        let (service, store) = service_with(
            vec![stage("STAGE_SITE", vec![Role::SiteAdmin], false, None)],
            directory,
        )
        .await;
        service
            .execute(EntityType::Order, "ORD-1001", request("SUBMIT", "usr-req", Role::Employee))
            .await
            .unwrap();

        let mut send_back = request("SEND_BACK", "usr-site", Role::SiteAdmin);
        send_back.reason_code = Some("INCOMPLETE".to_string());
        let out = service
            .execute(EntityType::Order, "ORD-1001", send_back)
            .await
            .unwrap();
        assert_eq!(out.current_stage, None);
        assert_eq!(out.projection.unified_status, UnifiedStatus::Draft);
        let rejection_id = out.rejection_id.unwrap();

        let trail = service.audit_trail(EntityType::Order, "ORD-1001").await.unwrap();
        assert_eq!(trail.rejections.len(), 1);
        assert_eq!(trail.rejections[0].action, RejectionAction::SendBack);
        assert_eq!(trail.rejections[0].reason_code, "INCOMPLETE");
        assert!(!trail.rejections[0].is_resolved);

        service
            .resolve_rejection(rejection_id, "usr-req", "RESUBMITTED")
            .await
            .unwrap();
        let err = service
            .resolve_rejection(rejection_id, "usr-req", "RESUBMITTED")
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "conflict");

        let out = service
            .execute(EntityType::Order, "ORD-1001", request("RESUBMIT", "usr-req", Role::Employee))
            .await
            .unwrap();
        assert_eq!(out.current_stage.as_deref(), Some("STAGE_SITE"));
        assert_eq!(out.projection.unified_status, UnifiedStatus::Submitted);
        drop(store);
    }

    #[tokio::test]
    async fn test_global_config_fallback() {
        let directory = MemoryDirectory::new();
        let store = MemoryStore::new();
        store
            .activate(WorkflowConfiguration::new(
                CompanyScope::Global,
                EntityType::Order,
                3,
                vec![stage("GLOBAL_STAGE", vec![Role::CompanyAdmin], false, None)],
            ))
            .await
            .unwrap();
        let notifier = Arc::new(Notifier::new(
            store.clone(),
            store.clone(),
            directory.clone(),
            Arc::new(TemplateCatalog::new()),
            NotificationConfig {
                default_max_attempts: 5,
                backoff_base_seconds: 60,
                dispatch_interval_seconds: 15,
                dispatch_batch_size: 50,
            },
        ));
        let service = WorkflowService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            directory,
            notifier,
        );

        let config = service.resolve_config("CMP-777", EntityType::Order).await.unwrap();
        assert_eq!(config.company_scope, CompanyScope::Global);
        assert_eq!(config.version, 3);

        // A company-scoped activation takes precedence afterwards.
        service
            .activate_config(WorkflowConfiguration::new(
                CompanyScope::company("CMP-777"),
                EntityType::Order,
                1,
                vec![stage("COMPANY_STAGE", vec![Role::SiteAdmin], false, None)],
            ))
            .await
            .unwrap();
        let config = service.resolve_config("CMP-777", EntityType::Order).await.unwrap();
        assert_eq!(config.company_scope, CompanyScope::company("CMP-777"));

        let err = service
            .resolve_config("CMP-777", EntityType::Invoice)
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "not_found");
    }

    #[tokio::test]
    async fn test_submission_fans_out_notifications_before_returning() {
        use procura_database::MappingStore as _;

        let directory = MemoryDirectory::new();
        directory
            .add_user("usr-site", "CMP-001", "site@example.com", "Site", Role::SiteAdmin)
            .await;
        let (service, store) = service_with(
            vec![stage("STAGE_SITE", vec![Role::SiteAdmin], false, None)],
            directory,
        )
        .await;
        store
            .put_mapping(procura_models::WorkflowNotificationMapping {
                id: Uuid::new_v4(),
                company_scope: CompanyScope::company("CMP-001"),
                entity_scope: procura_models::EntityScope::All,
                event_type: procura_models::WorkflowEventType::EntitySubmitted,
                stage_key: None,
                recipient_resolvers: vec![procura_models::RecipientResolver::CurrentStageRole],
                custom_recipients: vec![],
                exclude_action_performer: false,
                channels: vec![procura_models::ChannelSpec {
                    channel: procura_models::NotificationChannel::Email,
                    template_key: "approval_request".to_string(),
                    priority: 1,
                    delay_minutes: 0,
                }],
                conditions: procura_models::MappingConditions::default(),
                is_active: true,
                priority: 1,
            })
            .await
            .unwrap();

        service
            .execute(EntityType::Order, "ORD-1001", request("SUBMIT", "usr-req", Role::Employee))
            .await
            .unwrap();

        // Emission is awaited inside execute, so the queue row is visible
        // the moment the action returns.
        let claimed = store.claim_batch(10, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].recipient_email, "site@example.com");
    }
}
