//! Workflow configuration model
//!
//! Versioned, per-company stage definitions driving the approval state
//! machine. Exactly one configuration version is active per
//! (company scope, entity type); the `*` scope is the global fallback.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{EntityType, UnifiedStatus};

/// Actor roles recognized by stage definitions and notification conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    CompanyAdmin,
    LocationAdmin,
    FinanceAdmin,
    SiteAdmin,
    Employee,
    Vendor,
    System,
}

impl Role {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "COMPANY_ADMIN" => Some(Self::CompanyAdmin),
            "LOCATION_ADMIN" => Some(Self::LocationAdmin),
            "FINANCE_ADMIN" => Some(Self::FinanceAdmin),
            "SITE_ADMIN" => Some(Self::SiteAdmin),
            "EMPLOYEE" => Some(Self::Employee),
            "VENDOR" => Some(Self::Vendor),
            "SYSTEM" => Some(Self::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Serializes as the raw company id, with `*` denoting the global scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum CompanyScope {
    Global,
    Company(String),
}

impl CompanyScope {
    pub fn company(id: impl Into<String>) -> Self {
        Self::Company(id.into())
    }

    pub fn matches(&self, company_id: &str) -> bool {
        match self {
            Self::Global => true,
            Self::Company(id) => id == company_id,
        }
    }
}

impl From<CompanyScope> for String {
    fn from(scope: CompanyScope) -> Self {
        match scope {
            CompanyScope::Global => "*".to_string(),
            CompanyScope::Company(id) => id,
        }
    }
}

impl TryFrom<String> for CompanyScope {
    type Error = std::convert::Infallible;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Ok(if s == "*" {
            CompanyScope::Global
        } else {
            CompanyScope::Company(s)
        })
    }
}

/// Entity-type scope for notification mappings; `*` matches every type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EntityScope {
    All,
    Only(EntityType),
}

impl EntityScope {
    pub fn matches(&self, entity_type: EntityType) -> bool {
        match self {
            Self::All => true,
            Self::Only(t) => *t == entity_type,
        }
    }
}

impl From<EntityScope> for String {
    fn from(scope: EntityScope) -> Self {
        match scope {
            EntityScope::All => "*".to_string(),
            EntityScope::Only(t) => t.to_string(),
        }
    }
}

impl TryFrom<String> for EntityScope {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if s == "*" {
            return Ok(EntityScope::All);
        }
        EntityType::from_str(&s)
            .map(EntityScope::Only)
            .ok_or_else(|| format!("unknown entity type: {s}"))
    }
}

/// Positive transition actions recorded in the approval audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalAction {
    Submit,
    Resubmit,
    Approve,
    AutoApprove,
    SkipStage,
    Escalate,
}

impl std::fmt::Display for ApprovalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Negative outcomes recorded as rejection rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionAction {
    Reject,
    SendBack,
    Cancel,
    Hold,
}

impl RejectionAction {
    /// Terminal or parked status the entity is forced into.
    pub fn parked_status(&self) -> UnifiedStatus {
        match self {
            Self::Reject => UnifiedStatus::Rejected,
            Self::SendBack => UnifiedStatus::Draft,
            Self::Cancel => UnifiedStatus::Cancelled,
            Self::Hold => UnifiedStatus::OnHold,
        }
    }
}

impl std::fmt::Display for RejectionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Any workflow action a caller may submit, parsed from the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowActionKind {
    Approval(ApprovalAction),
    Rejection(RejectionAction),
}

impl WorkflowActionKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "SUBMIT" => Some(Self::Approval(ApprovalAction::Submit)),
            "RESUBMIT" => Some(Self::Approval(ApprovalAction::Resubmit)),
            "APPROVE" => Some(Self::Approval(ApprovalAction::Approve)),
            "AUTO_APPROVE" => Some(Self::Approval(ApprovalAction::AutoApprove)),
            "SKIP_STAGE" => Some(Self::Approval(ApprovalAction::SkipStage)),
            "ESCALATE" => Some(Self::Approval(ApprovalAction::Escalate)),
            "REJECT" => Some(Self::Rejection(RejectionAction::Reject)),
            "SEND_BACK" => Some(Self::Rejection(RejectionAction::SendBack)),
            "CANCEL" => Some(Self::Rejection(RejectionAction::Cancel)),
            "HOLD" => Some(Self::Rejection(RejectionAction::Hold)),
            _ => None,
        }
    }
}

/// Typed events emitted after a successful transition or rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowEventType {
    EntitySubmitted,
    EntityApprovedAtStage,
    EntityApproved,
    EntityRejected,
    EntityResubmitted,
    ApprovalReminder,
    ApprovalEscalation,
}

impl std::fmt::Display for WorkflowEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// One node in the approval graph for an entity type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStage {
    pub stage_key: String,
    pub allowed_roles: Vec<Role>,
    pub skippable: bool,
    pub auto_approvable: bool,
    /// Successor stage key; `None` makes approval at this stage terminal.
    pub next_stage: Option<String>,
}

impl WorkflowStage {
    pub fn permits(&self, role: Role) -> bool {
        self.allowed_roles.contains(&role)
    }
}

/// Versioned stage definition for one (company scope, entity type) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfiguration {
    pub id: Uuid,
    pub company_scope: CompanyScope,
    pub entity_type: EntityType,
    pub version: i32,
    pub is_active: bool,
    pub stages: Vec<WorkflowStage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowConfiguration {
    pub fn new(
        company_scope: CompanyScope,
        entity_type: EntityType,
        version: i32,
        stages: Vec<WorkflowStage>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company_scope,
            entity_type,
            version,
            is_active: true,
            stages,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn stage(&self, stage_key: &str) -> Option<&WorkflowStage> {
        self.stages.iter().find(|s| s.stage_key == stage_key)
    }

    pub fn first_stage(&self) -> Option<&WorkflowStage> {
        self.stages.first()
    }

    /// Stage whose successor is `stage_key`, if any.
    pub fn previous_stage(&self, stage_key: &str) -> Option<&WorkflowStage> {
        self.stages
            .iter()
            .find(|s| s.next_stage.as_deref() == Some(stage_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage_config() -> WorkflowConfiguration {
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

    #[test]
    fn test_stage_lookup() {
        let config = two_stage_config();
        assert!(config.stage("PENDING_SITE_ADMIN_APPROVAL").is_some());
        assert!(config.stage("UNKNOWN").is_none());
        assert_eq!(
            config.previous_stage("PENDING_FINANCE_APPROVAL").unwrap().stage_key,
            "PENDING_SITE_ADMIN_APPROVAL"
        );
    }

    #[test]
    fn test_company_scope_wire_format() {
        let global: CompanyScope = serde_json::from_str("\"*\"").unwrap();
        assert_eq!(global, CompanyScope::Global);
        assert_eq!(serde_json::to_string(&global).unwrap(), "\"*\"");

        let scoped = CompanyScope::company("CMP-9");
        assert_eq!(serde_json::to_string(&scoped).unwrap(), "\"CMP-9\"");
        assert!(scoped.matches("CMP-9"));
        assert!(!scoped.matches("CMP-8"));
        assert!(CompanyScope::Global.matches("CMP-8"));
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(
            WorkflowActionKind::from_str("approve"),
            Some(WorkflowActionKind::Approval(ApprovalAction::Approve))
        );
        assert_eq!(
            WorkflowActionKind::from_str("SEND_BACK"),
            Some(WorkflowActionKind::Rejection(RejectionAction::SendBack))
        );
        assert_eq!(WorkflowActionKind::from_str("nope"), None);
    }

    #[test]
    fn test_parked_statuses() {
        assert_eq!(RejectionAction::Hold.parked_status(), UnifiedStatus::OnHold);
        assert_eq!(RejectionAction::Cancel.parked_status(), UnifiedStatus::Cancelled);
        assert_eq!(RejectionAction::SendBack.parked_status(), UnifiedStatus::Draft);
    }
}
