use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity families the workflow engine orchestrates across.
///
/// Purchase requests are modeled as a specialization of `Order` and share
/// its workflow configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Order,
    PurchaseOrder,
    GoodsReceiptNote,
    Invoice,
    Shipment,
}

impl EntityType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ORDER" | "PR" | "PURCHASE_REQUEST" => Some(Self::Order),
            "PURCHASE_ORDER" | "PO" => Some(Self::PurchaseOrder),
            "GOODS_RECEIPT_NOTE" | "GRN" => Some(Self::GoodsReceiptNote),
            "INVOICE" => Some(Self::Invoice),
            "SHIPMENT" => Some(Self::Shipment),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Order => write!(f, "ORDER"),
            Self::PurchaseOrder => write!(f, "PURCHASE_ORDER"),
            Self::GoodsReceiptNote => write!(f, "GOODS_RECEIPT_NOTE"),
            Self::Invoice => write!(f, "INVOICE"),
            Self::Shipment => write!(f, "SHIPMENT"),
        }
    }
}

/// Single internal status representation.
///
/// The legacy `status` field kept by older record formats is produced only
/// through [`StatusProjection`] on write; nothing reads it back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnifiedStatus {
    Draft,
    Submitted,
    InReview,
    Approved,
    Rejected,
    OnHold,
    Cancelled,
    Dispatched,
    Delivered,
    Closed,
}

impl UnifiedStatus {
    /// Legacy status code written alongside the unified value during the
    /// dual-write migration window.
    pub fn legacy_code(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Submitted | Self::InReview => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::OnHold => "ON_HOLD",
            Self::Cancelled => "CANCELLED",
            Self::Dispatched => "SHIPPED",
            Self::Delivered => "DELIVERED",
            Self::Closed => "CLOSED",
        }
    }

    /// Statuses from which no further approval transition is possible.
    pub fn is_workflow_terminal(&self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Cancelled | Self::Dispatched | Self::Delivered | Self::Closed
        )
    }

    /// Statuses a resubmission may start from.
    pub fn allows_resubmit(&self) -> bool {
        matches!(self, Self::Rejected | Self::Draft | Self::OnHold)
    }

    pub fn project(&self) -> StatusProjection {
        StatusProjection {
            status: self.legacy_code().to_string(),
            unified_status: *self,
        }
    }
}

impl std::fmt::Display for UnifiedStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Dual-write projection of the internal status.
///
/// `status` is the legacy field and is write-only output; consumers must
/// branch on `unified_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusProjection {
    pub status: String,
    pub unified_status: UnifiedStatus,
}

/// Read-only view of an entity record as seen by the workflow engine.
///
/// Entity creation and deletion belong to the CRUD layer; the engine only
/// advances `current_stage` / `status` and appends audit rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub company_id: String,
    pub vendor_id: Option<String>,
    pub location_id: Option<String>,
    pub requested_by: Option<String>,
    pub requestor_email: Option<String>,
    pub owner_email: Option<String>,
    pub amount: f64,
    pub current_stage: Option<String>,
    pub status: UnifiedStatus,
    pub carrier_name: Option<String>,
    pub tracking_number: Option<String>,
    pub shipment_reference_number: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Dispatch fields written onto an order once a shipment exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchUpdate {
    pub carrier_name: Option<String>,
    pub tracking_number: Option<String>,
    pub shipment_reference_number: String,
    pub dispatch_status: UnifiedStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_projection_dual_write() {
        let p = UnifiedStatus::InReview.project();
        assert_eq!(p.status, "PENDING");
        assert_eq!(p.unified_status, UnifiedStatus::InReview);

        let p = UnifiedStatus::Dispatched.project();
        assert_eq!(p.status, "SHIPPED");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(UnifiedStatus::Approved.is_workflow_terminal());
        assert!(UnifiedStatus::Cancelled.is_workflow_terminal());
        assert!(!UnifiedStatus::Rejected.is_workflow_terminal());
        assert!(UnifiedStatus::Rejected.allows_resubmit());
        assert!(!UnifiedStatus::InReview.allows_resubmit());
    }

    #[test]
    fn test_entity_type_aliases() {
        assert_eq!(EntityType::from_str("PR"), Some(EntityType::Order));
        assert_eq!(EntityType::from_str("grn"), Some(EntityType::GoodsReceiptNote));
        assert_eq!(EntityType::from_str("unknown"), None);
    }
}
