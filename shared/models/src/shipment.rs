//! Shipment provider routing model
//!
//! Provider catalog, per-company enablement, vendor routing bindings, and
//! the shipment record itself. The company shipment mode decides whether a
//! dispatch must go through an integrated carrier API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Company-level dispatch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompanyShipmentMode {
    Manual,
    Automatic,
}

/// How a single shipment record was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentMode {
    Manual,
    Api,
}

impl std::fmt::Display for ShipmentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "MANUAL"),
            Self::Api => write!(f, "API"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShipmentStatus {
    Created,
    InTransit,
    Delivered,
    Cancelled,
}

impl ShipmentStatus {
    pub fn legacy_code(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
            Self::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderCapability {
    CreateShipment,
    TrackShipment,
    CheckServiceability,
    CancelShipment,
}

/// Catalog entry for one carrier/aggregator integration.
///
/// `auth_config` is an opaque encrypted blob; only the credential vault
/// interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentServiceProvider {
    pub id: String,
    pub code: String,
    pub name: String,
    pub base_url: String,
    pub capabilities: Vec<ProviderCapability>,
    pub auth_config: String,
    pub is_active: bool,
}

/// Per-company enablement of a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyShippingProvider {
    pub id: String,
    pub company_id: String,
    pub provider_id: String,
    pub is_enabled: bool,
    pub is_default: bool,
    pub credentials_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-(vendor, company) binding naming the provider and courier codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorShippingRouting {
    pub id: String,
    pub vendor_id: String,
    pub company_id: String,
    pub provider_id: String,
    pub primary_courier_code: String,
    pub secondary_courier_code: Option<String>,
    pub is_active: bool,
}

/// One physical dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: String,
    pub company_id: String,
    pub order_id: String,
    pub vendor_id: String,
    pub shipment_mode: ShipmentMode,
    pub shipment_status: ShipmentStatus,
    pub carrier_name: Option<String>,
    pub tracking_number: Option<String>,
    pub courier_code: Option<String>,
    pub provider_id: Option<String>,
    pub company_shipping_provider_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Shipment {
    /// Shipment ids are `SHM-` plus an uppercase UUID-derived suffix.
    pub fn generate_id() -> String {
        let raw = Uuid::new_v4().simple().to_string().to_uppercase();
        format!("SHM-{}", &raw[..12])
    }

    pub fn status_projection(&self) -> (String, ShipmentStatus) {
        (self.shipment_status.legacy_code().to_string(), self.shipment_status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ItemDispatchQuantity {
    #[validate(length(min = 1, max = 50))]
    pub item_id: String,
    #[validate(range(min = 1))]
    pub quantity: i64,
}

/// Caller-supplied dispatch payload.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ShipmentData {
    #[validate(length(min = 1, max = 100))]
    pub shipper_name: String,
    pub dispatched_date: DateTime<Utc>,
    #[validate(length(min = 1, max = 50))]
    pub mode_of_transport: String,
    #[validate]
    pub item_dispatched_quantities: Vec<ItemDispatchQuantity>,
    pub shipment_mode: Option<ShipmentMode>,
    pub provider_id: Option<String>,
    pub company_shipping_provider_id: Option<String>,
    /// `None` means fallback is allowed on non-AUTOMATIC paths.
    pub allow_manual_fallback: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatchRequest {
    #[validate(length(min = 1, max = 50))]
    pub pr_id: String,
    #[validate(length(min = 1, max = 50))]
    pub vendor_id: String,
    #[validate]
    pub shipment_data: ShipmentData,
}

/// Successful dispatch response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub shipment_mode: ShipmentMode,
    pub shipment_id: String,
    pub carrier_name: Option<String>,
    pub tracking_number: Option<String>,
}
