//! # Procura Core Domain Models
//!
//! Domain model for the Procura procurement portal's workflow orchestration
//! engine: approval workflow configuration, the append-only audit ledger,
//! notification mappings and queue entries, and shipment provider routing.
//!
//! ## Key models
//!
//! - **WorkflowConfiguration**: versioned, per-company stage definitions
//! - **WorkflowApprovalAudit / WorkflowRejection**: append-only audit trail
//! - **WorkflowNotificationMapping / NotificationQueueEntry**: who gets
//!   notified per event, and the delivery lifecycle
//! - **ShipmentServiceProvider / CompanyShippingProvider /
//!   VendorShippingRouting**: carrier routing configuration
//!
//! All models serialize with serde; request-shaped types carry validator
//! rules. Status values exist once internally (`UnifiedStatus`) and are
//! dual-written into the legacy field only at the serialization boundary.

pub mod audit;
pub mod entity;
pub mod notification;
pub mod shipment;
pub mod workflow;

#[cfg(test)]
pub mod property_tests;

pub use audit::*;
pub use entity::*;
pub use notification::*;
pub use shipment::*;
pub use workflow::*;
