//! Storage traits
//!
//! Seams between the orchestration engines and persistence. Each trait has
//! an in-memory implementation ([`crate::memory::MemoryStore`]) and a
//! PostgreSQL implementation under [`crate::repositories`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use procura_models::{
    CompanyNotificationConfig, CompanyScope, CompanyShipmentMode, CompanyShippingProvider,
    DispatchUpdate, EntitySnapshot, EntityType, NotificationLog, NotificationQueueEntry,
    QueueStatus, RecipientDescriptor, Role, Shipment, ShipmentServiceProvider, UnifiedStatus,
    VendorShippingRouting, WorkflowApprovalAudit, WorkflowConfiguration,
    WorkflowEventType, WorkflowNotificationMapping, WorkflowRejection,
};
use procura_utils::ProcuraResult;

/// Versioned workflow configurations, one active per (scope, entity type).
#[async_trait]
pub trait WorkflowConfigStore: Send + Sync {
    /// Active configuration for the exact scope; callers handle the `*`
    /// global fallback.
    async fn find_active(
        &self,
        scope: &CompanyScope,
        entity_type: EntityType,
    ) -> ProcuraResult<Option<WorkflowConfiguration>>;

    /// Activates `config`, deactivating any prior active version in scope.
    async fn activate(&self, config: WorkflowConfiguration) -> ProcuraResult<()>;
}

/// Read/update access to entity records owned by the CRUD layer.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Option<EntitySnapshot>>;

    async fn put_snapshot(&self, snapshot: EntitySnapshot) -> ProcuraResult<()>;

    /// Compare-and-set stage/status update. Returns `false` when the stored
    /// stage no longer matches `expected_stage` (a concurrent writer won).
    async fn apply_transition(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        expected_stage: Option<&str>,
        new_stage: Option<&str>,
        new_status: UnifiedStatus,
    ) -> ProcuraResult<bool>;

    /// Writes dispatch fields onto an order after shipment creation.
    async fn record_dispatch(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        update: &DispatchUpdate,
    ) -> ProcuraResult<()>;
}

/// Append-only audit trail. Approval rows are never updated or deleted;
/// rejection rows permit only the unresolved → resolved change.
#[async_trait]
pub trait AuditLedger: Send + Sync {
    async fn append_approval(&self, audit: WorkflowApprovalAudit) -> ProcuraResult<()>;
    async fn append_rejection(&self, rejection: WorkflowRejection) -> ProcuraResult<()>;

    /// Hash of the latest approval row for the entity, for chain linking.
    async fn latest_hash(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Option<String>>;

    async fn approvals_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Vec<WorkflowApprovalAudit>>;

    async fn rejections_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Vec<WorkflowRejection>>;

    /// Marks a rejection resolved; returns `false` when it already was.
    async fn resolve_rejection(
        &self,
        rejection_id: Uuid,
        resolved_by: &str,
        resolution_action: &str,
    ) -> ProcuraResult<bool>;
}

/// Notification mapping rules.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Active mappings for one tier: `stage_key = Some(..)` selects
    /// exact-stage mappings, `None` selects all-stage mappings.
    async fn find_mappings(
        &self,
        scope: &CompanyScope,
        entity_type: EntityType,
        event_type: WorkflowEventType,
        stage_key: Option<&str>,
    ) -> ProcuraResult<Vec<WorkflowNotificationMapping>>;

    async fn put_mapping(&self, mapping: WorkflowNotificationMapping) -> ProcuraResult<()>;
}

/// Delivery queue plus write-once logs and per-company settings.
#[async_trait]
pub trait NotificationQueueStore: Send + Sync {
    async fn enqueue(&self, entry: NotificationQueueEntry) -> ProcuraResult<Uuid>;

    /// Atomically claims up to `limit` due PENDING entries, transitioning
    /// them to PROCESSING so concurrent dispatchers never share an entry.
    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> ProcuraResult<Vec<NotificationQueueEntry>>;

    async fn mark_sent(&self, queue_id: Uuid) -> ProcuraResult<()>;

    /// Returns the entry to PENDING with `attempts + 1`, due at `retry_at`.
    async fn release_for_retry(
        &self,
        queue_id: Uuid,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> ProcuraResult<()>;

    async fn mark_failed(&self, queue_id: Uuid, error: &str) -> ProcuraResult<()>;

    async fn append_log(&self, log: NotificationLog) -> ProcuraResult<()>;

    async fn entry(&self, queue_id: Uuid) -> ProcuraResult<Option<NotificationQueueEntry>>;

    async fn counts_by_status(&self) -> ProcuraResult<Vec<(QueueStatus, i64)>>;

    async fn notification_config(
        &self,
        company_id: &str,
    ) -> ProcuraResult<Option<CompanyNotificationConfig>>;

    async fn put_notification_config(
        &self,
        config: CompanyNotificationConfig,
    ) -> ProcuraResult<()>;
}

/// Provider catalog, enablement, routing, and shipment records.
#[async_trait]
pub trait ShippingStore: Send + Sync {
    async fn company_shipment_mode(&self, company_id: &str)
        -> ProcuraResult<CompanyShipmentMode>;

    async fn set_company_shipment_mode(
        &self,
        company_id: &str,
        mode: CompanyShipmentMode,
    ) -> ProcuraResult<()>;

    async fn provider(&self, provider_id: &str)
        -> ProcuraResult<Option<ShipmentServiceProvider>>;

    /// Active catalog entries, for startup carrier-client registration.
    async fn active_providers(&self) -> ProcuraResult<Vec<ShipmentServiceProvider>>;

    async fn put_provider(&self, provider: ShipmentServiceProvider) -> ProcuraResult<()>;

    async fn company_provider(
        &self,
        company_id: &str,
        provider_id: &str,
    ) -> ProcuraResult<Option<CompanyShippingProvider>>;

    async fn enabled_company_providers(
        &self,
        company_id: &str,
    ) -> ProcuraResult<Vec<CompanyShippingProvider>>;

    /// Idempotent enable-upsert used by pre-check auto-repair: creates the
    /// row with `is_enabled = true` or re-enables an existing one. Never
    /// produces a second row for the same (company, provider).
    async fn enable_company_provider(
        &self,
        company_id: &str,
        provider_id: &str,
    ) -> ProcuraResult<CompanyShippingProvider>;

    async fn active_routing(
        &self,
        vendor_id: &str,
        company_id: &str,
    ) -> ProcuraResult<Option<VendorShippingRouting>>;

    async fn put_routing(&self, routing: VendorShippingRouting) -> ProcuraResult<()>;

    async fn create_shipment(&self, shipment: Shipment) -> ProcuraResult<()>;

    async fn shipment(&self, shipment_id: &str) -> ProcuraResult<Option<Shipment>>;

    async fn shipments_for_order(&self, order_id: &str) -> ProcuraResult<Vec<Shipment>>;
}

/// External auth-context collaborator resolving people, not persistence the
/// engine owns.
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn users_with_role(
        &self,
        company_id: &str,
        role: Role,
    ) -> ProcuraResult<Vec<RecipientDescriptor>>;

    async fn user(&self, user_id: &str) -> ProcuraResult<Option<RecipientDescriptor>>;

    async fn vendor_contact(&self, vendor_id: &str)
        -> ProcuraResult<Option<RecipientDescriptor>>;
}
