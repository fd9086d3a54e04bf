//! In-memory store
//!
//! Backs the services when no PostgreSQL URL is configured and backs every
//! engine test. All traits share one [`MemoryStore`] guarded by per-table
//! `RwLock`s.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use procura_models::{
    CompanyNotificationConfig, CompanyScope, CompanyShipmentMode, CompanyShippingProvider,
    DispatchUpdate, EntitySnapshot, EntityType, NotificationLog, NotificationQueueEntry,
    QueueStatus, RecipientDescriptor, Role, Shipment, ShipmentServiceProvider, UnifiedStatus,
    VendorShippingRouting, WorkflowApprovalAudit, WorkflowConfiguration, WorkflowEventType,
    WorkflowNotificationMapping, WorkflowRejection,
};
use procura_utils::{ProcuraError, ProcuraResult};

use crate::stores::{
    AuditLedger, EntityStore, MappingStore, NotificationQueueStore, RecipientDirectory,
    ShippingStore, WorkflowConfigStore,
};

#[derive(Default)]
pub struct MemoryStore {
    workflow_configs: RwLock<Vec<WorkflowConfiguration>>,
    entities: RwLock<HashMap<(EntityType, String), EntitySnapshot>>,
    approvals: RwLock<Vec<WorkflowApprovalAudit>>,
    rejections: RwLock<Vec<WorkflowRejection>>,
    mappings: RwLock<Vec<WorkflowNotificationMapping>>,
    queue: RwLock<HashMap<Uuid, NotificationQueueEntry>>,
    logs: RwLock<Vec<NotificationLog>>,
    notification_configs: RwLock<HashMap<String, CompanyNotificationConfig>>,
    shipment_modes: RwLock<HashMap<String, CompanyShipmentMode>>,
    providers: RwLock<HashMap<String, ShipmentServiceProvider>>,
    company_providers: RwLock<HashMap<(String, String), CompanyShippingProvider>>,
    routings: RwLock<Vec<VendorShippingRouting>>,
    shipments: RwLock<HashMap<String, Shipment>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delivery logs written so far, oldest first. Test helper.
    pub async fn delivery_logs(&self) -> Vec<NotificationLog> {
        self.logs.read().await.clone()
    }
}

#[async_trait]
impl WorkflowConfigStore for MemoryStore {
    async fn find_active(
        &self,
        scope: &CompanyScope,
        entity_type: EntityType,
    ) -> ProcuraResult<Option<WorkflowConfiguration>> {
        let configs = self.workflow_configs.read().await;
        Ok(configs
            .iter()
            .find(|c| c.is_active && c.company_scope == *scope && c.entity_type == entity_type)
            .cloned())
    }

    async fn activate(&self, config: WorkflowConfiguration) -> ProcuraResult<()> {
        let mut configs = self.workflow_configs.write().await;
        for existing in configs.iter_mut() {
            if existing.company_scope == config.company_scope
                && existing.entity_type == config.entity_type
            {
                existing.is_active = false;
                existing.updated_at = Utc::now();
            }
        }
        configs.push(config);
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Option<EntitySnapshot>> {
        let entities = self.entities.read().await;
        Ok(entities.get(&(entity_type, entity_id.to_string())).cloned())
    }

    async fn put_snapshot(&self, snapshot: EntitySnapshot) -> ProcuraResult<()> {
        let mut entities = self.entities.write().await;
        entities.insert(
            (snapshot.entity_type, snapshot.entity_id.clone()),
            snapshot,
        );
        Ok(())
    }

    async fn apply_transition(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        expected_stage: Option<&str>,
        new_stage: Option<&str>,
        new_status: UnifiedStatus,
    ) -> ProcuraResult<bool> {
        let mut entities = self.entities.write().await;
        let snapshot = entities
            .get_mut(&(entity_type, entity_id.to_string()))
            .ok_or_else(|| {
                ProcuraError::not_found(format!("{entity_type} {entity_id} not found"))
            })?;
        if snapshot.current_stage.as_deref() != expected_stage {
            return Ok(false);
        }
        snapshot.current_stage = new_stage.map(|s| s.to_string());
        snapshot.status = new_status;
        snapshot.updated_at = Utc::now();
        Ok(true)
    }

    async fn record_dispatch(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        update: &DispatchUpdate,
    ) -> ProcuraResult<()> {
        let mut entities = self.entities.write().await;
        let snapshot = entities
            .get_mut(&(entity_type, entity_id.to_string()))
            .ok_or_else(|| {
                ProcuraError::not_found(format!("{entity_type} {entity_id} not found"))
            })?;
        snapshot.carrier_name = update.carrier_name.clone();
        snapshot.tracking_number = update.tracking_number.clone();
        snapshot.shipment_reference_number = Some(update.shipment_reference_number.clone());
        snapshot.status = update.dispatch_status;
        snapshot.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl AuditLedger for MemoryStore {
    async fn append_approval(&self, audit: WorkflowApprovalAudit) -> ProcuraResult<()> {
        self.approvals.write().await.push(audit);
        Ok(())
    }

    async fn append_rejection(&self, rejection: WorkflowRejection) -> ProcuraResult<()> {
        self.rejections.write().await.push(rejection);
        Ok(())
    }

    async fn latest_hash(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Option<String>> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .iter()
            .rev()
            .find(|a| a.entity_type == entity_type && a.entity_id == entity_id)
            .map(|a| a.hash.clone()))
    }

    async fn approvals_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Vec<WorkflowApprovalAudit>> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .iter()
            .filter(|a| a.entity_type == entity_type && a.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn rejections_for(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Vec<WorkflowRejection>> {
        let rejections = self.rejections.read().await;
        Ok(rejections
            .iter()
            .filter(|r| r.entity_type == entity_type && r.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn resolve_rejection(
        &self,
        rejection_id: Uuid,
        resolved_by: &str,
        resolution_action: &str,
    ) -> ProcuraResult<bool> {
        let mut rejections = self.rejections.write().await;
        let rejection = rejections
            .iter_mut()
            .find(|r| r.id == rejection_id)
            .ok_or_else(|| {
                ProcuraError::not_found(format!("rejection {rejection_id} not found"))
            })?;
        if rejection.is_resolved {
            return Ok(false);
        }
        rejection
            .resolve(resolved_by, resolution_action)
            .map_err(|e| ProcuraError::conflict(e.to_string()))?;
        Ok(true)
    }
}

#[async_trait]
impl MappingStore for MemoryStore {
    async fn find_mappings(
        &self,
        scope: &CompanyScope,
        entity_type: EntityType,
        event_type: WorkflowEventType,
        stage_key: Option<&str>,
    ) -> ProcuraResult<Vec<WorkflowNotificationMapping>> {
        let mappings = self.mappings.read().await;
        Ok(mappings
            .iter()
            .filter(|m| {
                m.is_active
                    && m.company_scope == *scope
                    && m.entity_scope.matches(entity_type)
                    && m.event_type == event_type
                    && m.stage_key.as_deref() == stage_key
            })
            .cloned()
            .collect())
    }

    async fn put_mapping(&self, mapping: WorkflowNotificationMapping) -> ProcuraResult<()> {
        let mut mappings = self.mappings.write().await;
        mappings.retain(|m| m.id != mapping.id);
        mappings.push(mapping);
        Ok(())
    }
}

#[async_trait]
impl NotificationQueueStore for MemoryStore {
    async fn enqueue(&self, entry: NotificationQueueEntry) -> ProcuraResult<Uuid> {
        let id = entry.queue_id;
        self.queue.write().await.insert(id, entry);
        Ok(id)
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> ProcuraResult<Vec<NotificationQueueEntry>> {
        let mut queue = self.queue.write().await;
        let mut due: Vec<(DateTime<Utc>, Uuid)> = queue
            .values()
            .filter(|e| e.is_claimable(now))
            .map(|e| (e.scheduled_for, e.queue_id))
            .collect();
        due.sort();

        let mut claimed = Vec::new();
        for (_, id) in due.into_iter().take(limit) {
            if let Some(entry) = queue.get_mut(&id) {
                entry.status = QueueStatus::Processing;
                entry.updated_at = now;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn mark_sent(&self, queue_id: Uuid) -> ProcuraResult<()> {
        let mut queue = self.queue.write().await;
        let entry = queue.get_mut(&queue_id).ok_or_else(|| {
            ProcuraError::not_found(format!("queue entry {queue_id} not found"))
        })?;
        entry.status = QueueStatus::Sent;
        entry.attempts += 1;
        entry.last_error = None;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn release_for_retry(
        &self,
        queue_id: Uuid,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> ProcuraResult<()> {
        let mut queue = self.queue.write().await;
        let entry = queue.get_mut(&queue_id).ok_or_else(|| {
            ProcuraError::not_found(format!("queue entry {queue_id} not found"))
        })?;
        entry.status = QueueStatus::Pending;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        entry.scheduled_for = retry_at;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, queue_id: Uuid, error: &str) -> ProcuraResult<()> {
        let mut queue = self.queue.write().await;
        let entry = queue.get_mut(&queue_id).ok_or_else(|| {
            ProcuraError::not_found(format!("queue entry {queue_id} not found"))
        })?;
        entry.status = QueueStatus::Failed;
        entry.attempts += 1;
        entry.last_error = Some(error.to_string());
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn append_log(&self, log: NotificationLog) -> ProcuraResult<()> {
        self.logs.write().await.push(log);
        Ok(())
    }

    async fn entry(&self, queue_id: Uuid) -> ProcuraResult<Option<NotificationQueueEntry>> {
        Ok(self.queue.read().await.get(&queue_id).cloned())
    }

    async fn counts_by_status(&self) -> ProcuraResult<Vec<(QueueStatus, i64)>> {
        let queue = self.queue.read().await;
        let mut counts: HashMap<QueueStatus, i64> = HashMap::new();
        for entry in queue.values() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        let mut result: Vec<(QueueStatus, i64)> = counts.into_iter().collect();
        result.sort_by_key(|(status, _)| status.to_string());
        Ok(result)
    }

    async fn notification_config(
        &self,
        company_id: &str,
    ) -> ProcuraResult<Option<CompanyNotificationConfig>> {
        Ok(self
            .notification_configs
            .read()
            .await
            .get(company_id)
            .cloned())
    }

    async fn put_notification_config(
        &self,
        config: CompanyNotificationConfig,
    ) -> ProcuraResult<()> {
        self.notification_configs
            .write()
            .await
            .insert(config.company_id.clone(), config);
        Ok(())
    }
}

#[async_trait]
impl ShippingStore for MemoryStore {
    async fn company_shipment_mode(
        &self,
        company_id: &str,
    ) -> ProcuraResult<CompanyShipmentMode> {
        let modes = self.shipment_modes.read().await;
        Ok(modes
            .get(company_id)
            .copied()
            .unwrap_or(CompanyShipmentMode::Manual))
    }

    async fn set_company_shipment_mode(
        &self,
        company_id: &str,
        mode: CompanyShipmentMode,
    ) -> ProcuraResult<()> {
        self.shipment_modes
            .write()
            .await
            .insert(company_id.to_string(), mode);
        Ok(())
    }

    async fn provider(
        &self,
        provider_id: &str,
    ) -> ProcuraResult<Option<ShipmentServiceProvider>> {
        Ok(self.providers.read().await.get(provider_id).cloned())
    }

    async fn active_providers(&self) -> ProcuraResult<Vec<ShipmentServiceProvider>> {
        let providers = self.providers.read().await;
        let mut active: Vec<ShipmentServiceProvider> =
            providers.values().filter(|p| p.is_active).cloned().collect();
        active.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(active)
    }

    async fn put_provider(&self, provider: ShipmentServiceProvider) -> ProcuraResult<()> {
        self.providers
            .write()
            .await
            .insert(provider.id.clone(), provider);
        Ok(())
    }

    async fn company_provider(
        &self,
        company_id: &str,
        provider_id: &str,
    ) -> ProcuraResult<Option<CompanyShippingProvider>> {
        let rows = self.company_providers.read().await;
        Ok(rows
            .get(&(company_id.to_string(), provider_id.to_string()))
            .cloned())
    }

    async fn enabled_company_providers(
        &self,
        company_id: &str,
    ) -> ProcuraResult<Vec<CompanyShippingProvider>> {
        let rows = self.company_providers.read().await;
        let mut enabled: Vec<CompanyShippingProvider> = rows
            .values()
            .filter(|r| r.company_id == company_id && r.is_enabled)
            .cloned()
            .collect();
        enabled.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(enabled)
    }

    async fn enable_company_provider(
        &self,
        company_id: &str,
        provider_id: &str,
    ) -> ProcuraResult<CompanyShippingProvider> {
        let mut rows = self.company_providers.write().await;
        let key = (company_id.to_string(), provider_id.to_string());
        let now = Utc::now();
        let row = rows
            .entry(key)
            .and_modify(|r| {
                r.is_enabled = true;
                r.updated_at = now;
            })
            .or_insert_with(|| CompanyShippingProvider {
                id: Uuid::new_v4().to_string(),
                company_id: company_id.to_string(),
                provider_id: provider_id.to_string(),
                is_enabled: true,
                is_default: false,
                credentials_ref: None,
                created_at: now,
                updated_at: now,
            });
        Ok(row.clone())
    }

    async fn active_routing(
        &self,
        vendor_id: &str,
        company_id: &str,
    ) -> ProcuraResult<Option<VendorShippingRouting>> {
        let routings = self.routings.read().await;
        Ok(routings
            .iter()
            .find(|r| r.is_active && r.vendor_id == vendor_id && r.company_id == company_id)
            .cloned())
    }

    async fn put_routing(&self, routing: VendorShippingRouting) -> ProcuraResult<()> {
        let mut routings = self.routings.write().await;
        routings.retain(|r| r.id != routing.id);
        routings.push(routing);
        Ok(())
    }

    async fn create_shipment(&self, shipment: Shipment) -> ProcuraResult<()> {
        self.shipments
            .write()
            .await
            .insert(shipment.id.clone(), shipment);
        Ok(())
    }

    async fn shipment(&self, shipment_id: &str) -> ProcuraResult<Option<Shipment>> {
        Ok(self.shipments.read().await.get(shipment_id).cloned())
    }

    async fn shipments_for_order(&self, order_id: &str) -> ProcuraResult<Vec<Shipment>> {
        let shipments = self.shipments.read().await;
        let mut matched: Vec<Shipment> = shipments
            .values()
            .filter(|s| s.order_id == order_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matched)
    }
}

/// In-memory user/vendor directory for tests and local development.
#[derive(Default)]
pub struct MemoryDirectory {
    users: RwLock<HashMap<String, (RecipientDescriptor, String)>>,
    vendors: RwLock<HashMap<String, RecipientDescriptor>>,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn add_user(
        &self,
        user_id: &str,
        company_id: &str,
        email: &str,
        name: &str,
        role: Role,
    ) {
        let descriptor = RecipientDescriptor {
            email: email.to_string(),
            name: Some(name.to_string()),
            role: Some(role),
            recipient_type: role.to_string(),
        };
        self.users
            .write()
            .await
            .insert(user_id.to_string(), (descriptor, company_id.to_string()));
    }

    pub async fn set_vendor_contact(&self, vendor_id: &str, email: &str, name: &str) {
        let descriptor = RecipientDescriptor {
            email: email.to_string(),
            name: Some(name.to_string()),
            role: Some(Role::Vendor),
            recipient_type: Role::Vendor.to_string(),
        };
        self.vendors
            .write()
            .await
            .insert(vendor_id.to_string(), descriptor);
    }
}

#[async_trait]
impl RecipientDirectory for MemoryDirectory {
    async fn users_with_role(
        &self,
        company_id: &str,
        role: Role,
    ) -> ProcuraResult<Vec<RecipientDescriptor>> {
        let users = self.users.read().await;
        let mut matched: Vec<RecipientDescriptor> = users
            .values()
            .filter(|(d, cid)| cid == company_id && d.role == Some(role))
            .map(|(d, _)| d.clone())
            .collect();
        matched.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(matched)
    }

    async fn user(&self, user_id: &str) -> ProcuraResult<Option<RecipientDescriptor>> {
        Ok(self.users.read().await.get(user_id).map(|(d, _)| d.clone()))
    }

    async fn vendor_contact(
        &self,
        vendor_id: &str,
    ) -> ProcuraResult<Option<RecipientDescriptor>> {
        Ok(self.vendors.read().await.get(vendor_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_models::NotificationChannel;

    fn entry(scheduled_for: DateTime<Utc>) -> NotificationQueueEntry {
        let now = Utc::now();
        NotificationQueueEntry {
            queue_id: Uuid::new_v4(),
            company_id: "CMP-001".to_string(),
            event_code: "ENTITY_APPROVED".to_string(),
            channel: NotificationChannel::Email,
            recipient_email: "dest@example.com".to_string(),
            recipient_type: "REQUESTOR".to_string(),
            subject: "Order approved".to_string(),
            body: "Your order was approved.".to_string(),
            status: QueueStatus::Pending,
            reason: None,
            scheduled_for,
            attempts: 0,
            max_attempts: 5,
            last_error: None,
            correlation_id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_claim_batch_takes_only_due_entries() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let due = entry(now - chrono::Duration::minutes(1));
        let future = entry(now + chrono::Duration::minutes(30));
        store.enqueue(due.clone()).await.unwrap();
        store.enqueue(future.clone()).await.unwrap();

        let claimed = store.claim_batch(10, now).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].queue_id, due.queue_id);
        assert_eq!(claimed[0].status, QueueStatus::Processing);

        // Second claim finds nothing: the entry left PENDING state.
        assert!(store.claim_batch(10, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retry_release_returns_entry_to_pending() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let queued = entry(now);
        let id = store.enqueue(queued).await.unwrap();

        store.claim_batch(1, now).await.unwrap();
        let retry_at = now + chrono::Duration::seconds(60);
        store
            .release_for_retry(id, "smtp timeout", retry_at)
            .await
            .unwrap();

        let stored = store.entry(id).await.unwrap().unwrap();
        assert_eq!(stored.status, QueueStatus::Pending);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.scheduled_for, retry_at);
        assert_eq!(stored.last_error.as_deref(), Some("smtp timeout"));
    }

    #[tokio::test]
    async fn test_enable_company_provider_is_idempotent() {
        let store = MemoryStore::new();

        let first = store
            .enable_company_provider("CMP-001", "prov-shipway")
            .await
            .unwrap();
        assert!(first.is_enabled);

        let second = store
            .enable_company_provider("CMP-001", "prov-shipway")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.enabled_company_providers("CMP-001").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_rejection_only_once() {
        let store = MemoryStore::new();
        let snapshot = EntitySnapshot {
            entity_type: EntityType::Order,
            entity_id: "ORD-1".to_string(),
            company_id: "CMP-001".to_string(),
            vendor_id: None,
            location_id: None,
            requested_by: None,
            requestor_email: None,
            owner_email: None,
            amount: 100.0,
            current_stage: Some("PENDING_SITE_ADMIN_APPROVAL".to_string()),
            status: UnifiedStatus::InReview,
            carrier_name: None,
            tracking_number: None,
            shipment_reference_number: None,
            updated_at: Utc::now(),
        };
        let rejection = WorkflowRejection::new(
            snapshot,
            procura_models::RejectionAction::SendBack,
            "INCOMPLETE".to_string(),
            "usr-9".to_string(),
            Role::SiteAdmin,
            None,
        );
        let id = rejection.id;
        store.append_rejection(rejection).await.unwrap();

        assert!(store.resolve_rejection(id, "usr-7", "RESUBMITTED").await.unwrap());
        assert!(!store.resolve_rejection(id, "usr-7", "RESUBMITTED").await.unwrap());
    }
}
