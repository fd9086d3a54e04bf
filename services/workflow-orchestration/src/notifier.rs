//! Notification mapping resolver
//!
//! Turns a workflow event into queue entries: four-tier mapping lookup that
//! stops at the first non-empty tier (company exact-stage, company all-stage,
//! global exact-stage, global all-stage), condition filtering within that
//! tier, pluggable recipient resolution de-duplicated by email, template
//! rendering, and quiet-hour aware scheduling. Delivery itself happens
//! elsewhere; this module only writes PENDING queue rows.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use procura_database::{MappingStore, NotificationQueueStore, RecipientDirectory};
use procura_models::{
    CompanyScope, DispatchInstruction, EntitySnapshot, NotificationQueueEntry, QueueStatus,
    RecipientDescriptor, RecipientResolver, Role, WorkflowConfiguration, WorkflowEventType,
    WorkflowNotificationMapping,
};
use procura_utils::config::NotificationConfig;
use procura_utils::ProcuraResult;

use crate::templates::TemplateCatalog;

/// Everything the resolver needs to know about one emitted event.
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub event_type: WorkflowEventType,
    pub snapshot: EntitySnapshot,
    /// Stage the action happened at, for exact-stage mapping tiers.
    pub stage_key: Option<String>,
    pub actor_id: String,
    pub actor_role: Role,
    pub action_label: String,
    pub reason: Option<String>,
    pub correlation_id: String,
}

pub struct Notifier {
    mappings: Arc<dyn MappingStore>,
    queue: Arc<dyn NotificationQueueStore>,
    directory: Arc<dyn RecipientDirectory>,
    templates: Arc<TemplateCatalog>,
    defaults: NotificationConfig,
}

impl Notifier {
    pub fn new(
        mappings: Arc<dyn MappingStore>,
        queue: Arc<dyn NotificationQueueStore>,
        directory: Arc<dyn RecipientDirectory>,
        templates: Arc<TemplateCatalog>,
        defaults: NotificationConfig,
    ) -> Self {
        Self {
            mappings,
            queue,
            directory,
            templates,
            defaults,
        }
    }

    /// Resolves mappings for `event` and enqueues one entry per
    /// (recipient, channel). Returns the number of entries written.
    pub async fn notify(
        &self,
        event: &WorkflowEvent,
        config: &WorkflowConfiguration,
    ) -> ProcuraResult<usize> {
        let instructions = self.resolve(event, config).await?;

        let mut enqueued = 0;
        for instruction in &instructions {
            for recipient in &instruction.recipients {
                let mut vars = instruction.variables.clone();
                vars.insert(
                    "recipient_name".to_string(),
                    recipient
                        .name
                        .clone()
                        .unwrap_or_else(|| recipient.email.clone()),
                );
                let rendered = self
                    .templates
                    .render(&instruction.template_key, &vars)
                    .map_err(procura_utils::ProcuraError::from)?;

                let entry = self
                    .build_entry(
                        event,
                        instruction.channel,
                        recipient,
                        rendered,
                        instruction.delay_minutes,
                    )
                    .await?;
                self.queue.enqueue(entry).await?;
                enqueued += 1;
            }
        }

        tracing::info!(
            event = %event.event_type,
            entity_id = %event.snapshot.entity_id,
            enqueued,
            "Notifications enqueued"
        );
        Ok(enqueued)
    }

    /// Resolves the event into ordered dispatch instructions, one per
    /// (mapping, channel) with recipients already resolved. Mappings whose
    /// recipient list ends up empty produce no instruction.
    pub async fn resolve(
        &self,
        event: &WorkflowEvent,
        config: &WorkflowConfiguration,
    ) -> ProcuraResult<Vec<DispatchInstruction>> {
        let applicable = self.resolve_mappings(event).await?;
        if applicable.is_empty() {
            tracing::debug!(
                event = %event.event_type,
                entity_id = %event.snapshot.entity_id,
                "No notification mappings matched"
            );
            return Ok(Vec::new());
        }

        let performer_email = match self.directory.user(&event.actor_id).await? {
            Some(descriptor) => Some(descriptor.email),
            None => None,
        };

        let variables = self.template_variables(event);
        let mut instructions = Vec::new();
        for mapping in &applicable {
            let mut recipients = self.resolve_recipients(mapping, event, config).await?;
            if mapping.exclude_action_performer {
                if let Some(performer) = &performer_email {
                    recipients.retain(|r| &r.email != performer);
                }
            }
            if recipients.is_empty() {
                continue;
            }

            for spec in &mapping.channels {
                instructions.push(DispatchInstruction {
                    channel: spec.channel,
                    template_key: spec.template_key.clone(),
                    recipients: recipients.clone(),
                    priority: spec.priority,
                    delay_minutes: spec.delay_minutes,
                    event_type: event.event_type,
                    company_id: event.snapshot.company_id.clone(),
                    variables: variables.clone(),
                    correlation_id: event.correlation_id.clone(),
                });
            }
        }
        Ok(instructions)
    }

    /// Four-tier lookup, stopping at the first non-empty tier. Conditions
    /// filter within the winning tier only: a tier whose every mapping fails
    /// its conditions still suppresses the tiers below it.
    async fn resolve_mappings(
        &self,
        event: &WorkflowEvent,
    ) -> ProcuraResult<Vec<WorkflowNotificationMapping>> {
        let entity_type = event.snapshot.entity_type;
        let company = CompanyScope::company(&event.snapshot.company_id);
        let stage_key = event.stage_key.as_deref();

        let mut tiers: Vec<(CompanyScope, Option<&str>)> = Vec::new();
        if stage_key.is_some() {
            tiers.push((company.clone(), stage_key));
        }
        tiers.push((company, None));
        if stage_key.is_some() {
            tiers.push((CompanyScope::Global, stage_key));
        }
        tiers.push((CompanyScope::Global, None));

        for (scope, stage) in tiers {
            let mut found = self
                .mappings
                .find_mappings(&scope, entity_type, event.event_type, stage)
                .await?;
            if found.is_empty() {
                continue;
            }
            found.retain(|m| m.conditions.matches(&event.snapshot, event.actor_role));
            found.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
            return Ok(found);
        }
        Ok(Vec::new())
    }

    /// Union of all resolver strategies, de-duplicated by email. The first
    /// resolver to produce an address owns its descriptor.
    async fn resolve_recipients(
        &self,
        mapping: &WorkflowNotificationMapping,
        event: &WorkflowEvent,
        config: &WorkflowConfiguration,
    ) -> ProcuraResult<Vec<RecipientDescriptor>> {
        let snapshot = &event.snapshot;
        let mut recipients: Vec<RecipientDescriptor> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        let mut push = |descriptor: RecipientDescriptor,
                        recipients: &mut Vec<RecipientDescriptor>,
                        seen: &mut std::collections::HashSet<String>| {
            if seen.insert(descriptor.email.to_lowercase()) {
                recipients.push(descriptor);
            }
        };

        for resolver in &mapping.recipient_resolvers {
            match resolver {
                RecipientResolver::Requestor => {
                    if let Some(descriptor) = self.requestor_descriptor(snapshot).await? {
                        push(descriptor, &mut recipients, &mut seen);
                    }
                }
                RecipientResolver::EntityOwner => {
                    if let Some(email) = &snapshot.owner_email {
                        push(
                            RecipientDescriptor {
                                email: email.clone(),
                                name: None,
                                role: None,
                                recipient_type: resolver.to_string(),
                            },
                            &mut recipients,
                            &mut seen,
                        );
                    }
                }
                RecipientResolver::CurrentStageRole
                | RecipientResolver::PreviousStageRole
                | RecipientResolver::NextStageRole => {
                    for role in stage_roles(config, snapshot, *resolver) {
                        for descriptor in self
                            .directory
                            .users_with_role(&snapshot.company_id, role)
                            .await?
                        {
                            push(descriptor, &mut recipients, &mut seen);
                        }
                    }
                }
                RecipientResolver::ActionPerformer => {
                    if let Some(descriptor) = self.directory.user(&event.actor_id).await? {
                        push(descriptor, &mut recipients, &mut seen);
                    }
                }
                RecipientResolver::CompanyAdmin => {
                    for descriptor in self
                        .directory
                        .users_with_role(&snapshot.company_id, Role::CompanyAdmin)
                        .await?
                    {
                        push(descriptor, &mut recipients, &mut seen);
                    }
                }
                RecipientResolver::LocationAdmin => {
                    for descriptor in self
                        .directory
                        .users_with_role(&snapshot.company_id, Role::LocationAdmin)
                        .await?
                    {
                        push(descriptor, &mut recipients, &mut seen);
                    }
                }
                RecipientResolver::FinanceAdmin => {
                    for descriptor in self
                        .directory
                        .users_with_role(&snapshot.company_id, Role::FinanceAdmin)
                        .await?
                    {
                        push(descriptor, &mut recipients, &mut seen);
                    }
                }
                RecipientResolver::Vendor => {
                    if let Some(vendor_id) = &snapshot.vendor_id {
                        if let Some(descriptor) =
                            self.directory.vendor_contact(vendor_id).await?
                        {
                            push(descriptor, &mut recipients, &mut seen);
                        }
                    }
                }
                RecipientResolver::Custom => {
                    for email in &mapping.custom_recipients {
                        push(
                            RecipientDescriptor::custom(email.clone()),
                            &mut recipients,
                            &mut seen,
                        );
                    }
                }
            }
        }

        Ok(recipients)
    }

    async fn requestor_descriptor(
        &self,
        snapshot: &EntitySnapshot,
    ) -> ProcuraResult<Option<RecipientDescriptor>> {
        if let Some(user_id) = &snapshot.requested_by {
            if let Some(descriptor) = self.directory.user(user_id).await? {
                return Ok(Some(descriptor));
            }
        }
        Ok(snapshot
            .requestor_email
            .as_ref()
            .map(|email| RecipientDescriptor {
                email: email.clone(),
                name: None,
                role: None,
                recipient_type: RecipientResolver::Requestor.to_string(),
            }))
    }

    async fn build_entry(
        &self,
        event: &WorkflowEvent,
        channel: procura_models::NotificationChannel,
        recipient: &RecipientDescriptor,
        rendered: crate::templates::RenderedNotification,
        delay_minutes: i64,
    ) -> ProcuraResult<NotificationQueueEntry> {
        let now = Utc::now();
        let mut scheduled_for = now + Duration::minutes(delay_minutes.max(0));
        let company_config = self
            .queue
            .notification_config(&event.snapshot.company_id)
            .await?;
        let max_attempts = company_config
            .as_ref()
            .map(|c| c.max_attempts)
            .unwrap_or(self.defaults.default_max_attempts);

        if let Some(config) = &company_config {
            if let Some(deferred) = config.quiet_hours.defer_until(scheduled_for) {
                tracing::info!(
                    company_id = %event.snapshot.company_id,
                    recipient = %recipient.email,
                    deferred_to = %deferred,
                    "Quiet hours active, deferring delivery"
                );
                scheduled_for = deferred;
            }
        }

        Ok(NotificationQueueEntry {
            queue_id: Uuid::new_v4(),
            company_id: event.snapshot.company_id.clone(),
            event_code: event.event_type.to_string(),
            channel,
            recipient_email: recipient.email.clone(),
            recipient_type: recipient.recipient_type.clone(),
            subject: rendered.subject,
            body: rendered.body,
            status: QueueStatus::Pending,
            reason: event.reason.clone(),
            scheduled_for,
            attempts: 0,
            max_attempts,
            last_error: None,
            correlation_id: event.correlation_id.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    fn template_variables(&self, event: &WorkflowEvent) -> HashMap<String, String> {
        let snapshot = &event.snapshot;
        HashMap::from([
            ("entity_type".to_string(), snapshot.entity_type.to_string()),
            ("entity_id".to_string(), snapshot.entity_id.clone()),
            ("company_id".to_string(), snapshot.company_id.clone()),
            ("amount".to_string(), format!("{:.2}", snapshot.amount)),
            (
                "stage".to_string(),
                event
                    .stage_key
                    .clone()
                    .or_else(|| snapshot.current_stage.clone())
                    .unwrap_or_else(|| "-".to_string()),
            ),
            ("status".to_string(), snapshot.status.to_string()),
            ("actor".to_string(), event.actor_id.clone()),
            ("action".to_string(), event.action_label.clone()),
            ("event".to_string(), event.event_type.to_string()),
            (
                "reason".to_string(),
                event.reason.clone().unwrap_or_else(|| "-".to_string()),
            ),
        ])
    }
}

/// Roles attached to the stage a positional resolver points at.
fn stage_roles(
    config: &WorkflowConfiguration,
    snapshot: &EntitySnapshot,
    resolver: RecipientResolver,
) -> Vec<Role> {
    let Some(current_key) = snapshot.current_stage.as_deref() else {
        return Vec::new();
    };
    let stage = match resolver {
        RecipientResolver::CurrentStageRole => config.stage(current_key),
        RecipientResolver::PreviousStageRole => config.previous_stage(current_key),
        RecipientResolver::NextStageRole => config
            .stage(current_key)
            .and_then(|s| s.next_stage.as_deref())
            .and_then(|next| config.stage(next)),
        _ => None,
    };
    stage.map(|s| s.allowed_roles.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use procura_database::MemoryStore;
    use procura_database::memory::MemoryDirectory;
    use procura_models::{
        ChannelSpec, EntityScope, EntityType, MappingConditions, NotificationChannel,
        QuietHours, UnifiedStatus, WorkflowStage,
    };

    fn test_config() -> WorkflowConfiguration {
        WorkflowConfiguration::new(
            CompanyScope::company("CMP-001"),
            EntityType::Order,
            1,
            vec![
                WorkflowStage {
                    stage_key: "STAGE_ONE".to_string(),
                    allowed_roles: vec![Role::SiteAdmin],
                    skippable: false,
                    auto_approvable: false,
                    next_stage: Some("STAGE_TWO".to_string()),
                },
                WorkflowStage {
                    stage_key: "STAGE_TWO".to_string(),
                    allowed_roles: vec![Role::FinanceAdmin],
                    skippable: false,
                    auto_approvable: false,
                    next_stage: None,
                },
            ],
        )
    }

    fn snapshot() -> EntitySnapshot {
        EntitySnapshot {
            entity_type: EntityType::Order,
            entity_id: "ORD-1001".to_string(),
            company_id: "CMP-001".to_string(),
            vendor_id: Some("VND-01".to_string()),
            location_id: None,
            requested_by: Some("usr-req".to_string()),
            requestor_email: Some("req@example.com".to_string()),
            owner_email: None,
            amount: 1500.0,
            current_stage: Some("STAGE_TWO".to_string()),
            status: UnifiedStatus::InReview,
            carrier_name: None,
            tracking_number: None,
            shipment_reference_number: None,
            updated_at: Utc::now(),
        }
    }

    fn mapping(
        scope: CompanyScope,
        resolvers: Vec<RecipientResolver>,
        exclude_performer: bool,
    ) -> WorkflowNotificationMapping {
        WorkflowNotificationMapping {
            id: Uuid::new_v4(),
            company_scope: scope,
            entity_scope: EntityScope::All,
            event_type: WorkflowEventType::EntityApprovedAtStage,
            stage_key: None,
            recipient_resolvers: resolvers,
            custom_recipients: vec![],
            exclude_action_performer: exclude_performer,
            channels: vec![ChannelSpec {
                channel: NotificationChannel::Email,
                template_key: "approval_request".to_string(),
                priority: 1,
                delay_minutes: 0,
            }],
            conditions: MappingConditions::default(),
            is_active: true,
            priority: 1,
        }
    }

    fn event() -> WorkflowEvent {
        WorkflowEvent {
            event_type: WorkflowEventType::EntityApprovedAtStage,
            snapshot: snapshot(),
            stage_key: Some("STAGE_ONE".to_string()),
            actor_id: "usr-site".to_string(),
            actor_role: Role::SiteAdmin,
            action_label: "APPROVE".to_string(),
            reason: None,
            correlation_id: "corr-1".to_string(),
        }
    }

    async fn notifier(store: Arc<MemoryStore>, directory: Arc<MemoryDirectory>) -> Notifier {
        Notifier::new(
            store.clone(),
            store,
            directory,
            Arc::new(TemplateCatalog::new()),
            NotificationConfig {
                default_max_attempts: 5,
                backoff_base_seconds: 60,
                dispatch_interval_seconds: 15,
                dispatch_batch_size: 50,
            },
        )
    }

    #[tokio::test]
    async fn test_company_mappings_shadow_global() {
        let store = MemoryStore::new();
        let directory = MemoryDirectory::new();
        directory
            .add_user("usr-fin", "CMP-001", "fin@example.com", "Fin", Role::FinanceAdmin)
            .await;

        // Global mapping targets the requestor; company mapping targets the
        // finance admin. Only the company one may fire.
        store
            .put_mapping(mapping(
                CompanyScope::Global,
                vec![RecipientResolver::Requestor],
                false,
            ))
            .await
            .unwrap();
        store
            .put_mapping(mapping(
                CompanyScope::company("CMP-001"),
                vec![RecipientResolver::CurrentStageRole],
                false,
            ))
            .await
            .unwrap();

        let n = notifier(store.clone(), directory).await;
        let enqueued = n.notify(&event(), &test_config()).await.unwrap();
        assert_eq!(enqueued, 1);

        let claimed = store.claim_batch(10, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].recipient_email, "fin@example.com");
    }

    #[tokio::test]
    async fn test_shadowing_holds_even_when_conditions_filter_company_out() {
        let store = MemoryStore::new();
        let directory = MemoryDirectory::new();

        store
            .put_mapping(mapping(
                CompanyScope::Global,
                vec![RecipientResolver::Requestor],
                false,
            ))
            .await
            .unwrap();
        let mut company = mapping(
            CompanyScope::company("CMP-001"),
            vec![RecipientResolver::Requestor],
            false,
        );
        company.conditions.min_amount = Some(1_000_000.0);
        store.put_mapping(company).await.unwrap();

        let n = notifier(store.clone(), directory).await;
        // The company mapping fails its amount condition, but its existence
        // still shadows the global tier: nothing is enqueued.
        let enqueued = n.notify(&event(), &test_config()).await.unwrap();
        assert_eq!(enqueued, 0);
    }

    #[tokio::test]
    async fn test_exact_stage_tier_shadows_all_stage_tier() {
        let store = MemoryStore::new();
        let directory = MemoryDirectory::new();

        let mut exact = mapping(
            CompanyScope::company("CMP-001"),
            vec![RecipientResolver::Requestor],
            false,
        );
        exact.stage_key = Some("STAGE_ONE".to_string());
        store.put_mapping(exact).await.unwrap();
        store
            .put_mapping(mapping(
                CompanyScope::company("CMP-001"),
                vec![RecipientResolver::EntityOwner],
                false,
            ))
            .await
            .unwrap();

        let n = notifier(store.clone(), directory).await;
        let mut e = event();
        e.snapshot.owner_email = Some("owner@example.com".to_string());

        // The exact-stage tier is non-empty, so the all-stage company
        // mapping never fires.
        let enqueued = n.notify(&e, &test_config()).await.unwrap();
        assert_eq!(enqueued, 1);

        let claimed = store.claim_batch(10, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].recipient_email, "req@example.com");
    }

    #[tokio::test]
    async fn test_recipients_deduplicated_and_performer_excluded() {
        let store = MemoryStore::new();
        let directory = MemoryDirectory::new();
        directory
            .add_user("usr-req", "CMP-001", "req@example.com", "Req", Role::Employee)
            .await;
        directory
            .add_user("usr-site", "CMP-001", "site@example.com", "Site", Role::SiteAdmin)
            .await;

        // Requestor resolves twice (directory + snapshot email) and the
        // performer appears via PreviousStageRole; exclusion drops them.
        let mut m = mapping(
            CompanyScope::company("CMP-001"),
            vec![
                RecipientResolver::Requestor,
                RecipientResolver::Requestor,
                RecipientResolver::PreviousStageRole,
            ],
            true,
        );
        m.custom_recipients = vec![];
        store.put_mapping(m).await.unwrap();

        let n = notifier(store.clone(), directory).await;
        let enqueued = n.notify(&event(), &test_config()).await.unwrap();
        assert_eq!(enqueued, 1);

        let claimed = store.claim_batch(10, Utc::now()).await.unwrap();
        assert_eq!(claimed[0].recipient_email, "req@example.com");
    }

    #[tokio::test]
    async fn test_quiet_hours_defer_but_never_drop() {
        let store = MemoryStore::new();
        let directory = MemoryDirectory::new();

        store
            .put_mapping(mapping(
                CompanyScope::company("CMP-001"),
                vec![RecipientResolver::Requestor],
                false,
            ))
            .await
            .unwrap();
        store
            .put_notification_config(procura_models::CompanyNotificationConfig {
                company_id: "CMP-001".to_string(),
                quiet_hours: QuietHours {
                    enabled: true,
                    start_minute: 0,
                    end_minute: 24 * 60 - 1,
                    utc_offset_minutes: 0,
                },
                max_attempts: 3,
            })
            .await
            .unwrap();

        let n = notifier(store.clone(), directory).await;
        let enqueued = n.notify(&event(), &test_config()).await.unwrap();
        assert_eq!(enqueued, 1);

        // Entry exists but is scheduled for the window end, so it is not
        // claimable now.
        assert!(store.claim_batch(10, Utc::now()).await.unwrap().is_empty());
        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts, vec![(QueueStatus::Pending, 1)]);
    }

    #[tokio::test]
    async fn test_condition_filtering_by_role_and_amount() {
        let store = MemoryStore::new();
        let directory = MemoryDirectory::new();

        let mut m = mapping(
            CompanyScope::company("CMP-001"),
            vec![RecipientResolver::Requestor],
            false,
        );
        m.conditions = MappingConditions {
            min_amount: Some(1000.0),
            entity_statuses: vec![UnifiedStatus::InReview],
            roles: vec![Role::SiteAdmin],
        };
        store.put_mapping(m).await.unwrap();

        let n = notifier(store.clone(), directory).await;
        assert_eq!(n.notify(&event(), &test_config()).await.unwrap(), 1);

        let mut vendor_event = event();
        vendor_event.actor_role = Role::Vendor;
        assert_eq!(n.notify(&vendor_event, &test_config()).await.unwrap(), 0);
    }
}
