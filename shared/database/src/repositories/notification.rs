//! Notification repositories
//!
//! Mapping rules plus the delivery queue. Queue claiming uses
//! FOR UPDATE SKIP LOCKED so concurrent dispatcher workers never share an
//! entry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use procura_models::{
    CompanyNotificationConfig, CompanyScope, EntityScope, EntityType, NotificationChannel,
    NotificationLog, NotificationQueueEntry, QueueStatus, QuietHours, WorkflowEventType,
    WorkflowNotificationMapping,
};
use procura_utils::{ProcuraError, ProcuraResult};

use super::{db_err, parse_enum};
use crate::stores::{MappingStore, NotificationQueueStore};

pub struct PgMappingStore {
    pool: PgPool,
}

impl PgMappingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn find_mappings(
        &self,
        scope: &CompanyScope,
        entity_type: EntityType,
        event_type: WorkflowEventType,
        stage_key: Option<&str>,
    ) -> ProcuraResult<Vec<WorkflowNotificationMapping>> {
        let scope_str: String = scope.clone().into();

        let rows: Vec<MappingRow> = sqlx::query_as(
            r#"
            SELECT id, company_scope, entity_scope, event_type, stage_key,
                   recipient_resolvers, custom_recipients, exclude_action_performer,
                   channels, conditions, is_active, priority
            FROM workflow_notification_mappings
            WHERE is_active = TRUE
              AND company_scope = $1
              AND (entity_scope = '*' OR entity_scope = $2)
              AND event_type = $3
              AND stage_key IS NOT DISTINCT FROM $4
            ORDER BY priority DESC
            "#,
        )
        .bind(&scope_str)
        .bind(entity_type.to_string())
        .bind(event_type.to_string())
        .bind(stage_key)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("fetch notification mappings", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn put_mapping(&self, mapping: WorkflowNotificationMapping) -> ProcuraResult<()> {
        let scope_str: String = mapping.company_scope.clone().into();
        let entity_scope_str: String = mapping.entity_scope.into();
        let resolvers = serde_json::to_value(&mapping.recipient_resolvers)
            .map_err(|e| ProcuraError::internal(e.to_string()))?;
        let custom = serde_json::to_value(&mapping.custom_recipients)
            .map_err(|e| ProcuraError::internal(e.to_string()))?;
        let channels = serde_json::to_value(&mapping.channels)
            .map_err(|e| ProcuraError::internal(e.to_string()))?;
        let conditions = serde_json::to_value(&mapping.conditions)
            .map_err(|e| ProcuraError::internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_notification_mappings
                (id, company_scope, entity_scope, event_type, stage_key,
                 recipient_resolvers, custom_recipients, exclude_action_performer,
                 channels, conditions, is_active, priority)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                company_scope = EXCLUDED.company_scope,
                entity_scope = EXCLUDED.entity_scope,
                event_type = EXCLUDED.event_type,
                stage_key = EXCLUDED.stage_key,
                recipient_resolvers = EXCLUDED.recipient_resolvers,
                custom_recipients = EXCLUDED.custom_recipients,
                exclude_action_performer = EXCLUDED.exclude_action_performer,
                channels = EXCLUDED.channels,
                conditions = EXCLUDED.conditions,
                is_active = EXCLUDED.is_active,
                priority = EXCLUDED.priority
            "#,
        )
        .bind(mapping.id)
        .bind(&scope_str)
        .bind(&entity_scope_str)
        .bind(mapping.event_type.to_string())
        .bind(&mapping.stage_key)
        .bind(&resolvers)
        .bind(&custom)
        .bind(mapping.exclude_action_performer)
        .bind(&channels)
        .bind(&conditions)
        .bind(mapping.is_active)
        .bind(mapping.priority)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("upsert notification mapping", e))?;
        Ok(())
    }
}

pub struct PgNotificationQueueStore {
    pool: PgPool,
}

impl PgNotificationQueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationQueueStore for PgNotificationQueueStore {
    async fn enqueue(&self, entry: NotificationQueueEntry) -> ProcuraResult<Uuid> {
        sqlx::query(
            r#"
            INSERT INTO notification_queue
                (queue_id, company_id, event_code, channel, recipient_email,
                 recipient_type, subject, body, status, reason, scheduled_for,
                 attempts, max_attempts, last_error, correlation_id,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                    $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(entry.queue_id)
        .bind(&entry.company_id)
        .bind(&entry.event_code)
        .bind(entry.channel.to_string())
        .bind(&entry.recipient_email)
        .bind(&entry.recipient_type)
        .bind(&entry.subject)
        .bind(&entry.body)
        .bind(entry.status.to_string())
        .bind(&entry.reason)
        .bind(entry.scheduled_for)
        .bind(entry.attempts)
        .bind(entry.max_attempts)
        .bind(&entry.last_error)
        .bind(&entry.correlation_id)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("enqueue notification", e))?;
        Ok(entry.queue_id)
    }

    async fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> ProcuraResult<Vec<NotificationQueueEntry>> {
        let rows: Vec<QueueRow> = sqlx::query_as(
            r#"
            UPDATE notification_queue
            SET status = 'PROCESSING', updated_at = $2
            WHERE queue_id IN (
                SELECT queue_id FROM notification_queue
                WHERE status = 'PENDING' AND scheduled_for <= $2
                ORDER BY scheduled_for ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING queue_id, company_id, event_code, channel, recipient_email,
                      recipient_type, subject, body, status, reason, scheduled_for,
                      attempts, max_attempts, last_error, correlation_id,
                      created_at, updated_at
            "#,
        )
        .bind(limit as i64)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("claim notification batch", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn mark_sent(&self, queue_id: Uuid) -> ProcuraResult<()> {
        sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'SENT', attempts = attempts + 1,
                last_error = NULL, updated_at = NOW()
            WHERE queue_id = $1
            "#,
        )
        .bind(queue_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("mark notification sent", e))?;
        Ok(())
    }

    async fn release_for_retry(
        &self,
        queue_id: Uuid,
        error: &str,
        retry_at: DateTime<Utc>,
    ) -> ProcuraResult<()> {
        sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'PENDING', attempts = attempts + 1,
                last_error = $2, scheduled_for = $3, updated_at = NOW()
            WHERE queue_id = $1
            "#,
        )
        .bind(queue_id)
        .bind(error)
        .bind(retry_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("release notification for retry", e))?;
        Ok(())
    }

    async fn mark_failed(&self, queue_id: Uuid, error: &str) -> ProcuraResult<()> {
        sqlx::query(
            r#"
            UPDATE notification_queue
            SET status = 'FAILED', attempts = attempts + 1,
                last_error = $2, updated_at = NOW()
            WHERE queue_id = $1
            "#,
        )
        .bind(queue_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("mark notification failed", e))?;
        Ok(())
    }

    async fn append_log(&self, log: NotificationLog) -> ProcuraResult<()> {
        let outcome = serde_json::to_string(&log.outcome)
            .map_err(|e| ProcuraError::internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO notification_logs
                (id, queue_id, company_id, recipient_email, outcome, detail, logged_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(log.queue_id)
        .bind(&log.company_id)
        .bind(&log.recipient_email)
        .bind(outcome.trim_matches('"'))
        .bind(&log.detail)
        .bind(log.logged_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("append notification log", e))?;
        Ok(())
    }

    async fn entry(&self, queue_id: Uuid) -> ProcuraResult<Option<NotificationQueueEntry>> {
        let row: Option<QueueRow> = sqlx::query_as(
            r#"
            SELECT queue_id, company_id, event_code, channel, recipient_email,
                   recipient_type, subject, body, status, reason, scheduled_for,
                   attempts, max_attempts, last_error, correlation_id,
                   created_at, updated_at
            FROM notification_queue
            WHERE queue_id = $1
            "#,
        )
        .bind(queue_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch queue entry", e))?;

        Ok(row.map(|r| r.into()))
    }

    async fn counts_by_status(&self) -> ProcuraResult<Vec<(QueueStatus, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM notification_queue GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("count queue entries", e))?;

        Ok(rows
            .into_iter()
            .map(|(status, count)| (parse_enum(&status, QueueStatus::Pending), count))
            .collect())
    }

    async fn notification_config(
        &self,
        company_id: &str,
    ) -> ProcuraResult<Option<CompanyNotificationConfig>> {
        let row: Option<(String, serde_json::Value, i32)> = sqlx::query_as(
            r#"
            SELECT company_id, quiet_hours, max_attempts
            FROM company_notification_configs
            WHERE company_id = $1
            "#,
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch company notification config", e))?;

        Ok(row.map(|(company_id, quiet_hours, max_attempts)| CompanyNotificationConfig {
            company_id,
            quiet_hours: serde_json::from_value(quiet_hours)
                .unwrap_or_else(|_| QuietHours::disabled()),
            max_attempts,
        }))
    }

    async fn put_notification_config(
        &self,
        config: CompanyNotificationConfig,
    ) -> ProcuraResult<()> {
        let quiet_hours = serde_json::to_value(config.quiet_hours)
            .map_err(|e| ProcuraError::internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO company_notification_configs (company_id, quiet_hours, max_attempts)
            VALUES ($1, $2, $3)
            ON CONFLICT (company_id) DO UPDATE SET
                quiet_hours = EXCLUDED.quiet_hours,
                max_attempts = EXCLUDED.max_attempts
            "#,
        )
        .bind(&config.company_id)
        .bind(&quiet_hours)
        .bind(config.max_attempts)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("upsert company notification config", e))?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct MappingRow {
    id: Uuid,
    company_scope: String,
    entity_scope: String,
    event_type: String,
    stage_key: Option<String>,
    recipient_resolvers: serde_json::Value,
    custom_recipients: serde_json::Value,
    exclude_action_performer: bool,
    channels: serde_json::Value,
    conditions: serde_json::Value,
    is_active: bool,
    priority: i32,
}

impl From<MappingRow> for WorkflowNotificationMapping {
    fn from(row: MappingRow) -> Self {
        Self {
            id: row.id,
            company_scope: CompanyScope::try_from(row.company_scope)
                .unwrap_or(CompanyScope::Global),
            entity_scope: EntityScope::try_from(row.entity_scope).unwrap_or(EntityScope::All),
            event_type: parse_enum(&row.event_type, WorkflowEventType::EntityApproved),
            stage_key: row.stage_key,
            recipient_resolvers: serde_json::from_value(row.recipient_resolvers)
                .unwrap_or_default(),
            custom_recipients: serde_json::from_value(row.custom_recipients).unwrap_or_default(),
            exclude_action_performer: row.exclude_action_performer,
            channels: serde_json::from_value(row.channels).unwrap_or_default(),
            conditions: serde_json::from_value(row.conditions).unwrap_or_default(),
            is_active: row.is_active,
            priority: row.priority,
        }
    }
}

#[derive(Debug, FromRow)]
struct QueueRow {
    queue_id: Uuid,
    company_id: String,
    event_code: String,
    channel: String,
    recipient_email: String,
    recipient_type: String,
    subject: String,
    body: String,
    status: String,
    reason: Option<String>,
    scheduled_for: DateTime<Utc>,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    correlation_id: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QueueRow> for NotificationQueueEntry {
    fn from(row: QueueRow) -> Self {
        Self {
            queue_id: row.queue_id,
            company_id: row.company_id,
            event_code: row.event_code,
            channel: parse_enum(&row.channel, NotificationChannel::Email),
            recipient_email: row.recipient_email,
            recipient_type: row.recipient_type,
            subject: row.subject,
            body: row.body,
            status: parse_enum(&row.status, QueueStatus::Pending),
            reason: row.reason,
            scheduled_for: row.scheduled_for,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            correlation_id: row.correlation_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
