//! Notification mapping and queue model
//!
//! Mappings decide who gets notified per workflow event; queue entries carry
//! rendered messages through the PENDING → PROCESSING → SENT/FAILED
//! lifecycle. Quiet hours defer delivery, never suppress it.

use std::collections::HashMap;

use chrono::{DateTime, Days, Duration, FixedOffset, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{EntitySnapshot, UnifiedStatus};
use crate::workflow::{CompanyScope, EntityScope, Role, WorkflowEventType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationChannel {
    Email,
    InApp,
    Whatsapp,
    Sms,
    Push,
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Pluggable recipient resolution strategies a mapping may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecipientResolver {
    Requestor,
    EntityOwner,
    CurrentStageRole,
    PreviousStageRole,
    NextStageRole,
    ActionPerformer,
    CompanyAdmin,
    LocationAdmin,
    FinanceAdmin,
    Vendor,
    Custom,
}

impl std::fmt::Display for RecipientResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// One delivery target. De-duplication is by email; the first-resolved
/// descriptor for an address is canonical.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipientDescriptor {
    pub email: String,
    pub name: Option<String>,
    pub role: Option<Role>,
    /// Resolver tag (or CUSTOM) this recipient came from.
    pub recipient_type: String,
}

impl RecipientDescriptor {
    pub fn custom(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
            role: None,
            recipient_type: RecipientResolver::Custom.to_string(),
        }
    }
}

/// Channel-specific delivery directive inside a mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSpec {
    pub channel: NotificationChannel,
    pub template_key: String,
    pub priority: i32,
    pub delay_minutes: i64,
}

/// Optional conditions gating a mapping against the entity snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MappingConditions {
    pub min_amount: Option<f64>,
    pub entity_statuses: Vec<UnifiedStatus>,
    pub roles: Vec<Role>,
}

impl MappingConditions {
    pub fn matches(&self, snapshot: &EntitySnapshot, actor_role: Role) -> bool {
        if let Some(min) = self.min_amount {
            if snapshot.amount < min {
                return false;
            }
        }
        if !self.entity_statuses.is_empty() && !self.entity_statuses.contains(&snapshot.status) {
            return false;
        }
        if !self.roles.is_empty() && !self.roles.contains(&actor_role) {
            return false;
        }
        true
    }
}

/// Rule mapping one workflow event to recipients and channels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNotificationMapping {
    pub id: Uuid,
    pub company_scope: CompanyScope,
    pub entity_scope: EntityScope,
    pub event_type: WorkflowEventType,
    /// `None` applies to every stage of the entity's workflow.
    pub stage_key: Option<String>,
    pub recipient_resolvers: Vec<RecipientResolver>,
    pub custom_recipients: Vec<String>,
    pub exclude_action_performer: bool,
    pub channels: Vec<ChannelSpec>,
    pub conditions: MappingConditions,
    pub is_active: bool,
    pub priority: i32,
}

/// Resolved output of the mapping resolver, ready for the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchInstruction {
    pub channel: NotificationChannel,
    pub template_key: String,
    pub recipients: Vec<RecipientDescriptor>,
    pub priority: i32,
    pub delay_minutes: i64,
    pub event_type: WorkflowEventType,
    pub company_id: String,
    pub variables: HashMap<String, String>,
    pub correlation_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| std::fmt::Error)?;
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// One scheduled delivery to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationQueueEntry {
    pub queue_id: Uuid,
    pub company_id: String,
    pub event_code: String,
    pub channel: NotificationChannel,
    pub recipient_email: String,
    pub recipient_type: String,
    pub subject: String,
    pub body: String,
    pub status: QueueStatus,
    pub reason: Option<String>,
    pub scheduled_for: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationQueueEntry {
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.scheduled_for <= now
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Delay before retry `attempt` (1-based): base doubles per prior attempt,
/// capped at 2^10 multiples.
pub fn retry_backoff(base_seconds: u64, attempt: i32) -> Duration {
    let exponent = attempt.clamp(1, 11) - 1;
    Duration::seconds((base_seconds as i64).saturating_mul(1 << exponent))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryOutcome {
    Sent,
    Failed,
    Bounced,
    Rejected,
}

/// Write-once compliance record of one delivery attempt outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationLog {
    pub id: Uuid,
    pub queue_id: Uuid,
    pub company_id: String,
    pub recipient_email: String,
    pub outcome: DeliveryOutcome,
    pub detail: Option<String>,
    pub logged_at: DateTime<Utc>,
}

impl NotificationLog {
    pub fn for_entry(
        entry: &NotificationQueueEntry,
        outcome: DeliveryOutcome,
        detail: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue_id: entry.queue_id,
            company_id: entry.company_id.clone(),
            recipient_email: entry.recipient_email.clone(),
            outcome,
            detail,
            logged_at: Utc::now(),
        }
    }
}

/// Per-company delivery window during which sends are deferred.
///
/// The company timezone is modeled as a fixed UTC offset. Windows may wrap
/// midnight (e.g. 22:00 → 06:00).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QuietHours {
    pub enabled: bool,
    /// Minutes from local midnight, inclusive.
    pub start_minute: u32,
    /// Minutes from local midnight, exclusive.
    pub end_minute: u32,
    pub utc_offset_minutes: i32,
}

impl QuietHours {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            start_minute: 0,
            end_minute: 0,
            utc_offset_minutes: 0,
        }
    }

    /// Returns the UTC instant delivery should be deferred to when `now`
    /// falls inside the window, `None` otherwise. An `end_minute` of 1440
    /// encodes "until midnight"; larger values carry into the next day.
    pub fn defer_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        const MINUTES_PER_DAY: u32 = 24 * 60;

        if !self.enabled || self.start_minute == self.end_minute {
            return None;
        }
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)?;
        let local = now.with_timezone(&offset);
        let minute_of_day = local.hour() * 60 + local.minute();

        let (inside, end_is_next_day) = if self.start_minute < self.end_minute {
            (
                minute_of_day >= self.start_minute && minute_of_day < self.end_minute,
                false,
            )
        } else {
            // Window wraps midnight.
            if minute_of_day >= self.start_minute {
                (true, true)
            } else {
                (minute_of_day < self.end_minute, false)
            }
        };
        if !inside {
            return None;
        }

        let end_time = NaiveTime::from_num_seconds_from_midnight_opt(
            (self.end_minute % MINUTES_PER_DAY) * 60,
            0,
        )?;
        let carried_days =
            u64::from(self.end_minute / MINUTES_PER_DAY) + u64::from(end_is_next_day);
        let end_date = local.date_naive().checked_add_days(Days::new(carried_days))?;
        offset
            .from_local_datetime(&end_date.and_time(end_time))
            .single()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Per-company notification settings consulted at enqueue time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompanyNotificationConfig {
    pub company_id: String,
    pub quiet_hours: QuietHours,
    pub max_attempts: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn window(start: u32, end: u32, offset: i32) -> QuietHours {
        QuietHours {
            enabled: true,
            start_minute: start,
            end_minute: end,
            utc_offset_minutes: offset,
        }
    }

    #[test]
    fn test_quiet_hours_simple_window() {
        // 09:00-17:00 UTC window, now 10:30 UTC.
        let q = window(9 * 60, 17 * 60, 0);
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 10, 30, 0).unwrap();
        let deferred = q.defer_until(now).unwrap();
        assert_eq!(deferred, Utc.with_ymd_and_hms(2026, 3, 2, 17, 0, 0).unwrap());

        // Outside the window.
        let evening = Utc.with_ymd_and_hms(2026, 3, 2, 18, 0, 0).unwrap();
        assert!(q.defer_until(evening).is_none());
    }

    #[test]
    fn test_quiet_hours_wrapping_window() {
        // 22:00-06:00 local, UTC+05:30.
        let q = window(22 * 60, 6 * 60, 330);

        // 23:00 local on 2026-03-02 = 17:30 UTC; defer to 06:00 next local day.
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 17, 30, 0).unwrap();
        let deferred = q.defer_until(now).unwrap();
        assert_eq!(deferred, Utc.with_ymd_and_hms(2026, 3, 3, 0, 30, 0).unwrap());

        // 05:00 local = 23:30 UTC previous day; defer to 06:00 same local day.
        let early = Utc.with_ymd_and_hms(2026, 3, 2, 23, 30, 0).unwrap();
        let deferred = q.defer_until(early).unwrap();
        assert_eq!(deferred, Utc.with_ymd_and_hms(2026, 3, 3, 0, 30, 0).unwrap());

        // Midday local is outside.
        let midday = Utc.with_ymd_and_hms(2026, 3, 2, 6, 30, 0).unwrap();
        assert!(q.defer_until(midday).is_none());
    }

    #[test]
    fn test_quiet_hours_window_ending_at_midnight() {
        // 21:00-24:00 UTC; 1440 encodes midnight.
        let q = window(21 * 60, 24 * 60, 0);
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 22, 15, 0).unwrap();
        let deferred = q.defer_until(now).unwrap();
        assert_eq!(deferred, Utc.with_ymd_and_hms(2026, 3, 3, 0, 0, 0).unwrap());

        let afternoon = Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap();
        assert!(q.defer_until(afternoon).is_none());
    }

    #[test]
    fn test_quiet_hours_disabled() {
        let now = Utc::now();
        assert!(QuietHours::disabled().defer_until(now).is_none());
        let mut q = window(0, 0, 0);
        q.enabled = true;
        assert!(q.defer_until(now).is_none());
    }

    #[test]
    fn test_retry_backoff_doubles() {
        assert_eq!(retry_backoff(30, 1), Duration::seconds(30));
        assert_eq!(retry_backoff(30, 2), Duration::seconds(60));
        assert_eq!(retry_backoff(30, 4), Duration::seconds(240));
        // Capped exponent.
        assert_eq!(retry_backoff(30, 50), retry_backoff(30, 11));
    }

    #[test]
    fn test_conditions_matching() {
        let mut snapshot = crate::entity::EntitySnapshot {
            entity_type: crate::entity::EntityType::Order,
            entity_id: "ORD-1".to_string(),
            company_id: "CMP-1".to_string(),
            vendor_id: None,
            location_id: None,
            requested_by: None,
            requestor_email: None,
            owner_email: None,
            amount: 500.0,
            current_stage: None,
            status: UnifiedStatus::InReview,
            carrier_name: None,
            tracking_number: None,
            shipment_reference_number: None,
            updated_at: Utc::now(),
        };

        let conditions = MappingConditions {
            min_amount: Some(1000.0),
            entity_statuses: vec![UnifiedStatus::InReview],
            roles: vec![Role::FinanceAdmin],
        };
        assert!(!conditions.matches(&snapshot, Role::FinanceAdmin));

        snapshot.amount = 1500.0;
        assert!(conditions.matches(&snapshot, Role::FinanceAdmin));
        assert!(!conditions.matches(&snapshot, Role::Employee));

        snapshot.status = UnifiedStatus::Draft;
        assert!(!conditions.matches(&snapshot, Role::FinanceAdmin));
    }
}
