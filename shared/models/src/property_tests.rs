//! Procura property-based tests
//!
//! Property tests for the pure value logic the engines depend on: quiet-hour
//! deferral, retry backoff, and status projection.

use chrono::{TimeZone, Timelike, Utc};
use proptest::prelude::*;

use crate::notification::{retry_backoff, QuietHours};
use crate::entity::UnifiedStatus;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A deferred delivery instant is never inside the quiet window and never
    /// in the past.
    #[test]
    fn prop_quiet_hours_defer_exits_window(
        start in 0u32..1440,
        end in 0u32..1440,
        offset_hours in -12i32..=12,
        hour in 0u32..24,
        minute in 0u32..60,
    ) {
        let q = QuietHours {
            enabled: true,
            start_minute: start,
            end_minute: end,
            utc_offset_minutes: offset_hours * 60,
        };
        let now = Utc.with_ymd_and_hms(2026, 6, 15, hour, minute, 0).unwrap();

        if let Some(deferred) = q.defer_until(now) {
            prop_assert!(deferred >= now);
            // The deferral target itself is no longer inside the window.
            prop_assert!(q.defer_until(deferred).is_none());
        }
    }

    /// Deferral lands exactly on the window end minute in company-local time.
    #[test]
    fn prop_quiet_hours_defer_lands_on_end(
        start in 0u32..1440,
        end in 0u32..1440,
        hour in 0u32..24,
    ) {
        prop_assume!(start != end);
        let q = QuietHours { enabled: true, start_minute: start, end_minute: end, utc_offset_minutes: 0 };
        let now = Utc.with_ymd_and_hms(2026, 6, 15, hour, 0, 0).unwrap();

        if let Some(deferred) = q.defer_until(now) {
            prop_assert_eq!(deferred.hour() * 60 + deferred.minute(), end);
        }
    }

    /// Backoff is monotonically non-decreasing in the attempt number.
    #[test]
    fn prop_backoff_monotonic(base in 1u64..600, attempt in 1i32..40) {
        prop_assert!(retry_backoff(base, attempt + 1) >= retry_backoff(base, attempt));
        prop_assert!(retry_backoff(base, attempt) >= chrono::Duration::seconds(base as i64));
    }
}

#[test]
fn prop_every_status_projects_both_fields() {
    let all = [
        UnifiedStatus::Draft,
        UnifiedStatus::Submitted,
        UnifiedStatus::InReview,
        UnifiedStatus::Approved,
        UnifiedStatus::Rejected,
        UnifiedStatus::OnHold,
        UnifiedStatus::Cancelled,
        UnifiedStatus::Dispatched,
        UnifiedStatus::Delivered,
        UnifiedStatus::Closed,
    ];
    for status in all {
        let projection = status.project();
        assert!(!projection.status.is_empty());
        assert_eq!(projection.unified_status, status);
    }
}
