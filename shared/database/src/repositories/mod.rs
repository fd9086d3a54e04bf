//! PostgreSQL repositories
//!
//! One repository per storage trait, all using runtime-checked sqlx queries
//! so the crate compiles without a live database.

pub mod audit;
pub mod directory;
pub mod entity;
pub mod notification;
pub mod shipment;
pub mod workflow;

pub use audit::PgAuditLedger;
pub use directory::PgRecipientDirectory;
pub use entity::PgEntityStore;
pub use notification::{PgMappingStore, PgNotificationQueueStore};
pub use shipment::PgShippingStore;
pub use workflow::PgWorkflowConfigStore;

use procura_utils::ProcuraError;

pub(crate) fn db_err(context: &str, error: sqlx::Error) -> ProcuraError {
    ProcuraError::database(format!("{context}: {error}"))
}

/// Parses a text column back into its SCREAMING_SNAKE enum value.
pub(crate) fn parse_enum<T: serde::de::DeserializeOwned>(s: &str, fallback: T) -> T {
    serde_json::from_str(&format!("\"{s}\"")).unwrap_or(fallback)
}
