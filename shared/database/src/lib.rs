//! Storage layer
//!
//! Trait seams in [`stores`], an in-memory implementation for tests and
//! local development, and PostgreSQL repositories for production.

pub mod memory;
pub mod migrations;
pub mod postgres;
pub mod repositories;
pub mod stores;

pub use memory::{MemoryDirectory, MemoryStore};
pub use postgres::{create_postgres_pool, health_check as postgres_health_check, PostgresPool};
pub use repositories::*;
pub use stores::{
    AuditLedger, EntityStore, MappingStore, NotificationQueueStore, RecipientDirectory,
    ShippingStore, WorkflowConfigStore,
};
