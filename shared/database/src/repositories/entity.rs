//! Entity snapshot repository
//!
//! The engine never inserts business entities; it mirrors snapshots and
//! advances stage/status through a compare-and-set update.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use procura_models::{DispatchUpdate, EntitySnapshot, EntityType, UnifiedStatus};
use procura_utils::{ProcuraError, ProcuraResult};

use super::{db_err, parse_enum};
use crate::stores::EntityStore;

pub struct PgEntityStore {
    pool: PgPool,
}

impl PgEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn exists(&self, entity_type: EntityType, entity_id: &str) -> ProcuraResult<bool> {
        let (found,): (bool,) = sqlx::query_as(
            "SELECT EXISTS(SELECT 1 FROM entities WHERE entity_type = $1 AND entity_id = $2)",
        )
        .bind(entity_type.to_string())
        .bind(entity_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("check entity existence", e))?;
        Ok(found)
    }
}

#[async_trait]
impl EntityStore for PgEntityStore {
    async fn snapshot(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> ProcuraResult<Option<EntitySnapshot>> {
        let row: Option<EntityRow> = sqlx::query_as(
            r#"
            SELECT entity_type, entity_id, company_id, vendor_id, location_id,
                   requested_by, requestor_email, owner_email, amount,
                   current_stage, status, carrier_name, tracking_number,
                   shipment_reference_number, updated_at
            FROM entities
            WHERE entity_type = $1 AND entity_id = $2
            "#,
        )
        .bind(entity_type.to_string())
        .bind(entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch entity snapshot", e))?;

        Ok(row.map(|r| r.into()))
    }

    async fn put_snapshot(&self, snapshot: EntitySnapshot) -> ProcuraResult<()> {
        sqlx::query(
            r#"
            INSERT INTO entities
                (entity_type, entity_id, company_id, vendor_id, location_id,
                 requested_by, requestor_email, owner_email, amount,
                 current_stage, status, carrier_name, tracking_number,
                 shipment_reference_number, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (entity_type, entity_id) DO UPDATE SET
                company_id = EXCLUDED.company_id,
                vendor_id = EXCLUDED.vendor_id,
                location_id = EXCLUDED.location_id,
                requested_by = EXCLUDED.requested_by,
                requestor_email = EXCLUDED.requestor_email,
                owner_email = EXCLUDED.owner_email,
                amount = EXCLUDED.amount,
                current_stage = EXCLUDED.current_stage,
                status = EXCLUDED.status,
                carrier_name = EXCLUDED.carrier_name,
                tracking_number = EXCLUDED.tracking_number,
                shipment_reference_number = EXCLUDED.shipment_reference_number,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(snapshot.entity_type.to_string())
        .bind(&snapshot.entity_id)
        .bind(&snapshot.company_id)
        .bind(&snapshot.vendor_id)
        .bind(&snapshot.location_id)
        .bind(&snapshot.requested_by)
        .bind(&snapshot.requestor_email)
        .bind(&snapshot.owner_email)
        .bind(snapshot.amount)
        .bind(&snapshot.current_stage)
        .bind(snapshot.status.to_string())
        .bind(&snapshot.carrier_name)
        .bind(&snapshot.tracking_number)
        .bind(&snapshot.shipment_reference_number)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("upsert entity snapshot", e))?;
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
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET current_stage = $4, status = $5, updated_at = NOW()
            WHERE entity_type = $1 AND entity_id = $2
              AND current_stage IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(entity_type.to_string())
        .bind(entity_id)
        .bind(expected_stage)
        .bind(new_stage)
        .bind(new_status.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("apply stage transition", e))?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        if !self.exists(entity_type, entity_id).await? {
            return Err(ProcuraError::not_found(format!(
                "{entity_type} {entity_id} not found"
            )));
        }
        // Entity exists but the stage moved underneath us.
        Ok(false)
    }

    async fn record_dispatch(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        update: &DispatchUpdate,
    ) -> ProcuraResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE entities
            SET carrier_name = $3, tracking_number = $4,
                shipment_reference_number = $5, status = $6, updated_at = NOW()
            WHERE entity_type = $1 AND entity_id = $2
            "#,
        )
        .bind(entity_type.to_string())
        .bind(entity_id)
        .bind(&update.carrier_name)
        .bind(&update.tracking_number)
        .bind(&update.shipment_reference_number)
        .bind(update.dispatch_status.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("record dispatch fields", e))?;

        if result.rows_affected() == 0 {
            return Err(ProcuraError::not_found(format!(
                "{entity_type} {entity_id} not found"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct EntityRow {
    entity_type: String,
    entity_id: String,
    company_id: String,
    vendor_id: Option<String>,
    location_id: Option<String>,
    requested_by: Option<String>,
    requestor_email: Option<String>,
    owner_email: Option<String>,
    amount: f64,
    current_stage: Option<String>,
    status: String,
    carrier_name: Option<String>,
    tracking_number: Option<String>,
    shipment_reference_number: Option<String>,
    updated_at: DateTime<Utc>,
}

impl From<EntityRow> for EntitySnapshot {
    fn from(row: EntityRow) -> Self {
        Self {
            entity_type: EntityType::from_str(&row.entity_type).unwrap_or(EntityType::Order),
            entity_id: row.entity_id,
            company_id: row.company_id,
            vendor_id: row.vendor_id,
            location_id: row.location_id,
            requested_by: row.requested_by,
            requestor_email: row.requestor_email,
            owner_email: row.owner_email,
            amount: row.amount,
            current_stage: row.current_stage,
            status: parse_enum(&row.status, UnifiedStatus::Draft),
            carrier_name: row.carrier_name,
            tracking_number: row.tracking_number,
            shipment_reference_number: row.shipment_reference_number,
            updated_at: row.updated_at,
        }
    }
}
