//! Shipping repository
//!
//! Provider catalog, per-company enablement (with the idempotent auto-repair
//! upsert), vendor routing bindings, and shipment records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use procura_models::{
    CompanyShipmentMode, CompanyShippingProvider, Shipment, ShipmentMode,
    ShipmentServiceProvider, ShipmentStatus, VendorShippingRouting,
};
use procura_utils::ProcuraResult;

use super::{db_err, parse_enum};
use crate::stores::ShippingStore;

pub struct PgShippingStore {
    pool: PgPool,
}

impl PgShippingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShippingStore for PgShippingStore {
    async fn company_shipment_mode(
        &self,
        company_id: &str,
    ) -> ProcuraResult<CompanyShipmentMode> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT shipment_mode FROM company_shipment_settings WHERE company_id = $1",
        )
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch company shipment mode", e))?;

        Ok(row
            .map(|(mode,)| parse_enum(&mode, CompanyShipmentMode::Manual))
            .unwrap_or(CompanyShipmentMode::Manual))
    }

    async fn set_company_shipment_mode(
        &self,
        company_id: &str,
        mode: CompanyShipmentMode,
    ) -> ProcuraResult<()> {
        let mode_str = serde_json::to_string(&mode)
            .map_err(|e| procura_utils::ProcuraError::internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO company_shipment_settings (company_id, shipment_mode)
            VALUES ($1, $2)
            ON CONFLICT (company_id) DO UPDATE SET shipment_mode = EXCLUDED.shipment_mode
            "#,
        )
        .bind(company_id)
        .bind(mode_str.trim_matches('"'))
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("set company shipment mode", e))?;
        Ok(())
    }

    async fn provider(
        &self,
        provider_id: &str,
    ) -> ProcuraResult<Option<ShipmentServiceProvider>> {
        let row: Option<ProviderRow> = sqlx::query_as(
            r#"
            SELECT id, code, name, base_url, capabilities, auth_config, is_active
            FROM shipment_service_providers
            WHERE id = $1
            "#,
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch shipment provider", e))?;

        Ok(row.map(|r| r.into()))
    }

    async fn active_providers(&self) -> ProcuraResult<Vec<ShipmentServiceProvider>> {
        let rows: Vec<ProviderRow> = sqlx::query_as(
            r#"
            SELECT id, code, name, base_url, capabilities, auth_config, is_active
            FROM shipment_service_providers
            WHERE is_active = TRUE
            ORDER BY code ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("fetch active shipment providers", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn put_provider(&self, provider: ShipmentServiceProvider) -> ProcuraResult<()> {
        let capabilities = serde_json::to_value(&provider.capabilities)
            .map_err(|e| procura_utils::ProcuraError::internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO shipment_service_providers
                (id, code, name, base_url, capabilities, auth_config, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                code = EXCLUDED.code,
                name = EXCLUDED.name,
                base_url = EXCLUDED.base_url,
                capabilities = EXCLUDED.capabilities,
                auth_config = EXCLUDED.auth_config,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(&provider.id)
        .bind(&provider.code)
        .bind(&provider.name)
        .bind(&provider.base_url)
        .bind(&capabilities)
        .bind(&provider.auth_config)
        .bind(provider.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("upsert shipment provider", e))?;
        Ok(())
    }

    async fn company_provider(
        &self,
        company_id: &str,
        provider_id: &str,
    ) -> ProcuraResult<Option<CompanyShippingProvider>> {
        let row: Option<CompanyProviderRow> = sqlx::query_as(
            r#"
            SELECT id, company_id, provider_id, is_enabled, is_default,
                   credentials_ref, created_at, updated_at
            FROM company_shipping_providers
            WHERE company_id = $1 AND provider_id = $2
            "#,
        )
        .bind(company_id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch company provider", e))?;

        Ok(row.map(|r| r.into()))
    }

    async fn enabled_company_providers(
        &self,
        company_id: &str,
    ) -> ProcuraResult<Vec<CompanyShippingProvider>> {
        let rows: Vec<CompanyProviderRow> = sqlx::query_as(
            r#"
            SELECT id, company_id, provider_id, is_enabled, is_default,
                   credentials_ref, created_at, updated_at
            FROM company_shipping_providers
            WHERE company_id = $1 AND is_enabled = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("fetch enabled company providers", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn enable_company_provider(
        &self,
        company_id: &str,
        provider_id: &str,
    ) -> ProcuraResult<CompanyShippingProvider> {
        let row: CompanyProviderRow = sqlx::query_as(
            r#"
            INSERT INTO company_shipping_providers
                (id, company_id, provider_id, is_enabled, is_default,
                 credentials_ref, created_at, updated_at)
            VALUES ($1, $2, $3, TRUE, FALSE, NULL, NOW(), NOW())
            ON CONFLICT (company_id, provider_id) DO UPDATE SET
                is_enabled = TRUE,
                updated_at = NOW()
            RETURNING id, company_id, provider_id, is_enabled, is_default,
                      credentials_ref, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(company_id)
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("enable company provider", e))?;

        Ok(row.into())
    }

    async fn active_routing(
        &self,
        vendor_id: &str,
        company_id: &str,
    ) -> ProcuraResult<Option<VendorShippingRouting>> {
        let row: Option<RoutingRow> = sqlx::query_as(
            r#"
            SELECT id, vendor_id, company_id, provider_id,
                   primary_courier_code, secondary_courier_code, is_active
            FROM vendor_shipping_routings
            WHERE vendor_id = $1 AND company_id = $2 AND is_active = TRUE
            LIMIT 1
            "#,
        )
        .bind(vendor_id)
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch vendor routing", e))?;

        Ok(row.map(|r| r.into()))
    }

    async fn put_routing(&self, routing: VendorShippingRouting) -> ProcuraResult<()> {
        sqlx::query(
            r#"
            INSERT INTO vendor_shipping_routings
                (id, vendor_id, company_id, provider_id,
                 primary_courier_code, secondary_courier_code, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                vendor_id = EXCLUDED.vendor_id,
                company_id = EXCLUDED.company_id,
                provider_id = EXCLUDED.provider_id,
                primary_courier_code = EXCLUDED.primary_courier_code,
                secondary_courier_code = EXCLUDED.secondary_courier_code,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(&routing.id)
        .bind(&routing.vendor_id)
        .bind(&routing.company_id)
        .bind(&routing.provider_id)
        .bind(&routing.primary_courier_code)
        .bind(&routing.secondary_courier_code)
        .bind(routing.is_active)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("upsert vendor routing", e))?;
        Ok(())
    }

    async fn create_shipment(&self, shipment: Shipment) -> ProcuraResult<()> {
        let mode = serde_json::to_string(&shipment.shipment_mode)
            .map_err(|e| procura_utils::ProcuraError::internal(e.to_string()))?;
        let status = serde_json::to_string(&shipment.shipment_status)
            .map_err(|e| procura_utils::ProcuraError::internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO shipments
                (id, company_id, order_id, vendor_id, shipment_mode, shipment_status,
                 carrier_name, tracking_number, courier_code, provider_id,
                 company_shipping_provider_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&shipment.id)
        .bind(&shipment.company_id)
        .bind(&shipment.order_id)
        .bind(&shipment.vendor_id)
        .bind(mode.trim_matches('"'))
        .bind(status.trim_matches('"'))
        .bind(&shipment.carrier_name)
        .bind(&shipment.tracking_number)
        .bind(&shipment.courier_code)
        .bind(&shipment.provider_id)
        .bind(&shipment.company_shipping_provider_id)
        .bind(shipment.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("insert shipment", e))?;
        Ok(())
    }

    async fn shipment(&self, shipment_id: &str) -> ProcuraResult<Option<Shipment>> {
        let row: Option<ShipmentRow> = sqlx::query_as(
            r#"
            SELECT id, company_id, order_id, vendor_id, shipment_mode, shipment_status,
                   carrier_name, tracking_number, courier_code, provider_id,
                   company_shipping_provider_id, created_at
            FROM shipments
            WHERE id = $1
            "#,
        )
        .bind(shipment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch shipment", e))?;

        Ok(row.map(|r| r.into()))
    }

    async fn shipments_for_order(&self, order_id: &str) -> ProcuraResult<Vec<Shipment>> {
        let rows: Vec<ShipmentRow> = sqlx::query_as(
            r#"
            SELECT id, company_id, order_id, vendor_id, shipment_mode, shipment_status,
                   carrier_name, tracking_number, courier_code, provider_id,
                   company_shipping_provider_id, created_at
            FROM shipments
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("fetch shipments for order", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

#[derive(Debug, FromRow)]
struct ProviderRow {
    id: String,
    code: String,
    name: String,
    base_url: String,
    capabilities: serde_json::Value,
    auth_config: String,
    is_active: bool,
}

impl From<ProviderRow> for ShipmentServiceProvider {
    fn from(row: ProviderRow) -> Self {
        Self {
            id: row.id,
            code: row.code,
            name: row.name,
            base_url: row.base_url,
            capabilities: serde_json::from_value(row.capabilities).unwrap_or_default(),
            auth_config: row.auth_config,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, FromRow)]
struct CompanyProviderRow {
    id: String,
    company_id: String,
    provider_id: String,
    is_enabled: bool,
    is_default: bool,
    credentials_ref: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CompanyProviderRow> for CompanyShippingProvider {
    fn from(row: CompanyProviderRow) -> Self {
        Self {
            id: row.id,
            company_id: row.company_id,
            provider_id: row.provider_id,
            is_enabled: row.is_enabled,
            is_default: row.is_default,
            credentials_ref: row.credentials_ref,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct RoutingRow {
    id: String,
    vendor_id: String,
    company_id: String,
    provider_id: String,
    primary_courier_code: String,
    secondary_courier_code: Option<String>,
    is_active: bool,
}

impl From<RoutingRow> for VendorShippingRouting {
    fn from(row: RoutingRow) -> Self {
        Self {
            id: row.id,
            vendor_id: row.vendor_id,
            company_id: row.company_id,
            provider_id: row.provider_id,
            primary_courier_code: row.primary_courier_code,
            secondary_courier_code: row.secondary_courier_code,
            is_active: row.is_active,
        }
    }
}

#[derive(Debug, FromRow)]
struct ShipmentRow {
    id: String,
    company_id: String,
    order_id: String,
    vendor_id: String,
    shipment_mode: String,
    shipment_status: String,
    carrier_name: Option<String>,
    tracking_number: Option<String>,
    courier_code: Option<String>,
    provider_id: Option<String>,
    company_shipping_provider_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ShipmentRow> for Shipment {
    fn from(row: ShipmentRow) -> Self {
        Self {
            id: row.id,
            company_id: row.company_id,
            order_id: row.order_id,
            vendor_id: row.vendor_id,
            shipment_mode: parse_enum(&row.shipment_mode, ShipmentMode::Manual),
            shipment_status: parse_enum(&row.shipment_status, ShipmentStatus::Created),
            carrier_name: row.carrier_name,
            tracking_number: row.tracking_number,
            courier_code: row.courier_code,
            provider_id: row.provider_id,
            company_shipping_provider_id: row.company_shipping_provider_id,
            created_at: row.created_at,
        }
    }
}
