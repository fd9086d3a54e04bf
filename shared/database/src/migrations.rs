use anyhow::Result;
use sqlx::PgPool;

pub async fn run_postgres_migrations(pool: &PgPool) -> Result<()> {
    tracing::info!("Running PostgreSQL migrations");

    // Versioned approval stage definitions
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_configurations (
            id UUID PRIMARY KEY,
            company_scope VARCHAR NOT NULL,
            entity_type VARCHAR NOT NULL,
            version INT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            stages JSONB NOT NULL DEFAULT '[]',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Entity snapshots mirrored from the CRUD layer
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entities (
            entity_type VARCHAR NOT NULL,
            entity_id VARCHAR NOT NULL,
            company_id VARCHAR NOT NULL,
            vendor_id VARCHAR,
            location_id VARCHAR,
            requested_by VARCHAR,
            requestor_email VARCHAR,
            owner_email VARCHAR,
            amount DOUBLE PRECISION NOT NULL DEFAULT 0,
            current_stage VARCHAR,
            status VARCHAR NOT NULL,
            carrier_name VARCHAR,
            tracking_number VARCHAR,
            shipment_reference_number VARCHAR,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (entity_type, entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only approval audit trail; seq gives a stable chain order
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_approval_audits (
            seq BIGSERIAL PRIMARY KEY,
            id UUID NOT NULL UNIQUE,
            entity_type VARCHAR NOT NULL,
            entity_id VARCHAR NOT NULL,
            workflow_config_id UUID NOT NULL,
            workflow_version INT NOT NULL,
            from_stage VARCHAR,
            to_stage VARCHAR,
            action VARCHAR NOT NULL,
            approved_by VARCHAR NOT NULL,
            approved_by_role VARCHAR NOT NULL,
            previous_status VARCHAR NOT NULL,
            new_status VARCHAR NOT NULL,
            remarks TEXT,
            entity_snapshot JSONB NOT NULL,
            approved_at TIMESTAMPTZ NOT NULL,
            hash VARCHAR NOT NULL,
            previous_hash VARCHAR
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_approval_audits_entity
        ON workflow_approval_audits (entity_type, entity_id, seq)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_rejections (
            id UUID PRIMARY KEY,
            entity_type VARCHAR NOT NULL,
            entity_id VARCHAR NOT NULL,
            workflow_stage VARCHAR,
            action VARCHAR NOT NULL,
            reason_code VARCHAR NOT NULL,
            rejected_by VARCHAR NOT NULL,
            rejected_by_role VARCHAR NOT NULL,
            previous_status VARCHAR NOT NULL,
            new_status VARCHAR NOT NULL,
            remarks TEXT,
            entity_snapshot JSONB NOT NULL,
            rejected_at TIMESTAMPTZ NOT NULL,
            is_resolved BOOLEAN NOT NULL DEFAULT FALSE,
            resolved_at TIMESTAMPTZ,
            resolved_by VARCHAR,
            resolution_action VARCHAR
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workflow_notification_mappings (
            id UUID PRIMARY KEY,
            company_scope VARCHAR NOT NULL,
            entity_scope VARCHAR NOT NULL,
            event_type VARCHAR NOT NULL,
            stage_key VARCHAR,
            recipient_resolvers JSONB NOT NULL DEFAULT '[]',
            custom_recipients JSONB NOT NULL DEFAULT '[]',
            exclude_action_performer BOOLEAN NOT NULL DEFAULT FALSE,
            channels JSONB NOT NULL DEFAULT '[]',
            conditions JSONB NOT NULL DEFAULT '{}',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            priority INT NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_queue (
            queue_id UUID PRIMARY KEY,
            company_id VARCHAR NOT NULL,
            event_code VARCHAR NOT NULL,
            channel VARCHAR NOT NULL,
            recipient_email VARCHAR NOT NULL,
            recipient_type VARCHAR NOT NULL,
            subject TEXT NOT NULL,
            body TEXT NOT NULL,
            status VARCHAR NOT NULL,
            reason TEXT,
            scheduled_for TIMESTAMPTZ NOT NULL,
            attempts INT NOT NULL DEFAULT 0,
            max_attempts INT NOT NULL,
            last_error TEXT,
            correlation_id VARCHAR NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_notification_queue_claim
        ON notification_queue (status, scheduled_for)
        "#,
    )
    .execute(pool)
    .await?;

    // Write-once delivery outcome log
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notification_logs (
            id UUID PRIMARY KEY,
            queue_id UUID NOT NULL,
            company_id VARCHAR NOT NULL,
            recipient_email VARCHAR NOT NULL,
            outcome VARCHAR NOT NULL,
            detail TEXT,
            logged_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS company_notification_configs (
            company_id VARCHAR PRIMARY KEY,
            quiet_hours JSONB NOT NULL,
            max_attempts INT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS company_shipment_settings (
            company_id VARCHAR PRIMARY KEY,
            shipment_mode VARCHAR NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shipment_service_providers (
            id VARCHAR PRIMARY KEY,
            code VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            base_url VARCHAR NOT NULL,
            capabilities JSONB NOT NULL DEFAULT '[]',
            auth_config TEXT NOT NULL DEFAULT '',
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per (company, provider); enablement auto-repair upserts here
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS company_shipping_providers (
            id VARCHAR PRIMARY KEY,
            company_id VARCHAR NOT NULL,
            provider_id VARCHAR NOT NULL,
            is_enabled BOOLEAN NOT NULL DEFAULT TRUE,
            is_default BOOLEAN NOT NULL DEFAULT FALSE,
            credentials_ref VARCHAR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            UNIQUE (company_id, provider_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vendor_shipping_routings (
            id VARCHAR PRIMARY KEY,
            vendor_id VARCHAR NOT NULL,
            company_id VARCHAR NOT NULL,
            provider_id VARCHAR NOT NULL,
            primary_courier_code VARCHAR NOT NULL,
            secondary_courier_code VARCHAR,
            is_active BOOLEAN NOT NULL DEFAULT TRUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shipments (
            id VARCHAR PRIMARY KEY,
            company_id VARCHAR NOT NULL,
            order_id VARCHAR NOT NULL,
            vendor_id VARCHAR NOT NULL,
            shipment_mode VARCHAR NOT NULL,
            shipment_status VARCHAR NOT NULL,
            carrier_name VARCHAR,
            tracking_number VARCHAR,
            courier_code VARCHAR,
            provider_id VARCHAR,
            company_shipping_provider_id VARCHAR,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS directory_users (
            user_id VARCHAR PRIMARY KEY,
            company_id VARCHAR NOT NULL,
            email VARCHAR NOT NULL,
            name VARCHAR NOT NULL,
            role VARCHAR NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vendor_contacts (
            vendor_id VARCHAR PRIMARY KEY,
            email VARCHAR NOT NULL,
            name VARCHAR NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("PostgreSQL migrations completed");
    Ok(())
}
