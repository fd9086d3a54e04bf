//! Workflow configuration repository
//!
//! One active configuration version per (company scope, entity type);
//! activation retires the previous version in the same transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use procura_models::{CompanyScope, EntityType, WorkflowConfiguration};
use procura_utils::ProcuraResult;

use super::db_err;
use crate::stores::WorkflowConfigStore;

pub struct PgWorkflowConfigStore {
    pool: PgPool,
}

impl PgWorkflowConfigStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkflowConfigStore for PgWorkflowConfigStore {
    async fn find_active(
        &self,
        scope: &CompanyScope,
        entity_type: EntityType,
    ) -> ProcuraResult<Option<WorkflowConfiguration>> {
        let scope_str: String = scope.clone().into();

        let row: Option<ConfigRow> = sqlx::query_as(
            r#"
            SELECT id, company_scope, entity_type, version, is_active,
                   stages, created_at, updated_at
            FROM workflow_configurations
            WHERE company_scope = $1 AND entity_type = $2 AND is_active = TRUE
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(&scope_str)
        .bind(entity_type.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch active workflow configuration", e))?;

        Ok(row.map(|r| r.into()))
    }

    async fn activate(&self, config: WorkflowConfiguration) -> ProcuraResult<()> {
        let scope_str: String = config.company_scope.clone().into();
        let entity_type_str = config.entity_type.to_string();
        let stages = serde_json::to_value(&config.stages)
            .map_err(|e| procura_utils::ProcuraError::internal(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("begin configuration activation", e))?;

        sqlx::query(
            r#"
            UPDATE workflow_configurations
            SET is_active = FALSE, updated_at = NOW()
            WHERE company_scope = $1 AND entity_type = $2 AND is_active = TRUE
            "#,
        )
        .bind(&scope_str)
        .bind(&entity_type_str)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("retire previous configuration version", e))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_configurations
                (id, company_scope, entity_type, version, is_active,
                 stages, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7)
            "#,
        )
        .bind(config.id)
        .bind(&scope_str)
        .bind(&entity_type_str)
        .bind(config.version)
        .bind(&stages)
        .bind(config.created_at)
        .bind(config.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("insert workflow configuration", e))?;

        tx.commit()
            .await
            .map_err(|e| db_err("commit configuration activation", e))?;
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct ConfigRow {
    id: Uuid,
    company_scope: String,
    entity_type: String,
    version: i32,
    is_active: bool,
    stages: serde_json::Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConfigRow> for WorkflowConfiguration {
    fn from(row: ConfigRow) -> Self {
        Self {
            id: row.id,
            company_scope: CompanyScope::try_from(row.company_scope)
                .unwrap_or(CompanyScope::Global),
            entity_type: EntityType::from_str(&row.entity_type).unwrap_or(EntityType::Order),
            version: row.version,
            is_active: row.is_active,
            stages: serde_json::from_value(row.stages).unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
