//! Recipient directory repository
//!
//! Reads the auth-context user and vendor contact tables the portal
//! maintains; the engine only resolves recipients from them.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use procura_models::{RecipientDescriptor, Role};
use procura_utils::ProcuraResult;

use super::db_err;
use crate::stores::RecipientDirectory;

pub struct PgRecipientDirectory {
    pool: PgPool,
}

impl PgRecipientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecipientDirectory for PgRecipientDirectory {
    async fn users_with_role(
        &self,
        company_id: &str,
        role: Role,
    ) -> ProcuraResult<Vec<RecipientDescriptor>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT email, name, role
            FROM directory_users
            WHERE company_id = $1 AND role = $2
            ORDER BY email ASC
            "#,
        )
        .bind(company_id)
        .bind(role.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("fetch users with role", e))?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn user(&self, user_id: &str) -> ProcuraResult<Option<RecipientDescriptor>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT email, name, role FROM directory_users WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch directory user", e))?;

        Ok(row.map(|r| r.into()))
    }

    async fn vendor_contact(
        &self,
        vendor_id: &str,
    ) -> ProcuraResult<Option<RecipientDescriptor>> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT email, name FROM vendor_contacts WHERE vendor_id = $1",
        )
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("fetch vendor contact", e))?;

        Ok(row.map(|(email, name)| RecipientDescriptor {
            email,
            name: Some(name),
            role: Some(Role::Vendor),
            recipient_type: Role::Vendor.to_string(),
        }))
    }
}

#[derive(Debug, FromRow)]
struct UserRow {
    email: String,
    name: String,
    role: String,
}

impl From<UserRow> for RecipientDescriptor {
    fn from(row: UserRow) -> Self {
        let role = Role::from_str(&row.role);
        Self {
            email: row.email,
            name: Some(row.name),
            role,
            recipient_type: row.role,
        }
    }
}
