//! PostgreSQL user store
//!
//! Reads identities, their passkeys and their step-up policy from the
//! `webauthn_users` table.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use webauthn_rs::prelude::Passkey;

use super::{Identity, UserQuery, UserStore};
use crate::error::StoreError;

/// PostgreSQL-backed user store
pub struct PostgresUserStore {
    pool: PgPool,
}

#[derive(FromRow)]
struct UserRow {
    user_id: String,
    user_name: String,
    credentials: serde_json::Value,
}

impl UserRow {
    fn into_identity(self) -> Result<Identity, StoreError> {
        let credentials: Vec<Passkey> = serde_json::from_value(self.credentials)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Identity {
            user_id: self.user_id,
            user_name: self.user_name,
            credentials,
        })
    }
}

impl PostgresUserStore {
    /// Connect to `database_url` with at most `max_connections` pooled connections
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!("Connected to PostgreSQL database");
        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tracing::info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn lookup(&self, query: &UserQuery) -> Result<Option<Identity>, StoreError> {
        let (sql, key) = match query {
            UserQuery::ByUserId(id) => (
                "SELECT user_id, user_name, credentials FROM webauthn_users WHERE user_id = $1",
                id,
            ),
            UserQuery::ByUserName(name) => (
                "SELECT user_id, user_name, credentials FROM webauthn_users WHERE user_name = $1",
                name,
            ),
        };

        let row = sqlx::query_as::<_, UserRow>(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        row.map(UserRow::into_identity).transpose()
    }

    async fn is_step_up_enabled(&self, query: &UserQuery) -> Result<bool, StoreError> {
        let (sql, key) = match query {
            UserQuery::ByUserId(id) => (
                "SELECT step_up_enabled FROM webauthn_users WHERE user_id = $1",
                id,
            ),
            UserQuery::ByUserName(name) => (
                "SELECT step_up_enabled FROM webauthn_users WHERE user_name = $1",
                name,
            ),
        };

        let enabled: Option<bool> = sqlx::query_scalar(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(enabled.unwrap_or(false))
    }

    async fn check_health(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

impl std::fmt::Debug for PostgresUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresUserStore")
            .field("pool_size", &self.pool.size())
            .finish()
    }
}
