//! Shopify offline session repository backed by `PostgreSQL`.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use sqlx::PgPool;

use sigshield_core::ShopDomain;

use super::{RepositoryError, ShopSessionStore};
use crate::models::ShopSession;

/// Internal row type for `PostgreSQL` queries.
#[derive(sqlx::FromRow)]
struct ShopSessionRow {
    id: String,
    shop: String,
    access_token: String,
    scope: String,
    obtained_at: i64,
}

impl TryFrom<ShopSessionRow> for ShopSession {
    type Error = RepositoryError;

    fn try_from(row: ShopSessionRow) -> Result<Self, Self::Error> {
        let shop = ShopDomain::parse(&row.shop).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid shop domain in database: {e}"))
        })?;
        let scopes = row
            .scope
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            id: row.id,
            shop,
            access_token: SecretString::from(row.access_token),
            scopes,
            obtained_at: row.obtained_at,
        })
    }
}

/// Shop session store for `PostgreSQL`.
#[derive(Clone)]
pub struct PgShopSessionStore {
    pool: PgPool,
}

impl PgShopSessionStore {
    /// Create a new shop session store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ShopSessionStore for PgShopSessionStore {
    async fn get(&self, id: &str) -> Result<Option<ShopSession>, RepositoryError> {
        let row = sqlx::query_as::<_, ShopSessionRow>(
            r"
            SELECT id, shop, access_token, scope, obtained_at
            FROM shop_session
            WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ShopSession::try_from).transpose()
    }

    async fn save(&self, session: &ShopSession) -> Result<(), RepositoryError> {
        let scope = session.scopes.join(",");

        sqlx::query(
            r"
            INSERT INTO shop_session (id, shop, access_token, scope, obtained_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (shop) DO UPDATE SET
                id = EXCLUDED.id,
                access_token = EXCLUDED.access_token,
                scope = EXCLUDED.scope,
                obtained_at = EXCLUDED.obtained_at,
                updated_at = NOW()
            ",
        )
        .bind(&session.id)
        .bind(session.shop.as_str())
        .bind(session.access_token.expose_secret())
        .bind(scope)
        .bind(session.obtained_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM shop_session WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
