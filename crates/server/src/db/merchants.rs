//! Merchant repository backed by `PostgreSQL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use sigshield_core::{BillingProvider, Email, MerchantId, ShopDomain};

use super::{LinkOutcome, MerchantStore, RepositoryError};
use crate::models::{Merchant, NewMerchant};

const MERCHANT_COLUMNS: &str = r"
    id, contact_email, shop_domain, onboarding_completed, billing_provider,
    provider_subscription_ref, provider_session_ref,
    pending_subscription_ref, pending_confirmation_url,
    has_password, email_login, created_at, updated_at
";

/// Internal row type for `PostgreSQL` queries.
#[derive(Debug, sqlx::FromRow)]
struct MerchantRow {
    id: i32,
    contact_email: Option<String>,
    shop_domain: Option<String>,
    onboarding_completed: bool,
    billing_provider: BillingProvider,
    provider_subscription_ref: Option<String>,
    provider_session_ref: Option<String>,
    pending_subscription_ref: Option<String>,
    pending_confirmation_url: Option<String>,
    has_password: bool,
    email_login: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MerchantRow> for Merchant {
    type Error = RepositoryError;

    fn try_from(row: MerchantRow) -> Result<Self, Self::Error> {
        let contact_email = row
            .contact_email
            .as_deref()
            .map(Email::parse)
            .transpose()
            .map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid email in database: {e}"))
            })?;
        let shop_domain = row
            .shop_domain
            .as_deref()
            .map(ShopDomain::parse)
            .transpose()
            .map_err(|e| {
                RepositoryError::DataCorruption(format!("invalid shop domain in database: {e}"))
            })?;

        Ok(Self {
            id: MerchantId::new(row.id),
            contact_email,
            shop_domain,
            onboarding_completed: row.onboarding_completed,
            billing_provider: row.billing_provider,
            provider_subscription_ref: row.provider_subscription_ref,
            provider_session_ref: row.provider_session_ref,
            pending_subscription_ref: row.pending_subscription_ref,
            pending_confirmation_url: row.pending_confirmation_url,
            has_password: row.has_password,
            email_login: row.email_login,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_merchant(row: Option<MerchantRow>) -> Result<Option<Merchant>, RepositoryError> {
    row.map(Merchant::try_from).transpose()
}

/// Merchant store for `PostgreSQL`.
#[derive(Clone)]
pub struct PgMerchantStore {
    pool: PgPool,
}

impl PgMerchantStore {
    /// Create a new merchant store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<Merchant>, RepositoryError> {
        let sql = format!("SELECT {MERCHANT_COLUMNS} FROM merchant WHERE {predicate}");
        let row = sqlx::query_as::<_, MerchantRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        into_merchant(row)
    }
}

#[async_trait]
impl MerchantStore for PgMerchantStore {
    async fn get_by_id(&self, id: MerchantId) -> Result<Option<Merchant>, RepositoryError> {
        let sql = format!("SELECT {MERCHANT_COLUMNS} FROM merchant WHERE id = $1");
        let row = sqlx::query_as::<_, MerchantRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        into_merchant(row)
    }

    async fn get_by_shop_domain(
        &self,
        shop: &ShopDomain,
    ) -> Result<Option<Merchant>, RepositoryError> {
        self.fetch_one_where("shop_domain = $1", shop.as_str())
            .await
    }

    async fn get_by_email(&self, email: &Email) -> Result<Option<Merchant>, RepositoryError> {
        self.fetch_one_where("contact_email = $1", email.as_str())
            .await
    }

    async fn get_by_subscription_ref(
        &self,
        reference: &str,
    ) -> Result<Option<Merchant>, RepositoryError> {
        self.fetch_one_where(
            "provider_subscription_ref = $1 OR pending_subscription_ref = $1 LIMIT 1",
            reference,
        )
        .await
    }

    async fn upsert_merchant(&self, new: &NewMerchant) -> Result<Merchant, RepositoryError> {
        let row = match new {
            NewMerchant::AppStore {
                shop_domain,
                session_ref,
            } => {
                let sql = format!(
                    r"
                    INSERT INTO merchant (shop_domain, provider_session_ref, billing_provider)
                    VALUES ($1, $2, 'app_store')
                    ON CONFLICT (shop_domain) DO UPDATE SET
                        provider_session_ref = EXCLUDED.provider_session_ref,
                        billing_provider = CASE
                            WHEN merchant.provider_subscription_ref IS NULL THEN 'app_store'
                            ELSE merchant.billing_provider
                        END,
                        updated_at = NOW()
                    RETURNING {MERCHANT_COLUMNS}
                    "
                );
                sqlx::query_as::<_, MerchantRow>(&sql)
                    .bind(shop_domain.as_str())
                    .bind(session_ref)
                    .fetch_one(&self.pool)
                    .await
            }
            NewMerchant::Direct {
                email,
                has_password,
                email_login,
            } => {
                let sql = format!(
                    r"
                    INSERT INTO merchant (contact_email, has_password, email_login)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (contact_email) DO UPDATE SET
                        has_password = EXCLUDED.has_password,
                        email_login = COALESCE(EXCLUDED.email_login, merchant.email_login),
                        updated_at = NOW()
                    RETURNING {MERCHANT_COLUMNS}
                    "
                );
                sqlx::query_as::<_, MerchantRow>(&sql)
                    .bind(email.as_str())
                    .bind(has_password)
                    .bind(email_login.as_deref())
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .map_err(|e| RepositoryError::from_write(e, "merchant identity already exists"))?;

        Merchant::try_from(row)
    }

    async fn set_onboarding_completed(&self, id: MerchantId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE merchant
            SET onboarding_completed = TRUE, updated_at = NOW()
            WHERE id = $1 AND onboarding_completed = FALSE
            ",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Distinguish "already onboarded" from "no such merchant"
        match self.get_by_id(id).await? {
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound),
        }
    }

    async fn set_provider_session_ref(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        session_ref: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE merchant
            SET provider_session_ref = $3,
                billing_provider = CASE
                    WHEN provider_subscription_ref IS NULL THEN $2
                    ELSE billing_provider
                END,
                updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(provider)
        .bind(session_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn set_subscription_ref(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        reference: &str,
    ) -> Result<LinkOutcome, RepositoryError> {
        // First writer wins: a different linked ref is never overwritten.
        let sql = format!(
            r"
            UPDATE merchant
            SET billing_provider = $2,
                provider_subscription_ref = $3,
                pending_subscription_ref = NULL,
                pending_confirmation_url = NULL,
                updated_at = NOW()
            WHERE id = $1
              AND (provider_subscription_ref IS NULL OR provider_subscription_ref = $3)
            RETURNING {MERCHANT_COLUMNS}
            "
        );
        let row = sqlx::query_as::<_, MerchantRow>(&sql)
            .bind(id)
            .bind(provider)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                RepositoryError::from_write(e, "subscription linked to another merchant")
            })?;

        if let Some(row) = row {
            return Ok(LinkOutcome::Linked(Merchant::try_from(row)?));
        }

        let current = self.get_by_id(id).await?.ok_or(RepositoryError::NotFound)?;
        current.provider_subscription_ref.map_or_else(
            || {
                Err(RepositoryError::DataCorruption(format!(
                    "conditional link on merchant {id} matched no row"
                )))
            },
            |existing| Ok(LinkOutcome::Conflict { existing }),
        )
    }

    async fn set_pending_subscription(
        &self,
        id: MerchantId,
        provider: BillingProvider,
        reference: &str,
        confirmation_url: &str,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r"
            UPDATE merchant
            SET billing_provider = $2,
                pending_subscription_ref = $3,
                pending_confirmation_url = $4,
                updated_at = NOW()
            WHERE id = $1 AND provider_subscription_ref IS NULL
            ",
        )
        .bind(id)
        .bind(provider)
        .bind(reference)
        .bind(confirmation_url)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear_subscription_ref(
        &self,
        id: MerchantId,
        reference: &str,
    ) -> Result<bool, RepositoryError> {
        // Right-hand sides see the pre-update row.
        let result = sqlx::query(
            r"
            UPDATE merchant
            SET provider_subscription_ref = CASE
                    WHEN provider_subscription_ref = $2 THEN NULL
                    ELSE provider_subscription_ref
                END,
                pending_subscription_ref = CASE
                    WHEN pending_subscription_ref = $2 THEN NULL
                    ELSE pending_subscription_ref
                END,
                pending_confirmation_url = CASE
                    WHEN pending_subscription_ref = $2 THEN NULL
                    ELSE pending_confirmation_url
                END,
                updated_at = NOW()
            WHERE id = $1
              AND (provider_subscription_ref = $2 OR pending_subscription_ref = $2)
            ",
        )
        .bind(id)
        .bind(reference)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
