//! PostgreSQL-backed credential store.
//!
//! One table, `lc_tokens`, keyed by (user_type, company_id, location_id).
//! Company rows store an empty `location_id`. Tokens are encrypted at rest.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

use super::{Credential, CredentialKey, CredentialStore, ScopeKind, UpsertOutcome};
use crate::crypto::CryptoEngine;
use crate::error::BrokerError;

pub struct TokenStore {
    pool: PgPool,
    crypto: CryptoEngine,
}

impl TokenStore {
    pub async fn new(db_url: &str, crypto: CryptoEngine) -> Result<Self, BrokerError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(db_url)
            .await
            .map_err(|e| BrokerError::Persistence(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool, crypto })
    }

    /// Create the table and index when missing.
    pub async fn bootstrap(&self) -> Result<(), BrokerError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS lc_tokens (
                id              BIGSERIAL PRIMARY KEY,
                user_type       TEXT NOT NULL,
                company_id      TEXT NOT NULL DEFAULT '',
                location_id     TEXT NOT NULL DEFAULT '',
                user_id         TEXT NOT NULL DEFAULT '',
                access_token    TEXT NOT NULL,
                refresh_token   TEXT,
                token_type      TEXT NOT NULL DEFAULT 'Bearer',
                code            TEXT NOT NULL DEFAULT '',
                expire          BIGINT NOT NULL,
                updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (user_type, company_id, location_id),
                CHECK (user_type <> 'Location' OR location_id <> '')
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_lc_tokens_expire ON lc_tokens(expire)")
            .execute(&self.pool)
            .await?;

        info!("lc_tokens table ready");
        Ok(())
    }

    fn row_to_credential(&self, row: &PgRow) -> Result<Credential, BrokerError> {
        let user_type: String = row.try_get("user_type")?;
        let scope_kind = ScopeKind::from_user_type(&user_type).ok_or_else(|| {
            BrokerError::Persistence(format!("unknown user_type {user_type:?} in lc_tokens"))
        })?;
        let location_id: String = row.try_get("location_id")?;
        let enc_access: String = row.try_get("access_token")?;
        let enc_refresh: Option<String> = row.try_get("refresh_token")?;

        let refresh_token = match enc_refresh {
            Some(ref rt) if !rt.is_empty() => Some(self.crypto.decrypt(rt)?),
            _ => None,
        };

        Ok(Credential {
            access_token: self.crypto.decrypt(&enc_access)?,
            refresh_token,
            token_type: row.try_get("token_type")?,
            scope_kind,
            parent_id: row.try_get("company_id")?,
            sub_id: Some(location_id).filter(|id| !id.is_empty()),
            user_id: row.try_get("user_id")?,
            auth_code: row.try_get("code")?,
            expiry: row.try_get("expire")?,
            updated_at: Some(row.try_get("updated_at")?),
        })
    }
}

#[async_trait]
impl CredentialStore for TokenStore {
    async fn get_credential(&self, key: &CredentialKey) -> Result<Option<Credential>, BrokerError> {
        let row = sqlx::query(
            r#"
            SELECT user_type, company_id, location_id, user_id, access_token,
                   refresh_token, token_type, code, expire, updated_at
            FROM lc_tokens
            WHERE user_type = $1 AND company_id = $2 AND location_id = $3
            "#,
        )
        .bind(key.scope_kind.as_str())
        .bind(&key.parent_id)
        .bind(key.sub_id_or_empty())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(|r| self.row_to_credential(r)).transpose()
    }

    async fn put_credential(&self, credential: &Credential) -> Result<UpsertOutcome, BrokerError> {
        credential.validate()?;
        let key = credential.key();

        let enc_access = self.crypto.encrypt(&credential.access_token)?;
        let enc_refresh = credential
            .refresh_token
            .as_deref()
            .map(|rt| self.crypto.encrypt(rt))
            .transpose()?;

        // Dropping the transaction on an early return rolls it back.
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT 1 FROM lc_tokens WHERE user_type = $1 AND company_id = $2 AND location_id = $3 FOR UPDATE",
        )
        .bind(key.scope_kind.as_str())
        .bind(&key.parent_id)
        .bind(key.sub_id_or_empty())
        .fetch_optional(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO lc_tokens
                (user_type, company_id, location_id, user_id, access_token,
                 refresh_token, token_type, code, expire)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (user_type, company_id, location_id)
            DO UPDATE SET
                user_id = EXCLUDED.user_id,
                access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                token_type = EXCLUDED.token_type,
                code = EXCLUDED.code,
                expire = EXCLUDED.expire,
                updated_at = NOW()
            "#,
        )
        .bind(key.scope_kind.as_str())
        .bind(&key.parent_id)
        .bind(key.sub_id_or_empty())
        .bind(&credential.user_id)
        .bind(&enc_access)
        .bind(&enc_refresh)
        .bind(&credential.token_type)
        .bind(&credential.auth_code)
        .bind(credential.expiry)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(if existing.is_some() {
            UpsertOutcome::Updated
        } else {
            UpsertOutcome::Inserted
        })
    }

    async fn expired_credentials(&self, now: i64) -> Result<Vec<Credential>, BrokerError> {
        let rows = sqlx::query(
            r#"
            SELECT user_type, company_id, location_id, user_id, access_token,
                   refresh_token, token_type, code, expire, updated_at
            FROM lc_tokens
            WHERE expire <= $1
            ORDER BY expire
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| self.row_to_credential(row)).collect()
    }
}
