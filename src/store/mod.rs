//! Credential persistence.
//!
//! Handlers and the refresher only see [`CredentialStore`]; `TokenStore` is
//! the PostgreSQL implementation and `MemoryStore` keeps rows in process.

pub mod credential;
pub mod db;
pub mod memory;
pub mod refresh;

pub use credential::{Credential, CredentialKey, ScopeKind};
pub use db::TokenStore;
pub use memory::MemoryStore;
pub use refresh::{ensure_fresh, refresh_credential, refresh_expired, RefreshSummary};

use async_trait::async_trait;

use crate::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            UpsertOutcome::Inserted => "Token inserted successfully.",
            UpsertOutcome::Updated => "Token updated successfully.",
        }
    }
}

/// Keyed single-row storage for credentials. Writes replace the whole row.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get_credential(&self, key: &CredentialKey) -> Result<Option<Credential>, BrokerError>;

    async fn put_credential(&self, credential: &Credential) -> Result<UpsertOutcome, BrokerError>;

    /// Credentials whose expiry is at or before `now`.
    async fn expired_credentials(&self, now: i64) -> Result<Vec<Credential>, BrokerError>;
}
