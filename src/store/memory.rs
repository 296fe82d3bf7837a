use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{Credential, CredentialKey, CredentialStore, UpsertOutcome};
use crate::error::BrokerError;

/// In-process credential store. Contents are lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<CredentialKey, Credential>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credential(&self, key: &CredentialKey) -> Result<Option<Credential>, BrokerError> {
        Ok(self.rows.read().await.get(key).cloned())
    }

    async fn put_credential(&self, credential: &Credential) -> Result<UpsertOutcome, BrokerError> {
        credential.validate()?;
        let mut row = credential.clone();
        row.updated_at = Some(Utc::now());
        let previous = self.rows.write().await.insert(credential.key(), row);
        Ok(match previous {
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Inserted,
        })
    }

    async fn expired_credentials(&self, now: i64) -> Result<Vec<Credential>, BrokerError> {
        let mut expired: Vec<Credential> = self
            .rows
            .read()
            .await
            .values()
            .filter(|c| c.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|c| c.expiry);
        Ok(expired)
    }
}
