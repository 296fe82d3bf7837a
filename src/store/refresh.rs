//! Pull-based token refresh.
//!
//! Nothing runs in the background: callers refresh expired credentials right
//! before they need a token.

use serde::Serialize;
use tracing::{error, info, warn};

use super::{Credential, CredentialKey, CredentialStore};
use crate::error::BrokerError;
use crate::leadconnector::LeadConnectorClient;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
    /// Expired rows without a refresh token.
    pub skipped: usize,
}

/// Refresh every credential that has expired as of `now`.
///
/// A failure for one credential is logged and counted; the rest still run.
pub async fn refresh_expired(
    store: &dyn CredentialStore,
    client: &LeadConnectorClient,
    now: i64,
) -> Result<RefreshSummary, BrokerError> {
    let expired = store.expired_credentials(now).await?;
    let mut summary = RefreshSummary::default();

    if expired.is_empty() {
        info!("No expired tokens to refresh");
        return Ok(summary);
    }
    info!("Found {} expired tokens to refresh", expired.len());

    for credential in expired {
        if credential.refresh_token.is_none() {
            warn!(
                user_type = credential.scope_kind.as_str(),
                company_id = %credential.parent_id,
                "Expired token has no refresh token, skipping"
            );
            summary.skipped += 1;
            continue;
        }

        let key = credential.key();
        match refresh_credential(store, client, credential, now).await {
            Ok(_) => summary.refreshed += 1,
            Err(e) => {
                error!(
                    user_type = key.scope_kind.as_str(),
                    company_id = %key.parent_id,
                    location_id = key.sub_id_or_empty(),
                    "Error refreshing token: {e}"
                );
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

/// Exchange the stored refresh token and write the new tokens back in place.
pub async fn refresh_credential(
    store: &dyn CredentialStore,
    client: &LeadConnectorClient,
    mut credential: Credential,
    now: i64,
) -> Result<Credential, BrokerError> {
    let refresh_token = credential
        .refresh_token
        .clone()
        .ok_or_else(|| BrokerError::RefreshFailed("no refresh token stored".into()))?;

    let grant = client
        .refresh_token(&refresh_token, credential.scope_kind.as_str())
        .await
        .map_err(|e| BrokerError::RefreshFailed(e.to_string()))?;

    credential.apply_refresh(&grant, now);
    store.put_credential(&credential).await?;

    info!(
        user_type = credential.scope_kind.as_str(),
        company_id = %credential.parent_id,
        location_id = credential.sub_id.as_deref().unwrap_or_default(),
        expiry = credential.expiry,
        "Token refreshed"
    );
    Ok(credential)
}

/// Load a credential, refreshing it first when it has expired.
pub async fn ensure_fresh(
    store: &dyn CredentialStore,
    client: &LeadConnectorClient,
    key: &CredentialKey,
    now: i64,
) -> Result<Credential, BrokerError> {
    let credential = store
        .get_credential(key)
        .await?
        .ok_or_else(|| BrokerError::NotFound("access token".into()))?;

    if credential.is_expired(now) {
        refresh_credential(store, client, credential, now).await
    } else {
        Ok(credential)
    }
}
