use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{BrokerError, FetchFailure};
use crate::leadconnector::TokenGrant;

/// Lifetime assumed when a refresh response omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Whether a token acts for the whole company or for one location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScopeKind {
    Company,
    Location,
}

impl ScopeKind {
    /// The provider's `userType` spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeKind::Company => "Company",
            ScopeKind::Location => "Location",
        }
    }

    pub fn from_user_type(user_type: &str) -> Option<Self> {
        if user_type.eq_ignore_ascii_case("company") {
            Some(ScopeKind::Company)
        } else if user_type.eq_ignore_ascii_case("location") {
            Some(ScopeKind::Location)
        } else {
            None
        }
    }
}

/// Uniqueness key of a stored credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub scope_kind: ScopeKind,
    pub parent_id: String,
    pub sub_id: Option<String>,
}

impl CredentialKey {
    pub fn company(company_id: impl Into<String>) -> Self {
        Self {
            scope_kind: ScopeKind::Company,
            parent_id: company_id.into(),
            sub_id: None,
        }
    }

    pub fn location(company_id: impl Into<String>, location_id: impl Into<String>) -> Self {
        Self {
            scope_kind: ScopeKind::Location,
            parent_id: company_id.into(),
            sub_id: Some(location_id.into()),
        }
    }

    /// `sub_id` as stored: empty string when absent.
    pub fn sub_id_or_empty(&self) -> &str {
        self.sub_id.as_deref().unwrap_or_default()
    }
}

/// A persisted OAuth token set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub scope_kind: ScopeKind,
    pub parent_id: String,
    pub sub_id: Option<String>,
    /// Provider user that installed the app; may be empty.
    pub user_id: String,
    pub auth_code: String,
    /// Unix seconds.
    pub expiry: i64,
    /// Last write, stamped by the store. `None` until first persisted.
    pub updated_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Build a credential from an authorization-code grant issued at `issued_at`.
    ///
    /// `fallback_user_type` applies when the grant has no `userType`.
    pub fn from_grant(
        grant: &TokenGrant,
        code: &str,
        fallback_user_type: &str,
        issued_at: i64,
    ) -> Result<Self, BrokerError> {
        let user_type = grant.user_type.as_deref().unwrap_or(fallback_user_type);
        let scope_kind = ScopeKind::from_user_type(user_type).ok_or_else(|| {
            BrokerError::InvalidCredential(format!("unknown userType {user_type:?}"))
        })?;
        let expires_in = grant
            .expires_in
            .ok_or_else(|| FetchFailure::data_shape("token response has no expires_in"))?;

        let credential = Self {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            token_type: grant.token_type.clone().unwrap_or_else(|| "Bearer".into()),
            scope_kind,
            parent_id: grant.company_id.clone().unwrap_or_default(),
            sub_id: match scope_kind {
                ScopeKind::Location => grant.location_id.clone().filter(|id| !id.is_empty()),
                ScopeKind::Company => None,
            },
            user_id: grant.user_id.clone().unwrap_or_default(),
            auth_code: code.to_string(),
            expiry: issued_at + expires_in,
            updated_at: None,
        };
        credential.validate()?;
        Ok(credential)
    }

    pub fn key(&self) -> CredentialKey {
        CredentialKey {
            scope_kind: self.scope_kind,
            parent_id: self.parent_id.clone(),
            sub_id: self.sub_id.clone(),
        }
    }

    pub fn validate(&self) -> Result<(), BrokerError> {
        match self.scope_kind {
            ScopeKind::Location if self.sub_id.as_deref().unwrap_or_default().is_empty() => Err(
                BrokerError::InvalidCredential("location credential without location id".into()),
            ),
            ScopeKind::Company if self.parent_id.is_empty() => Err(
                BrokerError::InvalidCredential("company credential without company id".into()),
            ),
            _ if self.access_token.is_empty() => {
                Err(BrokerError::InvalidCredential("empty access token".into()))
            }
            _ => Ok(()),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry <= now
    }

    /// Take the tokens of a refresh grant issued at `issued_at`, keeping the
    /// key and the original authorization code.
    pub fn apply_refresh(&mut self, grant: &TokenGrant, issued_at: i64) {
        self.access_token = grant.access_token.clone();
        if let Some(rt) = &grant.refresh_token {
            self.refresh_token = Some(rt.clone());
        }
        if let Some(tt) = &grant.token_type {
            self.token_type = tt.clone();
        }
        self.expiry = issued_at + grant.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
    }
}

#[cfg(test)]
pub(crate) fn sample(key: CredentialKey, access_token: &str, expiry: i64) -> Credential {
    Credential {
        access_token: access_token.into(),
        refresh_token: Some(format!("refresh-{access_token}")),
        token_type: "Bearer".into(),
        scope_kind: key.scope_kind,
        parent_id: key.parent_id,
        sub_id: key.sub_id,
        user_id: "user-1".into(),
        auth_code: "code-1".into(),
        expiry,
        updated_at: None,
    }
}
