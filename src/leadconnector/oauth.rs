use serde::Deserialize;
use url::form_urlencoded;

use super::LeadConnectorClient;
use crate::error::FetchFailure;
use crate::fetch::{FetchRequest, RetryPolicy};

/// Token endpoint response for both grant types.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    #[serde(rename = "userType")]
    pub user_type: Option<String>,
    #[serde(rename = "companyId")]
    pub company_id: Option<String>,
    #[serde(rename = "locationId")]
    pub location_id: Option<String>,
    #[serde(rename = "userId")]
    pub user_id: Option<String>,
}

impl LeadConnectorClient {
    /// URL of the marketplace location chooser that starts the OAuth flow.
    pub fn authorize_url(&self, scopes: &[String], redirect_uri: &str, state: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &scopes.join(" "))
            .append_pair("state", state)
            .finish();
        format!("{}/oauth/chooselocation?{query}", self.marketplace_url)
    }

    /// Exchange an authorization code for a token set.
    pub async fn exchange_code(&self, code: &str, user_type: &str) -> Result<TokenGrant, FetchFailure> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("user_type", user_type),
        ])
        .await
    }

    /// Exchange a refresh token for a new token set.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        user_type: &str,
    ) -> Result<TokenGrant, FetchFailure> {
        self.token_request(&[
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("user_type", user_type),
        ])
        .await
    }

    // Codes and refresh tokens are single use, so a grant is never replayed.
    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenGrant, FetchFailure> {
        let request = FetchRequest::post_form(self.api("/oauth/token"), form);
        let policy = RetryPolicy {
            max_attempts: 1,
            ..self.fetcher.policy().clone()
        };
        let resp = self.fetcher.fetch_with(&request, &policy).await?;

        serde_json::from_str::<TokenGrant>(&resp.body)
            .map_err(|e| FetchFailure::data_shape(format!("invalid token response: {e}")))
    }
}
