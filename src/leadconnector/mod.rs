//! Client for the LeadConnector REST API.
//!
//! Every call goes through the shared [`Fetcher`], so rate limiting and
//! transport retries behave the same for OAuth and data endpoints.

mod locations;
mod oauth;
mod users;

pub use locations::{LocationRef, LocationToken};
pub use oauth::TokenGrant;

use crate::config::Config;
use crate::fetch::{FetchRequest, Fetcher};

/// Value of the `Version` header the v2 API requires.
pub const API_VERSION: &str = "2021-07-28";

#[derive(Clone)]
pub struct LeadConnectorClient {
    fetcher: Fetcher,
    api_url: String,
    marketplace_url: String,
    client_id: String,
    client_secret: String,
}

impl LeadConnectorClient {
    pub fn new(
        fetcher: Fetcher,
        api_url: impl Into<String>,
        marketplace_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            marketplace_url: marketplace_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn from_config(config: &Config, fetcher: Fetcher) -> Self {
        Self::new(
            fetcher,
            &config.api_url,
            &config.marketplace_url,
            &config.client_id,
            &config.client_secret,
        )
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    /// Bearer-authenticated GET against the versioned API.
    fn authed_get(&self, url: String, token: &str) -> FetchRequest {
        FetchRequest::get(url)
            .bearer(token)
            .header("Version", API_VERSION)
    }
}

#[cfg(test)]
pub(crate) fn test_client(
    transport: std::sync::Arc<crate::fetch::testing::ScriptedTransport>,
) -> LeadConnectorClient {
    use crate::fetch::RetryPolicy;
    use std::time::Duration;

    let fetcher = Fetcher::new(
        transport,
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            ..Default::default()
        },
    );
    LeadConnectorClient::new(
        fetcher,
        "https://api.test",
        "https://marketplace.test",
        "client-1",
        "secret-1",
    )
}
