use anyhow::{Context, Result};
use std::time::Duration;

use crate::aggregate::DEFAULT_WORKER_LIMIT;
use crate::fetch::RetryPolicy;

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    /// Public URL of this service, used to build the OAuth redirect URI.
    pub base_url: String,

    // ── Database ────────────────────────────────────────────────────────
    pub database_url: String,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM encryption.
    pub master_key: String,
    /// 32-byte base64-encoded HMAC key for state parameter signing.
    pub hmac_secret: String,
    /// When set, data routes require a matching `x-internal-secret` header.
    pub broker_secret: Option<String>,

    // ── LeadConnector OAuth app ─────────────────────────────────────────
    pub client_id: String,
    pub client_secret: String,
    pub user_type: String,
    pub scopes: Vec<String>,
    pub marketplace_url: String,
    pub api_url: String,
    pub company_id: String,
    pub app_id: String,

    // ── Fan-out / retry ─────────────────────────────────────────────────
    pub worker_limit: usize,
    pub fetch_max_attempts: u32,
    pub fetch_base_delay: Duration,
    pub fetch_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8000".into())
                .parse()
                .context("Invalid PORT")?,
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".into()),

            database_url: std::env::var("DATABASE_URL")
                .context("DATABASE_URL is required (PostgreSQL connection string)")?,
            master_key: std::env::var("MASTER_KEY")
                .context("MASTER_KEY is required (32 bytes, base64)")?,
            hmac_secret: std::env::var("HMAC_SECRET")
                .context("HMAC_SECRET is required (32 bytes, base64)")?,
            broker_secret: std::env::var("BROKER_SECRET").ok().filter(|s| !s.is_empty()),

            client_id: std::env::var("LC_CLIENT_ID").context("LC_CLIENT_ID is required")?,
            client_secret: std::env::var("LC_CLIENT_SECRET")
                .context("LC_CLIENT_SECRET is required")?,
            user_type: std::env::var("LC_USER_TYPE").unwrap_or_else(|_| "Location".into()),
            scopes: parse_scopes(&std::env::var("LC_SCOPES").unwrap_or_default()),
            marketplace_url: std::env::var("LC_MARKETPLACE_URL")
                .unwrap_or_else(|_| "https://marketplace.leadconnectorhq.com".into()),
            api_url: std::env::var("LC_API_URL")
                .unwrap_or_else(|_| "https://services.leadconnectorhq.com".into()),
            company_id: std::env::var("LC_COMPANY_ID").context("LC_COMPANY_ID is required")?,
            app_id: std::env::var("LC_APP_ID").context("LC_APP_ID is required")?,

            worker_limit: std::env::var("WORKER_LIMIT")
                .unwrap_or_else(|_| DEFAULT_WORKER_LIMIT.to_string())
                .parse()
                .context("Invalid WORKER_LIMIT")?,
            fetch_max_attempts: std::env::var("FETCH_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "5".into())
                .parse()
                .context("Invalid FETCH_MAX_ATTEMPTS")?,
            fetch_base_delay: Duration::from_millis(
                std::env::var("FETCH_BASE_DELAY_MS")
                    .unwrap_or_else(|_| "1000".into())
                    .parse()
                    .context("Invalid FETCH_BASE_DELAY_MS")?,
            ),
            fetch_timeout: Duration::from_secs(
                std::env::var("FETCH_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "100".into())
                    .parse()
                    .context("Invalid FETCH_TIMEOUT_SECS")?,
            ),
        })
    }

    /// OAuth redirect URI registered with the marketplace app.
    pub fn callback_url(&self) -> String {
        format!("{}/v1/oauth/callback", self.base_url.trim_end_matches('/'))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.fetch_max_attempts,
            base_delay: self.fetch_base_delay,
            timeout: self.fetch_timeout,
            ..RetryPolicy::default()
        }
    }
}

/// Accepts either space- or comma-separated scope lists.
fn parse_scopes(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 8000,
        base_url: "http://127.0.0.1:8000".into(),
        database_url: String::new(),
        master_key: String::new(),
        hmac_secret: String::new(),
        broker_secret: None,
        client_id: "client-1".into(),
        client_secret: "secret-1".into(),
        user_type: "Location".into(),
        scopes: vec!["users.readonly".into(), "locations.readonly".into()],
        marketplace_url: "https://marketplace.test".into(),
        api_url: "https://api.test".into(),
        company_id: "comp-1".into(),
        app_id: "app-1".into(),
        worker_limit: 4,
        fetch_max_attempts: 5,
        fetch_base_delay: Duration::from_millis(10),
        fetch_timeout: Duration::from_secs(5),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_accept_commas_and_spaces() {
        assert_eq!(
            parse_scopes("users.readonly, locations.readonly oauth.write"),
            vec!["users.readonly", "locations.readonly", "oauth.write"]
        );
        assert!(parse_scopes("  ").is_empty());
    }

    #[test]
    fn test_callback_url_is_under_v1() {
        let mut config = test_config();
        config.base_url = "https://broker.example.com/".into();
        assert_eq!(config.callback_url(), "https://broker.example.com/v1/oauth/callback");
    }

    #[test]
    fn test_retry_policy_follows_config() {
        let policy = test_config().retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(10));
        assert_eq!(policy.timeout, Duration::from_secs(5));
    }
}
