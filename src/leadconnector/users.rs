use serde_json::Value;
use tracing::{info, warn};

use super::LeadConnectorClient;
use crate::error::FetchFailure;

impl LeadConnectorClient {
    /// Raw user objects for one location, fetched with that location's token.
    pub async fn list_users(&self, token: &str, location_id: &str) -> Result<Vec<Value>, FetchFailure> {
        let url = format!(
            "{}?{}",
            self.api("/users/"),
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair("locationId", location_id)
                .finish()
        );
        info!(location_id, "Fetching users");

        let mut body = self.fetcher.fetch(&self.authed_get(url, token)).await?.json()?;
        match body.get_mut("users").map(Value::take) {
            Some(Value::Array(users)) => Ok(users),
            _ => {
                warn!(location_id, "No users found in response");
                Ok(Vec::new())
            }
        }
    }
}
