use serde_json::Value;
use tracing::{info, warn};

use super::{LeadConnectorClient, API_VERSION};
use crate::error::FetchFailure;
use crate::fetch::FetchRequest;

/// Provider identifier of a location (sub-account).
pub type LocationRef = String;

/// Result of a location token exchange. Fields the provider omitted are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationToken {
    pub location_id: Option<String>,
    pub access_token: Option<String>,
}

impl LeadConnectorClient {
    /// Locations where the app is installed under `company_id`.
    ///
    /// A response without a `locations` field yields an empty list: accounts
    /// with no linked locations are normal.
    pub async fn list_locations(
        &self,
        token: &str,
        company_id: &str,
        app_id: &str,
    ) -> Result<Vec<LocationRef>, FetchFailure> {
        let url = format!(
            "{}?{}",
            self.api("/oauth/installedLocations"),
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair("companyId", company_id)
                .append_pair("appId", app_id)
                .append_pair("limit", "500")
                .finish()
        );
        info!(company_id, app_id, "Fetching installed locations");

        let body = self.fetcher.fetch(&self.authed_get(url, token)).await?.json()?;
        Ok(location_ids(&body))
    }

    /// Trade the company token for a token scoped to one location.
    pub async fn exchange_location_token(
        &self,
        parent_token: &str,
        company_id: &str,
        location_id: &str,
    ) -> Result<LocationToken, FetchFailure> {
        let request = FetchRequest::post_form(
            self.api("/oauth/locationToken"),
            &[("companyId", company_id), ("locationId", location_id)],
        )
        .bearer(parent_token)
        .header("Version", API_VERSION);
        info!(location_id, "Fetching location access token");

        let body = self.fetcher.fetch(&request).await?.json()?;
        Ok(LocationToken {
            location_id: body["locationId"].as_str().map(str::to_string),
            access_token: body["access_token"].as_str().map(str::to_string),
        })
    }
}

fn location_ids(body: &Value) -> Vec<LocationRef> {
    let Some(locations) = body.get("locations").and_then(Value::as_array) else {
        warn!("No locations found in response");
        return Vec::new();
    };

    locations
        .iter()
        .filter_map(|loc| match loc.get("_id").and_then(Value::as_str) {
            Some(id) => Some(id.to_string()),
            None => {
                warn!("Skipping location entry without _id");
                None
            }
        })
        .collect()
}
