use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{error, info, warn};

use super::project::{project, UserRecord};
use crate::error::FetchFailure;
use crate::leadconnector::LeadConnectorClient;

/// Which step of a location's pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    TokenExchange,
    UserFetch,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::TokenExchange => "token_exchange",
            Stage::UserFetch => "user_fetch",
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationFailure {
    pub location_id: String,
    pub stage: Stage,
    pub error: FetchFailure,
}

/// Users gathered across all locations plus the locations that failed.
#[derive(Debug, Default)]
pub struct AggregateReport {
    /// Deduplicated by user id, sorted by id.
    pub users: Vec<UserRecord>,
    pub failures: Vec<LocationFailure>,
    /// Number of distinct locations enumerated.
    pub locations: usize,
}

/// Enumerate locations under `company_id`, then run token exchange and user
/// listing for each with at most `worker_limit` locations in flight.
///
/// Only a failed enumeration is an error. Per-location failures are returned
/// in the report and never stop the other locations.
pub async fn aggregate_users(
    client: &LeadConnectorClient,
    parent_token: &str,
    company_id: &str,
    app_id: &str,
    worker_limit: usize,
) -> Result<AggregateReport, FetchFailure> {
    let listed = client.list_locations(parent_token, company_id, app_id).await?;
    let listed_count = listed.len();
    let locations: BTreeSet<String> = listed.into_iter().collect();
    if locations.len() < listed_count {
        warn!(
            listed = listed_count,
            unique = locations.len(),
            "Dropped duplicate location ids from enumeration"
        );
    }
    let worker_limit = worker_limit.max(1);
    info!(locations = locations.len(), worker_limit, "Aggregating users across locations");

    let mut merged: BTreeMap<String, UserRecord> = BTreeMap::new();
    let mut anonymous: Vec<UserRecord> = Vec::new();
    let mut failures = Vec::new();

    let mut outcomes = stream::iter(locations.iter().cloned())
        .map(|location_id: String| async move {
            let outcome = process_location(client, parent_token, company_id, &location_id).await;
            (location_id, outcome)
        })
        .buffer_unordered(worker_limit);

    while let Some((location_id, outcome)) = outcomes.next().await {
        match outcome {
            Ok(raw_users) => {
                for raw in &raw_users {
                    let record = project(raw);
                    if record.id.is_empty() {
                        anonymous.push(record);
                        continue;
                    }
                    match merged.get_mut(&record.id) {
                        Some(existing) => existing.merge(record),
                        None => {
                            merged.insert(record.id.clone(), record);
                        }
                    }
                }
            }
            Err((stage, failure)) => {
                error!(
                    location_id = %location_id,
                    stage = stage.as_str(),
                    cause = failure.cause.label(),
                    "Error retrieving data for location: {failure}"
                );
                failures.push(LocationFailure {
                    location_id,
                    stage,
                    error: failure,
                });
            }
        }
    }
    drop(outcomes);

    anonymous.sort_by(|a, b| (&a.email, &a.name, &a.phone).cmp(&(&b.email, &b.name, &b.phone)));
    failures.sort_by(|a, b| a.location_id.cmp(&b.location_id));

    let mut users: Vec<UserRecord> = merged.into_values().collect();
    users.extend(anonymous);

    info!(
        users = users.len(),
        failed_locations = failures.len(),
        "Aggregation finished"
    );
    Ok(AggregateReport {
        users,
        failures,
        locations: locations.len(),
    })
}

/// Token exchange followed by user listing for one location.
async fn process_location(
    client: &LeadConnectorClient,
    parent_token: &str,
    company_id: &str,
    location_id: &str,
) -> Result<Vec<Value>, (Stage, FetchFailure)> {
    let token = client
        .exchange_location_token(parent_token, company_id, location_id)
        .await
        .map_err(|e| (Stage::TokenExchange, e))?;

    let access_token = token.access_token.ok_or_else(|| {
        (
            Stage::TokenExchange,
            FetchFailure::data_shape("location token response has no access_token"),
        )
    })?;

    client
        .list_users(&access_token, location_id)
        .await
        .map_err(|e| (Stage::UserFetch, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::testing::{Reply, ScriptedTransport};
    use crate::leadconnector::test_client;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    fn with_locations(transport: ScriptedTransport, ids: &[&str]) -> ScriptedTransport {
        let locations: Vec<_> = ids.iter().map(|id| json!({"_id": id})).collect();
        transport.route(
            &["/oauth/installedLocations"],
            Reply::json(json!({"locations": locations})),
        )
    }

    fn healthy_location(transport: ScriptedTransport, id: &str, users: serde_json::Value) -> ScriptedTransport {
        transport
            .route(
                &["/oauth/locationToken", format!("locationId={id}").as_str()],
                Reply::json(json!({"locationId": id, "access_token": format!("tok-{id}")})),
            )
            .route(
                &["/users/", format!("locationId={id}").as_str()],
                Reply::json(json!({"users": users})),
            )
    }

    fn user(id: &str, location: &str) -> serde_json::Value {
        json!({"id": id, "name": id.to_uppercase(), "roles": {"role": ["user"], "locationIds": [location]}})
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_location_exhausting_transport_retries_is_isolated() {
        let mut transport = with_locations(ScriptedTransport::new(), &["loc-a", "loc-b", "loc-c"]);
        transport = healthy_location(transport, "loc-a", json!([user("alice", "loc-a")]));
        transport = transport.route(
            &["/oauth/locationToken", "locationId=loc-b"],
            Reply::transport_error(),
        );
        transport = healthy_location(transport, "loc-c", json!([user("carol", "loc-c")]));
        let transport = Arc::new(transport);

        let report = aggregate_users(&test_client(transport.clone()), "parent", "comp-1", "app-1", 10)
            .await
            .unwrap();

        let ids: Vec<_> = report.users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "carol"]);
        assert_eq!(report.locations, 3);
        assert_eq!(report.failures.len(), 1);

        let failure = &report.failures[0];
        assert_eq!(failure.location_id, "loc-b");
        assert_eq!(failure.stage, Stage::TokenExchange);
        assert!(matches!(failure.error.cause, FetchError::Transport(_)));
        assert_eq!(failure.error.cause.label(), "transport");
        assert_eq!(failure.error.attempts, 5);
        assert_eq!(transport.calls_to("locationId=loc-b"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_and_successes_partition_the_locations() {
        let ids = ["loc-1", "loc-2", "loc-3", "loc-4", "loc-5", "loc-6"];
        let failing = ["loc-2", "loc-5"];
        let mut transport = with_locations(ScriptedTransport::new(), &ids);
        for id in ids {
            if failing.contains(&id) {
                transport = transport.route(
                    &["/oauth/locationToken", format!("locationId={id}").as_str()],
                    Reply::status_body(403, "forbidden"),
                );
            } else {
                transport = healthy_location(transport, id, json!([user(&format!("u-{id}"), id)]));
            }
        }

        let report = aggregate_users(&test_client(Arc::new(transport)), "parent", "comp-1", "app-1", 3)
            .await
            .unwrap();

        assert_eq!(report.users.len(), ids.len() - failing.len());
        assert_eq!(report.failures.len(), failing.len());

        let succeeded: HashSet<_> = report
            .users
            .iter()
            .flat_map(|u| u.location_ids.iter().cloned())
            .collect();
        for failure in &report.failures {
            assert!(failing.contains(&failure.location_id.as_str()));
            assert!(!succeeded.contains(&failure.location_id));
            assert!(!failure.error.retryable());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_fetch_failure_is_attributed_to_its_stage() {
        let mut transport = with_locations(ScriptedTransport::new(), &["loc-a", "loc-b"]);
        transport = healthy_location(transport, "loc-a", json!([user("alice", "loc-a")]));
        transport = transport
            .route(
                &["/oauth/locationToken", "locationId=loc-b"],
                Reply::json(json!({"locationId": "loc-b", "access_token": "tok-b"})),
            )
            .route(&["/users/", "locationId=loc-b"], Reply::status(500));

        let report = aggregate_users(&test_client(Arc::new(transport)), "parent", "comp-1", "app-1", 2)
            .await
            .unwrap();

        assert_eq!(report.users.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::UserFetch);
        assert_eq!(report.failures[0].error.cause.label(), "client");
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_location_access_token_fails_that_location() {
        let transport = with_locations(ScriptedTransport::new(), &["loc-a"]).route(
            &["/oauth/locationToken"],
            Reply::json(json!({"locationId": "loc-a"})),
        );
        let transport = Arc::new(transport);

        let report = aggregate_users(&test_client(transport.clone()), "parent", "comp-1", "app-1", 2)
            .await
            .unwrap();

        assert!(report.users.is_empty());
        assert_eq!(report.failures[0].error.cause.label(), "data_shape");
        assert_eq!(transport.calls_to("/users/"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_user_in_two_locations_is_merged() {
        let mut transport = with_locations(ScriptedTransport::new(), &["loc-a", "loc-b"]);
        transport = healthy_location(transport, "loc-a", json!([user("shared", "loc-a")]));
        transport = healthy_location(
            transport,
            "loc-b",
            json!([user("shared", "loc-b"), {"name": "no id"}]),
        );

        let report = aggregate_users(&test_client(Arc::new(transport)), "parent", "comp-1", "app-1", 2)
            .await
            .unwrap();

        assert_eq!(report.users.len(), 2);
        assert_eq!(report.users[0].id, "shared");
        assert_eq!(report.users[0].location_ids.len(), 2);
        assert_eq!(report.users[1].name, "no id");
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_limit_caps_concurrent_calls() {
        let ids: Vec<String> = (0..20).map(|i| format!("loc-{i:02}")).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let mut transport =
            with_locations(ScriptedTransport::new().with_latency(Duration::from_millis(50)), &id_refs);
        for id in &ids {
            transport = healthy_location(transport, id, json!([user(&format!("u-{id}"), id)]));
        }
        let transport = Arc::new(transport);

        let report = aggregate_users(&test_client(transport.clone()), "parent", "comp-1", "app-1", 3)
            .await
            .unwrap();

        assert_eq!(report.users.len(), 20);
        assert!(report.failures.is_empty());
        assert!(transport.peak_concurrency() <= 3);
        assert_eq!(transport.peak_concurrency(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_location_ids_run_once() {
        let transport = with_locations(ScriptedTransport::new(), &["loc-a", "loc-a"])
            .route_sequence(
                &["/oauth/locationToken", "locationId=loc-a"],
                vec![
                    Reply::status_body(403, "forbidden"),
                    Reply::json(json!({"locationId": "loc-a", "access_token": "tok-a"})),
                ],
            )
            .route(
                &["/users/", "locationId=loc-a"],
                Reply::json(json!({"users": [user("u1", "loc-a")]})),
            );
        let transport = Arc::new(transport);

        let report = aggregate_users(&test_client(transport.clone()), "parent", "comp-1", "app-1", 1)
            .await
            .unwrap();

        assert_eq!(report.locations, 1);
        assert_eq!(transport.calls_to("/oauth/locationToken"), 1);
        assert!(report.users.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].location_id, "loc-a");
    }

    #[tokio::test(start_paused = true)]
    async fn test_enumeration_failure_fails_the_batch() {
        let transport = Arc::new(
            ScriptedTransport::new().route(&["/oauth/installedLocations"], Reply::status(401)),
        );
        let err = aggregate_users(&test_client(transport), "parent", "comp-1", "app-1", 4)
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_locations_is_an_empty_report() {
        let transport = Arc::new(with_locations(ScriptedTransport::new(), &[]));
        let report = aggregate_users(&test_client(transport), "parent", "comp-1", "app-1", 0)
            .await
            .unwrap();
        assert!(report.users.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(report.locations, 0);
    }
}
