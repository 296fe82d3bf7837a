//! API route handlers.
//!
//! All handlers receive `SharedState` via Axum state extraction and return
//! `BrokerError` on failure, which renders as a JSON error body.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::aggregate::{aggregate_users, AggregateReport};
use crate::error::BrokerError;
use crate::export::COLUMNS;
use crate::store::{ensure_fresh, refresh_expired, Credential, CredentialKey};
use crate::SharedState;

// =============================================================================
// V1 Router
// =============================================================================

pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/oauth/authorize", get(oauth_authorize))
        .route("/oauth/callback", get(oauth_callback))
        .route("/oauth/refresh", post(oauth_refresh))
        // ── Users ────────────────────────────────────────────────────────
        .route("/users", get(users_list))
        .route("/users/export", get(users_export))
        .with_state(state)
}

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "leadconnector-broker",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Data routes require the shared secret when one is configured.
fn require_secret(state: &SharedState, headers: &HeaderMap) -> Result<(), BrokerError> {
    let Some(expected) = state.config.broker_secret.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get("x-internal-secret")
        .and_then(|v| v.to_str().ok())
        .ok_or(BrokerError::Unauthorized)?;

    if provided != expected {
        return Err(BrokerError::Unauthorized);
    }
    Ok(())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// =============================================================================
// OAuth Endpoints
// =============================================================================

/// GET /v1/oauth/authorize: Redirect to the marketplace location chooser.
async fn oauth_authorize(State(state): State<SharedState>) -> Result<Response, BrokerError> {
    if state.config.client_id.is_empty() {
        return Err(BrokerError::NotConfigured("LC_CLIENT_ID".into()));
    }
    if state.config.scopes.is_empty() {
        return Err(BrokerError::NotConfigured("LC_SCOPES".into()));
    }

    let signed_state = state.crypto.issue_state(now())?;
    let url = state.client.authorize_url(
        &state.config.scopes,
        &state.config.callback_url(),
        &signed_state,
    );

    Ok(Redirect::temporary(&url).into_response())
}

#[derive(Deserialize)]
struct OAuthCallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

/// GET /v1/oauth/callback: Exchange the authorization code and store the tokens.
async fn oauth_callback(
    State(state): State<SharedState>,
    Query(q): Query<OAuthCallbackQuery>,
) -> Result<Json<serde_json::Value>, BrokerError> {
    let code = q
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| BrokerError::BadRequest("Authorization code is required".into()))?;

    // The chooser does not always echo `state`; verify it when it does.
    match q.state.as_deref() {
        Some(signed) => state.crypto.verify_state(signed, now())?,
        None => warn!("OAuth callback without state parameter"),
    }

    let grant = state.client.exchange_code(&code, &state.config.user_type).await?;
    let issued_at = now();
    let credential = Credential::from_grant(&grant, &code, &state.config.user_type, issued_at)?;
    let outcome = state.store.put_credential(&credential).await?;

    info!(
        user_type = credential.scope_kind.as_str(),
        company_id = %credential.parent_id,
        location_id = credential.sub_id.as_deref().unwrap_or_default(),
        "{}",
        outcome.message()
    );

    Ok(Json(json!({
        "message": outcome.message(),
        "access_token": credential.access_token,
        "refresh_token": credential.refresh_token,
        "expires_in": grant.expires_in,
        "expire": credential.expiry,
        "token_type": credential.token_type,
        "user_type": credential.scope_kind.as_str(),
        "company_id": credential.parent_id,
        "location_id": credential.sub_id.clone().unwrap_or_default(),
        "user_id": credential.user_id,
    })))
}

/// POST /v1/oauth/refresh: Refresh every expired credential.
async fn oauth_refresh(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, BrokerError> {
    require_secret(&state, &headers)?;
    let summary = refresh_expired(state.store.as_ref(), &state.client, now()).await?;
    Ok(Json(json!({ "data": summary })))
}

// =============================================================================
// User Endpoints
// =============================================================================

/// Refresh what has expired, then aggregate users under the configured company.
///
/// The company token goes first: a failed refresh returns here, so its
/// refresh token is never sent a second time by the sweep below.
async fn collect_users(state: &SharedState) -> Result<AggregateReport, BrokerError> {
    let store = state.store.as_ref();
    let key = CredentialKey::company(&state.config.company_id);
    let credential = ensure_fresh(store, &state.client, &key, now()).await?;

    refresh_expired(store, &state.client, now()).await?;

    let report = aggregate_users(
        &state.client,
        &credential.access_token,
        &state.config.company_id,
        &state.config.app_id,
        state.config.worker_limit,
    )
    .await?;
    Ok(report)
}

fn failures_json(report: &AggregateReport) -> serde_json::Value {
    report
        .failures
        .iter()
        .map(|f| {
            json!({
                "location_id": f.location_id,
                "stage": f.stage.as_str(),
                "cause": f.error.cause.label(),
                "attempts": f.error.attempts,
                "message": f.error.cause.to_string(),
            })
        })
        .collect()
}

/// GET /v1/users: Aggregated users plus the locations that failed.
async fn users_list(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, BrokerError> {
    require_secret(&state, &headers)?;
    let report = collect_users(&state).await?;

    Ok(Json(json!({
        "data": {
            "locations": report.locations,
            "users": report.users,
            "failures": failures_json(&report),
        }
    })))
}

/// GET /v1/users/export: Aggregated users as a file download.
async fn users_export(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Response, BrokerError> {
    require_secret(&state, &headers)?;
    let report = collect_users(&state).await?;

    let exporter = state.exporter.as_ref();
    let body = exporter.render(&report.users, &COLUMNS);
    let filename = format!(
        "users-{}.{}",
        chrono::Utc::now().format("%Y%m%d-%H%M%S"),
        exporter.file_extension()
    );

    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(exporter.content_type()),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .map_err(|e| BrokerError::Internal(e.to_string()))?,
    );
    headers.insert("x-failed-locations", HeaderValue::from(report.failures.len()));

    Ok(response)
}
