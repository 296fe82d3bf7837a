use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use leadconnector_broker::crypto::CryptoEngine;
use leadconnector_broker::export::CsvExport;
use leadconnector_broker::fetch::{Fetcher, ReqwestTransport};
use leadconnector_broker::leadconnector::LeadConnectorClient;
use leadconnector_broker::store::TokenStore;
use leadconnector_broker::{api, AppState, Config, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadconnector_broker=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    info!("leadconnector-broker v{}", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}:{}", config.host, config.port);

    let crypto = CryptoEngine::new(&config.master_key, &config.hmac_secret)?;
    let store = TokenStore::new(&config.database_url, crypto.clone()).await?;
    store.bootstrap().await?;
    info!("Database connected ✓");

    let fetcher = Fetcher::new(Arc::new(ReqwestTransport::new()), config.retry_policy());
    let client = LeadConnectorClient::from_config(&config, fetcher);

    let state: SharedState = Arc::new(AppState {
        config: config.clone(),
        store: Arc::new(store),
        crypto,
        client,
        exporter: Box::new(CsvExport),
    });

    let app = api::router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server ready ✓");
    axum::serve(listener, app).await?;

    Ok(())
}
