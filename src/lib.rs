pub mod aggregate;
pub mod api;
pub mod config;
pub mod crypto;
pub mod error;
pub mod export;
pub mod fetch;
pub mod leadconnector;
pub mod store;

pub use config::Config;
pub use error::{BrokerError, FetchError, FetchFailure};

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn store::CredentialStore>,
    pub crypto: crypto::CryptoEngine,
    pub client: leadconnector::LeadConnectorClient,
    pub exporter: Box<dyn export::ExportSink>,
}

pub type SharedState = Arc<AppState>;
