//! Resilient outbound HTTP for the provider API.
//!
//! A single [`Fetcher`] wraps one [`HttpTransport`] and retries each request
//! according to its [`RetryPolicy`]: HTTP 429 backs off exponentially with
//! jitter, transport failures back off exponentially without jitter, and any
//! other error status fails on the spot.

mod retry;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use retry::{Fetcher, RetryPolicy};
pub use transport::{FetchRequest, FetchResponse, HttpTransport, Method, ReqwestTransport};

use crate::error::FetchFailure;

/// Result of one logical fetch, after retries.
pub type FetchOutcome = Result<FetchResponse, FetchFailure>;
