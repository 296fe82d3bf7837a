//! Fan-out of per-location token exchange and user listing, merged into a
//! single deduplicated user set.

pub mod fanout;
pub mod project;

pub use fanout::{aggregate_users, AggregateReport, LocationFailure, Stage};
pub use project::{project, UserRecord};

/// Default ceiling on concurrently processed locations.
pub const DEFAULT_WORKER_LIMIT: usize = 10;
