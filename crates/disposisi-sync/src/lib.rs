//! Sync layer: HTTP client for the portal backend's disposition ledger and push registry.

mod error;
pub mod http;
pub mod retry;

pub use error::SyncError;
pub use http::PortalClient;
pub use retry::{RetryPolicy, with_retry};
