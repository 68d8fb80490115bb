//! `marketplace-http` is the async HTTP client the marketplace uses to talk
//! to its REST backend.
//!
//! Every call made through [`ApiClient::request`] gets:
//! - a bearer token from the configured [`TokenStore`], unless the caller
//!   set `Authorization` itself
//! - deduplication of concurrent identical GET requests
//! - retries on 429/502/503 with exponential backoff (1s, 2s, 4s by default)
//! - a classified [`ApiError`] on failure

mod client;
pub mod config;
mod error;
mod inflight;
mod options;
mod params;
pub mod token;
mod types;

pub use client::ApiClient;
pub use error::{ApiError, ClientErrorReason, ErrorClass};
pub use options::ClientOptions;
pub use params::Params;
pub use token::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use types::{ApiRequest, ApiResponse, Method};

pub type Result<T> = std::result::Result<T, ApiError>;
