//! REST API access for the platform.
//!
//! This module provides the `Transport` seam the core talks through, the
//! reqwest-backed `HttpTransport`, and the typed `ApiClient`.
//!
//! Every endpoint answers with the same `{success, data, message}` envelope;
//! the bearer token is taken from the shared store on each request.

pub mod client;
pub mod error;
pub mod http;
pub mod transport;

pub use client::ApiClient;
pub use error::ApiError;
pub use http::HttpTransport;
pub use transport::{ApiRequest, Envelope, Method, Transport};
