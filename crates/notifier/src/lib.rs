//! HTTP client for the association / billing service.

mod http;

pub use http::HttpNotifier;
