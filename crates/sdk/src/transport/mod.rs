//! Transport layer for the OpenPact SDK.

pub mod http;

pub use http::HttpTransport;
