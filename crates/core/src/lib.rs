// Core types and functionality for the OpenPact control plane

pub mod auth;
pub mod config;
pub mod secrets;

pub use config::{ConfigError, ConfigOverrides, ServerConfig};
