//! Shared utilities for the device access hub server and reference client
//!
//! This crate holds the ambient stack used by both binaries: error types,
//! tracing setup, and the narrow runtime configuration store.

pub mod config_store;
pub mod error;
pub mod logging;

pub use config_store::{ConfigStore, InMemoryConfigStore, device_service_key};
pub use error::{Error, Result};
pub use logging::setup_logging;
