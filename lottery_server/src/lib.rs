//! HTTP front end for the lottery session service.
//!
//! The binary in `main.rs` wires configuration, logging and metrics around
//! [`api::create_router`]; the modules are exposed here so integration tests
//! can drive the router directly.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
