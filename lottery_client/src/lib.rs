//! Client library for the lottery session server.
//!
//! [`api_client::ApiClient`] wraps the HTTP API and keeps the session
//! credentials; [`refresh::RefreshCoordinator`] makes sure concurrent
//! requests that find their access token expired share one refresh call.

pub mod api_client;
pub mod refresh;
