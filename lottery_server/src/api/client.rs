//! Caller facts extracted from the request.

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header::USER_AGENT, request::Parts},
};
use lottery::auth::ClientInfo;
use std::convert::Infallible;
use std::net::SocketAddr;

/// Header set by reverse proxies
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Client IP and user agent of the current request
///
/// The IP is the first hop of `X-Forwarded-For` when present, otherwise the
/// socket peer (available when the server is started with connect info).
#[derive(Debug, Clone, Default)]
pub struct ClientContext(pub ClientInfo);

impl ClientContext {
    pub fn info(&self) -> &ClientInfo {
        &self.0
    }

    pub fn ip(&self) -> Option<&str> {
        self.0.ip.as_deref()
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get(FORWARDED_FOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = forwarded_ip(&parts.headers).or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Ok(ClientContext(ClientInfo { ip, user_agent }))
    }
}
