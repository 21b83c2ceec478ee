//! Client identity derived from request headers.
//!
//! The raw IP never leaves this request: rate limiting, refresh sessions and
//! visitor telemetry see its salted hash.

use std::convert::Infallible;

use axum::extract::FromRequestParts;
use axum::http::header::{REFERER, USER_AGENT};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use warden_core::abuse::ClientIdentity;
use warden_core::hashing::hash_identity;
use warden_core::visitor::VisitorTelemetry;

use crate::state::AppState;

/// Opaque client-generated visitor identifier.
pub const VISITOR_ID_HEADER: &str = "x-visitor-id";

const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";
const REAL_IP_HEADER: &str = "x-real-ip";

/// Longest user agent kept on a session record.
const MAX_USER_AGENT_LEN: usize = 256;

#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub identity: ClientIdentity,
    pub visitor_id: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referrer: Option<String>,
}

impl ClientContext {
    pub fn from_headers(headers: &HeaderMap, salt: &str) -> Self {
        let visitor_id = header_str(headers, VISITOR_ID_HEADER).map(str::to_string);
        let ip = client_ip(headers);
        let user_agent = header_str(headers, USER_AGENT.as_str())
            .map(|ua| ua.chars().take(MAX_USER_AGENT_LEN).collect::<String>());
        let referrer = header_str(headers, REFERER.as_str()).map(str::to_string);

        let identity = ClientIdentity {
            visitor_id: visitor_id.clone(),
            ip_hash: ip.as_deref().map(|ip| hash_identity(ip, salt)),
        };

        Self {
            identity,
            visitor_id,
            ip,
            user_agent,
            referrer,
        }
    }

    /// Hashed telemetry for the visitor tracker, if the request carries a
    /// visitor id.
    pub fn telemetry(&self, salt: &str) -> Option<VisitorTelemetry> {
        let visitor_id = self.visitor_id.as_deref()?;
        Some(VisitorTelemetry::from_raw(
            visitor_id,
            self.ip.as_deref(),
            self.user_agent.as_deref(),
            self.referrer.as_deref(),
            salt,
        ))
    }
}

impl FromRequestParts<AppState> for ClientContext {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(Self::from_headers(
            &parts.headers,
            &state.config.identity_hash_salt,
        ))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// First `x-forwarded-for` entry, else `x-real-ip`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, FORWARDED_FOR_HEADER)
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header_str(headers, REAL_IP_HEADER))
        .map(str::to_string)
}
