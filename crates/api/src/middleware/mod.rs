//! Request extractors and middleware.
//!
//! - [`auth::AuthUser`] -- Extracts the authenticated user from a JWT Bearer token.
//! - [`client::ClientContext`] -- Client identity for rate limiting and session metadata.
//! - [`telemetry::track_visitor`] -- Best-effort visitor session tracking.

pub mod auth;
pub mod client;
pub mod telemetry;
