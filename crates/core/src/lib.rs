//! Domain core for the warden session-security and abuse-control service.
//!
//! - [`session`] -- refresh-token sessions, the rotation state machine and its store.
//! - [`rate_limit`] -- fixed-window rate limiting with pluggable backends.
//! - [`abuse`] -- per-route, per-identity guard over a rate-limit backend.
//! - [`visitor`] -- anonymous visitor sessions and traffic aggregates.
//!
//! Nothing here depends on a specific database or cache driver; those live in
//! `warden-db` and `warden-cache`.

pub mod abuse;
pub mod clock;
pub mod error;
pub mod hashing;
pub mod rate_limit;
pub mod session;
pub mod types;
pub mod users;
pub mod visitor;
