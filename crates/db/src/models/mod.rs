//! Row types for each table, with conversions into the `warden-core` domain types.

pub mod rate_limit;
pub mod session;
pub mod user;
pub mod visitor;
