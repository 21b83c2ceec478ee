//! Authentication primitives and the session service.
//!
//! - [`password`] -- Argon2id password hashing and verification.
//! - [`jwt`] -- JWT access-token generation and validation.
//! - [`service`] -- login, refresh-with-rotation and logout.

pub mod jwt;
pub mod password;
pub mod service;
