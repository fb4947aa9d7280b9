//! `prospector-auth`: authentication boundary for the HTTP surface.
//!
//! This crate is intentionally decoupled from HTTP and storage: it only knows
//! how to turn a bearer token into the [`UserId`](prospector_core::UserId)
//! every request is scoped to.

pub mod claims;
pub mod jwt;

pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
