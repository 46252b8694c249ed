//! # Auth Services
//!
//! This crate identifies the actor behind a request.
//! It includes JWT token verification and the actix middleware that attaches the
//! authenticated [`types::Actor`] to each request.

/// JWT token handling.
pub mod jwt;
/// Middleware for request authentication.
pub mod middleware;
/// Types and structures used in authentication services.
pub mod types;
