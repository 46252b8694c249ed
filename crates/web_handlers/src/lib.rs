//! # Web Handlers for the Bulk SMS Service
//!
//! This crate provides the HTTP handlers for admitting bulk sends, reading
//! their progress and receiving provider delivery callbacks.

/// Request and response types for the send API
mod send_types;
pub use send_types::*;

/// Handlers for the authenticated send API
mod send_handlers;
pub use send_handlers::*;

/// Provider status callback handler
mod webhook_handlers;
pub use webhook_handlers::*;
