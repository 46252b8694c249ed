//! # SMS Gateway
//!
//! Outbound SMS provider boundary. The dispatch pipeline only talks to the
//! [`SmsGateway`] trait; [`TwilioGateway`] is the production implementation and
//! [`MockSmsGateway`] logs instead of sending.
//! The [`signature`] module verifies the provider's status callbacks.

/// Development gateway that only logs.
pub mod mock;
/// Status callback signature computation and verification.
pub mod signature;
/// Twilio REST client.
pub mod twilio;
/// Gateway trait, results and errors.
pub mod types;

pub use mock::MockSmsGateway;
pub use twilio::{TwilioConfig, TwilioGateway};
pub use types::*;
