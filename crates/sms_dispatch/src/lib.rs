//! # SMS Dispatch
//!
//! The bulk send pipeline. Admission turns a request into a persisted job,
//! the engine drains its pending recipients through an [`sms_gateway::SmsGateway`],
//! and the correlator folds provider delivery callbacks back into the job.

/// Send admission: validation, rate limiting and job creation
pub mod admission;
/// Delivery status callback handling
pub mod correlator;
/// Dispatch engine draining a job's recipients
pub mod engine;
/// US phone number normalization
pub mod phone;
/// Background worker hosting the engine
pub mod queue;

pub use admission::{AdmissionConfig, AdmissionController, SendError};
pub use correlator::{CallbackOutcome, DeliveryCorrelator, IgnoreReason};
pub use engine::{DispatchConfig, DispatchEngine, DispatchError, DispatchOutcome};
pub use queue::{DispatchNotifier, DispatchQueue, QueueConfig};
