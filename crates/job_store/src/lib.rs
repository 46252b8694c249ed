//! # Job Store
//!
//! Persistence for bulk SMS jobs and their recipients. The [`JobStore`] trait
//! is the contract the dispatch pipeline is written against; [`PgJobStore`]
//! implements it on PostgreSQL and [`MemoryJobStore`] in process.

/// Connection pool and migration helpers.
pub mod database;
/// In-process implementation for tests and local development.
pub mod memory;
/// PostgreSQL implementation.
pub mod postgres;
/// The store contract.
pub mod store;
/// Job and recipient records.
pub mod types;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;
pub use store::JobStore;
pub use types::*;
