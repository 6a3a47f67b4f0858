//! Testing utilities for code built on keel.
//!
//! Provides an in-memory ledger for exercising the engine without a database,
//! and explicit PostgreSQL provisioning for integration tests.

mod db;
mod memory;

pub use db::{IsolatedTestDb, TestDatabase};
pub use memory::MemoryLedger;
