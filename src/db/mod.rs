//! Database access layer.
//!
//! This module provides the pieces query execution is built from:
//! - Transient connections with retry (`connector`)
//! - Connection health tracking (`health`)
//! - The execution engine itself (`engine`)
//! - Row-to-JSON normalization (`rows`)
//! - The advisory result cache (`cache`)

pub mod cache;
pub mod connector;
pub mod engine;
pub mod health;
pub mod rows;

pub use cache::ResultCache;
pub use connector::{DbConnection, Dial, RetryDial};
pub use engine::ExecutionEngine;
pub use health::HealthTracker;
pub use rows::RowToJson;
