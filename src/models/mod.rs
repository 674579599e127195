//! Data models for QueryDesk.
//!
//! This module re-exports all model types used throughout the crate.

pub mod catalog;
pub mod connection;
pub mod query;

// Re-export commonly used types
pub use catalog::{Folder, Grant, GrantSet, GrantTarget, SavedQuery, names_equal_ci};
pub use connection::{
    ConnectionDefinition, ConnectionPatch, ConnectionStatus, EngineKind, NewConnection,
};
pub use query::{DateRange, ExecutionResult, QueryParam, RowBatch};
