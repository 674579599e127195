//! QueryDesk Library
//!
//! QueryDesk lets operators register external SQL data sources, organize
//! saved queries into folders with per-user access grants, and execute them
//! with timeouts, connect retries, health tracking and a templating layer
//! that lets one query splice another's result set into an `IN (...)` list.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod service;
pub mod store;
pub mod template;

pub use config::Config;
pub use error::{DeskError, DeskResult};
pub use service::QueryDesk;
