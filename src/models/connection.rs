//! Connection-related data models.
//!
//! This module defines types for registered data-source definitions and
//! their derived health state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Supported target engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
}

impl EngineKind {
    /// Get the display name for this engine.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
        }
    }

    /// Get the default port for this engine.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::PostgreSQL => 5432,
            Self::MySQL => 3306,
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Persisted health status of a connection definition.
///
/// Distinct from the in-process health tracker: this is what survives a
/// restart, the tracker is rebuilt from probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    Unknown,
    Connected,
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A registered external data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDefinition {
    /// Opaque unique id, immutable after creation.
    pub id: String,
    pub name: String,
    pub engine: EngineKind,
    pub host: String,
    /// Falls back to the engine default when absent.
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    /// Stored in cleartext; never log this field, use `masked()`.
    pub password: String,
    #[serde(default)]
    pub status: ConnectionStatus,
    #[serde(default)]
    pub is_manually_disconnected: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub disconnected_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: Option<DateTime<Utc>>,
}

impl ConnectionDefinition {
    /// Port to dial, falling back to the engine default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.engine.default_port())
    }

    /// Sort key for listings: most recent check, else creation time.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.last_checked.unwrap_or(self.created_at)
    }

    /// Display-safe rendering with credentials masked.
    pub fn masked(&self) -> String {
        format!(
            "{}://{}:****@{}:{}/{}",
            match self.engine {
                EngineKind::PostgreSQL => "postgres",
                EngineKind::MySQL => "mysql",
            },
            self.username,
            self.host,
            self.effective_port(),
            self.database
        )
    }
}

/// Input for registering a new data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConnection {
    pub name: String,
    pub engine: EngineKind,
    pub host: String,
    pub port: Option<u16>,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl NewConnection {
    /// Validate required fields before a definition is created.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("connection name cannot be empty".to_string());
        }
        if self.host.trim().is_empty() {
            return Err("host cannot be empty".to_string());
        }
        if self.database.trim().is_empty() {
            return Err("database name cannot be empty".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("username cannot be empty".to_string());
        }
        Ok(())
    }

    /// Materialize a definition with a fresh id and creation timestamp.
    pub fn into_definition(self, id: String, now: DateTime<Utc>) -> ConnectionDefinition {
        ConnectionDefinition {
            id,
            name: self.name,
            engine: self.engine,
            host: self.host,
            port: self.port,
            database: self.database,
            username: self.username,
            password: self.password,
            status: ConnectionStatus::Unknown,
            is_manually_disconnected: false,
            last_checked: None,
            disconnected_at: None,
            error_message: None,
            created_at: now,
            last_modified_at: None,
        }
    }
}

/// Field-wise patch for updating a definition. Absent fields are kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionPatch {
    pub name: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectionPatch {
    /// Merge this patch into a definition, stamping the modification time.
    pub fn apply(self, def: &mut ConnectionDefinition, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            def.name = name;
        }
        if let Some(host) = self.host {
            def.host = host;
        }
        if let Some(port) = self.port {
            def.port = Some(port);
        }
        if let Some(database) = self.database {
            def.database = database;
        }
        if let Some(username) = self.username {
            def.username = username;
        }
        if let Some(password) = self.password {
            def.password = password;
        }
        def.last_modified_at = Some(now);
    }
}
