//! Transient connections to target engines.
//!
//! Every execution opens its own connection and closes it afterwards; there
//! is no shared pool. The `Dial` trait is the seam between the engine and
//! the real drivers, so tests can substitute a stub that records calls.

use crate::config::EngineSettings;
use crate::error::{DeskError, DeskResult};
use crate::models::{ConnectionDefinition, EngineKind};
use async_trait::async_trait;
use sqlx::ConnectOptions;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgSslMode};
use sqlx::Connection;
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

/// An open connection to one target engine.
pub enum DbConnection {
    Postgres(PgConnection),
    MySql(MySqlConnection),
}

impl std::fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbConnection::Postgres(_) => f.write_str("DbConnection::Postgres"),
            DbConnection::MySql(_) => f.write_str("DbConnection::MySql"),
        }
    }
}

impl DbConnection {
    /// Engine kind of this connection.
    pub fn engine(&self) -> EngineKind {
        match self {
            DbConnection::Postgres(_) => EngineKind::PostgreSQL,
            DbConnection::MySql(_) => EngineKind::MySQL,
        }
    }

    /// Issue the trivial liveness statement.
    pub async fn ping(&mut self) -> DeskResult<()> {
        match self {
            DbConnection::Postgres(conn) => {
                sqlx::query("SELECT 1").execute(&mut *conn).await?;
            }
            DbConnection::MySql(conn) => {
                sqlx::query("SELECT 1").execute(&mut *conn).await?;
            }
        }
        Ok(())
    }

    /// Close the connection gracefully. Close failures are logged, never
    /// surfaced as execution failures.
    pub async fn close(self, connection_id: &str) {
        let result = match self {
            DbConnection::Postgres(conn) => conn.close().await,
            DbConnection::MySql(conn) => conn.close().await,
        };
        if let Err(e) = result {
            warn!(connection_id = %connection_id, error = %e, "Failed to close connection");
        }
    }
}

/// Opens connections for the engine and the health tracker.
#[async_trait]
pub trait Dial: Send + Sync {
    /// Open a connection to the data source behind `def`.
    async fn connect(&self, def: &ConnectionDefinition) -> DeskResult<DbConnection>;

    /// Open, run the liveness statement, close. Success means the source is
    /// reachable and answers queries.
    async fn probe(&self, def: &ConnectionDefinition) -> DeskResult<()>;
}

/// Production dialer: linear-backoff retry around single connect attempts.
pub struct RetryDial {
    settings: EngineSettings,
}

impl RetryDial {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    fn postgres_options(def: &ConnectionDefinition) -> PgConnectOptions {
        let mut options = PgConnectOptions::new()
            .host(&def.host)
            .port(def.effective_port())
            .username(&def.username)
            .database(&def.database)
            // The sources QueryDesk targets sit on trusted networks with
            // certificate trust enabled and wire encryption off.
            .ssl_mode(PgSslMode::Disable)
            .application_name("querydesk");
        if !def.password.is_empty() {
            options = options.password(&def.password);
        }
        options.disable_statement_logging()
    }

    fn mysql_options(def: &ConnectionDefinition) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .host(&def.host)
            .port(def.effective_port())
            .username(&def.username)
            .database(&def.database)
            .ssl_mode(MySqlSslMode::Disabled)
            .charset("utf8mb4");
        if !def.password.is_empty() {
            options = options.password(&def.password);
        }
        options.disable_statement_logging()
    }

    /// One connect attempt, bounded by the connect timeout.
    async fn connect_once(&self, def: &ConnectionDefinition) -> DeskResult<DbConnection> {
        let attempt = async {
            match def.engine {
                EngineKind::PostgreSQL => {
                    let conn = PgConnection::connect_with(&Self::postgres_options(def)).await?;
                    Ok::<_, DeskError>(DbConnection::Postgres(conn))
                }
                EngineKind::MySQL => {
                    let conn = MySqlConnection::connect_with(&Self::mysql_options(def)).await?;
                    Ok(DbConnection::MySql(conn))
                }
            }
        };

        match timeout(self.settings.connect_timeout, attempt).await {
            Ok(result) => result,
            Err(_) => Err(DeskError::network(format!(
                "connect timed out after {}s",
                self.settings.connect_timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl Dial for RetryDial {
    async fn connect(&self, def: &ConnectionDefinition) -> DeskResult<DbConnection> {
        let max_attempts = self.settings.connect_attempts.max(1);
        let mut last_error: Option<DeskError> = None;

        for attempt in 1..=max_attempts {
            match self.connect_once(def).await {
                Ok(conn) => {
                    debug!(
                        connection_id = %def.id,
                        target = %def.masked(),
                        attempt,
                        "Connected"
                    );
                    return Ok(conn);
                }
                Err(e) => {
                    warn!(
                        connection_id = %def.id,
                        target = %def.masked(),
                        attempt,
                        error = %e,
                        "Connect attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < max_attempts {
                        // Linear backoff: attempt N waits N base intervals.
                        sleep(self.settings.retry_interval * attempt).await;
                    }
                }
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt was made".to_string());
        Err(DeskError::connect_failed(max_attempts, message))
    }

    async fn probe(&self, def: &ConnectionDefinition) -> DeskResult<()> {
        let mut conn = self.connect(def).await?;
        let outcome = conn.ping().await;
        conn.close(&def.id).await;
        outcome
    }
}
