//! Durable store of connection definitions.
//!
//! One JSON document holds every registered data source. Reads load the
//! whole table; writes replace it. Health-status transitions performed by
//! the health tracker and the execution engine go through the `mark_*`
//! writers so every status field change happens under the same lock.

use crate::error::{DeskError, DeskResult};
use crate::models::{ConnectionDefinition, ConnectionPatch, ConnectionStatus, NewConnection};
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct ConnectionStore {
    path: PathBuf,
    /// Store-level write lock: at most one read-modify-write cycle at a time.
    lock: Mutex<()>,
}

impl ConnectionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load_all(&self) -> DeskResult<Vec<ConnectionDefinition>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| DeskError::unknown(format!("corrupt connections table: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(DeskError::unknown(format!(
                "failed to read connections table: {}",
                e
            ))),
        }
    }

    async fn persist(&self, table: &[ConnectionDefinition]) -> DeskResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DeskError::unknown(format!("failed to create data dir: {}", e)))?;
        }
        let bytes = serde_json::to_vec_pretty(table)
            .map_err(|e| DeskError::unknown(format!("failed to encode connections: {}", e)))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| DeskError::unknown(format!("failed to write connections table: {}", e)))
    }

    /// Register a new data source.
    pub async fn create(&self, input: NewConnection) -> DeskResult<ConnectionDefinition> {
        input.validate().map_err(DeskError::invalid_argument)?;

        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        let def = input.into_definition(uuid::Uuid::new_v4().to_string(), Utc::now());
        info!(connection_id = %def.id, name = %def.name, "Registered connection");
        table.push(def.clone());
        self.persist(&table).await?;
        Ok(def)
    }

    /// All definitions, most recently checked (or created) first.
    pub async fn list(&self) -> DeskResult<Vec<ConnectionDefinition>> {
        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        table.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        Ok(table)
    }

    /// Look up one definition.
    pub async fn get(&self, id: &str) -> DeskResult<ConnectionDefinition> {
        let _guard = self.lock.lock().await;
        self.load_all()
            .await?
            .into_iter()
            .find(|def| def.id == id)
            .ok_or_else(|| DeskError::connection_not_found(id))
    }

    /// Merge a patch into a definition.
    pub async fn update(&self, id: &str, patch: ConnectionPatch) -> DeskResult<ConnectionDefinition> {
        self.mutate(id, |def| patch.apply(def, Utc::now())).await
    }

    /// Remove a definition. Cascading folder cleanup is the caller's job.
    pub async fn delete(&self, id: &str) -> DeskResult<()> {
        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        let before = table.len();
        table.retain(|def| def.id != id);
        if table.len() == before {
            return Err(DeskError::connection_not_found(id));
        }
        info!(connection_id = %id, "Deleted connection");
        self.persist(&table).await
    }

    /// Record a successful health probe.
    pub async fn mark_probe_success(&self, id: &str) -> DeskResult<()> {
        self.mutate(id, |def| {
            def.status = ConnectionStatus::Connected;
            def.last_checked = Some(Utc::now());
            def.is_manually_disconnected = false;
            def.disconnected_at = None;
            def.error_message = None;
        })
        .await
        .map(|_| ())
    }

    /// Record a failed health probe. The manual-disconnect flag is left
    /// untouched: a failed probe is not an operator decision.
    pub async fn mark_probe_failure(&self, id: &str, message: &str) -> DeskResult<()> {
        let message = message.to_string();
        self.mutate(id, move |def| {
            def.last_checked = Some(Utc::now());
            def.error_message = Some(message);
        })
        .await
        .map(|_| ())
    }

    /// Record an operator-initiated disconnect.
    pub async fn mark_disconnected(&self, id: &str) -> DeskResult<()> {
        self.mutate(id, |def| {
            let now = Utc::now();
            def.status = ConnectionStatus::Disconnected;
            def.is_manually_disconnected = true;
            def.last_checked = Some(now);
            def.disconnected_at = Some(now);
        })
        .await
        .map(|_| ())
    }

    /// Record a network-class execution failure.
    pub async fn mark_network_failure(&self, id: &str, message: &str) -> DeskResult<()> {
        let message = message.to_string();
        self.mutate(id, move |def| {
            def.status = ConnectionStatus::Disconnected;
            def.error_message = Some(message);
            def.last_checked = Some(Utc::now());
        })
        .await
        .map(|_| ())
    }

    async fn mutate<F>(&self, id: &str, apply: F) -> DeskResult<ConnectionDefinition>
    where
        F: FnOnce(&mut ConnectionDefinition),
    {
        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        let def = table
            .iter_mut()
            .find(|def| def.id == id)
            .ok_or_else(|| DeskError::connection_not_found(id))?;
        apply(def);
        let updated = def.clone();
        debug!(connection_id = %id, status = %updated.status, "Connection record updated");
        self.persist(&table).await?;
        Ok(updated)
    }
}
