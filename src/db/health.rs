//! Connection health tracking.
//!
//! The tracker keeps a process-local map of connection-id to "usable" flag,
//! distinct from the persisted status field: after a restart every
//! connection is unknown again until its first probe. Execution requests
//! consult the map first so a dead link fails fast instead of timing out at
//! the driver.
//!
//! The tracker is an injected component, constructed once per process and
//! handed to the engine, so tests can drive it with a stub dialer.

use crate::db::connector::Dial;
use crate::error::{DeskError, DeskResult};
use crate::models::ConnectionDefinition;
use crate::store::ConnectionStore;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub struct HealthTracker {
    states: RwLock<HashMap<String, bool>>,
    store: Arc<ConnectionStore>,
    dial: Arc<dyn Dial>,
}

impl HealthTracker {
    pub fn new(store: Arc<ConnectionStore>, dial: Arc<dyn Dial>) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            store,
            dial,
        }
    }

    /// Current flag for a connection; `None` until the first probe or
    /// disconnect touches it.
    pub async fn usable(&self, connection_id: &str) -> Option<bool> {
        self.states.read().await.get(connection_id).copied()
    }

    /// True only when the map holds an explicit `false`.
    pub async fn is_marked_down(&self, connection_id: &str) -> bool {
        self.usable(connection_id).await == Some(false)
    }

    /// Set the flag directly. The execution engine uses this when it
    /// classifies a network-class failure.
    pub async fn set_usable(&self, connection_id: &str, usable: bool) {
        self.states
            .write()
            .await
            .insert(connection_id.to_string(), usable);
    }

    /// Probe a definition: connect, run the liveness statement, close.
    ///
    /// On success the map entry goes true and, when the definition is a
    /// persisted one, its record is updated (connected, manual flag
    /// cleared). On failure the map entry goes false and the error message
    /// is recorded; the manual flag is left as it was.
    pub async fn probe(&self, def: &ConnectionDefinition) -> DeskResult<()> {
        match self.dial.probe(def).await {
            Ok(()) => {
                info!(connection_id = %def.id, target = %def.masked(), "Health probe succeeded");
                if !def.id.is_empty() {
                    self.set_usable(&def.id, true).await;
                    self.record(self.store.mark_probe_success(&def.id).await);
                }
                Ok(())
            }
            Err(e) => {
                warn!(connection_id = %def.id, target = %def.masked(), error = %e, "Health probe failed");
                if !def.id.is_empty() {
                    self.set_usable(&def.id, false).await;
                    self.record(self.store.mark_probe_failure(&def.id, &e.to_string()).await);
                }
                Err(e)
            }
        }
    }

    /// Operator-initiated disconnect: no probe, just force the flag down
    /// and persist the manual-disconnect state.
    pub async fn disconnect(&self, connection_id: &str) -> DeskResult<()> {
        self.store.mark_disconnected(connection_id).await?;
        self.set_usable(connection_id, false).await;
        info!(connection_id = %connection_id, "Connection disconnected by operator");
        Ok(())
    }

    /// Re-probe a persisted connection. A successful probe clears the
    /// manual-disconnect flag.
    pub async fn reconnect(&self, connection_id: &str) -> DeskResult<()> {
        let def = self.store.get(connection_id).await?;
        self.probe(&def).await
    }

    /// Store updates for probes of unsaved definitions hit NotFound; that
    /// is expected and everything else is worth a log line.
    fn record(&self, result: DeskResult<()>) {
        match result {
            Ok(()) | Err(DeskError::NotFound { .. }) => {}
            Err(e) => warn!(error = %e, "Failed to persist health state"),
        }
    }
}
