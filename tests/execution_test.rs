//! Integration tests for the execution path: health fast-fail, failure
//! classification side effects and permission checks, using a counting
//! driver stub so no network is ever touched.

use async_trait::async_trait;
use querydesk::config::EngineSettings;
use querydesk::db::{DbConnection, Dial};
use querydesk::error::{DeskError, DeskResult};
use querydesk::models::{
    ConnectionDefinition, ConnectionStatus, EngineKind, GrantTarget, NewConnection,
};
use querydesk::service::QueryDesk;
use querydesk::store::{CatalogStore, ConnectionStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

/// Records every connect/probe attempt; never reaches a network.
struct CountingDial {
    connects: AtomicUsize,
    probes: AtomicUsize,
    probe_ok: bool,
}

impl CountingDial {
    fn new(probe_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            connects: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
            probe_ok,
        })
    }
}

#[async_trait]
impl Dial for CountingDial {
    async fn connect(&self, _def: &ConnectionDefinition) -> DeskResult<DbConnection> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Err(DeskError::connect_failed(3, "stub: connection refused"))
    }

    async fn probe(&self, _def: &ConnectionDefinition) -> DeskResult<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_ok {
            Ok(())
        } else {
            Err(DeskError::network("stub: host unreachable"))
        }
    }
}

fn desk_with(dir: &tempfile::TempDir, dial: Arc<CountingDial>) -> QueryDesk {
    let connections = Arc::new(ConnectionStore::new(dir.path().join("connections.json")));
    let catalog = Arc::new(CatalogStore::new(dir.path().join("folders.json")));
    QueryDesk::with_dial(
        connections,
        catalog,
        dial as Arc<dyn Dial>,
        EngineSettings::default(),
    )
}

fn warehouse() -> NewConnection {
    NewConnection {
        name: "warehouse".to_string(),
        engine: EngineKind::MySQL,
        host: "db.internal".to_string(),
        port: None,
        database: "sales".to_string(),
        username: "reporter".to_string(),
        password: "pw".to_string(),
    }
}

/// disconnect(id) then execute always fails with the disconnected error,
/// without a single driver call.
#[tokio::test]
async fn test_disconnect_then_execute_never_dials() {
    let dir = tempdir().unwrap();
    let dial = CountingDial::new(true);
    let desk = desk_with(&dir, Arc::clone(&dial));

    let conn = desk.create_connection(warehouse()).await.unwrap();
    desk.disconnect(&conn.id).await.unwrap();

    let err = desk
        .execute_query(&conn.id, "SELECT 1", &[], None, None)
        .await
        .unwrap_err();

    assert!(matches!(err, DeskError::Disconnected { .. }));
    assert_eq!(dial.connects.load(Ordering::SeqCst), 0);

    let stored = desk.get_connection(&conn.id).await.unwrap();
    assert_eq!(stored.status, ConnectionStatus::Disconnected);
    assert!(stored.is_manually_disconnected);
}

/// A connect failure surfaces as ConnectFailed and flips both the tracker
/// and the durable status, so the next call fast-fails.
#[tokio::test]
async fn test_connect_failure_flips_health_state() {
    let dir = tempdir().unwrap();
    let dial = CountingDial::new(true);
    let desk = desk_with(&dir, Arc::clone(&dial));

    let conn = desk.create_connection(warehouse()).await.unwrap();

    let err = desk
        .execute_query(&conn.id, "SELECT 1", &[], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::ConnectFailed { .. }));
    assert_eq!(dial.connects.load(Ordering::SeqCst), 1);

    let stored = desk.get_connection(&conn.id).await.unwrap();
    assert_eq!(stored.status, ConnectionStatus::Disconnected);
    assert!(stored.error_message.is_some());

    let err = desk
        .execute_query(&conn.id, "SELECT 1", &[], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::Disconnected { .. }));
    assert_eq!(dial.connects.load(Ordering::SeqCst), 1);
}

/// Reconnect re-probes and, on success, brings the connection back.
#[tokio::test]
async fn test_reconnect_restores_connection() {
    let dir = tempdir().unwrap();
    let dial = CountingDial::new(true);
    let desk = desk_with(&dir, Arc::clone(&dial));

    let conn = desk.create_connection(warehouse()).await.unwrap();
    desk.disconnect(&conn.id).await.unwrap();
    desk.reconnect(&conn.id).await.unwrap();
    assert_eq!(dial.probes.load(Ordering::SeqCst), 1);

    let stored = desk.get_connection(&conn.id).await.unwrap();
    assert_eq!(stored.status, ConnectionStatus::Connected);
    assert!(!stored.is_manually_disconnected);

    // Execution gets past the fast-fail gate again (and hits the stub).
    let err = desk
        .execute_query(&conn.id, "SELECT 1", &[], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::ConnectFailed { .. }));
}

/// A failed probe records the failure without touching the manual flag.
#[tokio::test]
async fn test_failed_probe_records_error() {
    let dir = tempdir().unwrap();
    let dial = CountingDial::new(false);
    let desk = desk_with(&dir, Arc::clone(&dial));

    let conn = desk.create_connection(warehouse()).await.unwrap();
    let err = desk.probe_connection(&conn.id).await.unwrap_err();
    assert!(err.is_network_class());

    let stored = desk.get_connection(&conn.id).await.unwrap();
    assert!(stored.error_message.is_some());
    assert!(!stored.is_manually_disconnected);
}

/// Executing a saved query without any grant fails before the driver is
/// ever consulted.
#[tokio::test]
async fn test_saved_query_requires_grant() {
    let dir = tempdir().unwrap();
    let dial = CountingDial::new(true);
    let desk = desk_with(&dir, Arc::clone(&dial));

    let conn = desk.create_connection(warehouse()).await.unwrap();
    let folder = desk.create_folder(&conn.id, "Reports", None).await.unwrap();
    let query = desk
        .create_query(&folder.id, "Revenue", "SELECT SUM(total) FROM sales")
        .await
        .unwrap();

    let err = desk
        .run_saved_query(&query.id, "mallory", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::Unauthorized { .. }));
    assert_eq!(dial.connects.load(Ordering::SeqCst), 0);
}

/// With a folder grant the permission check passes and execution reaches
/// the driver.
#[tokio::test]
async fn test_granted_saved_query_reaches_driver() {
    let dir = tempdir().unwrap();
    let dial = CountingDial::new(true);
    let desk = desk_with(&dir, Arc::clone(&dial));

    let conn = desk.create_connection(warehouse()).await.unwrap();
    let folder = desk.create_folder(&conn.id, "Reports", None).await.unwrap();
    let query = desk
        .create_query(&folder.id, "Revenue", "SELECT SUM(total) FROM sales")
        .await
        .unwrap();
    desk.set_permissions(&folder.id, GrantTarget::Folder, vec!["alice".to_string()])
        .await
        .unwrap();

    let err = desk
        .run_saved_query(&query.id, "alice", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::ConnectFailed { .. }));
    assert_eq!(dial.connects.load(Ordering::SeqCst), 1);
}

/// Unknown connection ids and empty SQL are rejected up front.
#[tokio::test]
async fn test_input_validation_before_dialing() {
    let dir = tempdir().unwrap();
    let dial = CountingDial::new(true);
    let desk = desk_with(&dir, Arc::clone(&dial));

    let err = desk
        .execute_query("missing", "SELECT 1", &[], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::NotFound { .. }));

    let conn = desk.create_connection(warehouse()).await.unwrap();
    let err = desk
        .execute_query(&conn.id, "   ", &[], None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DeskError::InvalidArgument { .. }));

    assert_eq!(dial.connects.load(Ordering::SeqCst), 0);
}
