//! The QueryDesk service facade.
//!
//! One entry point bundling the stores, the health tracker, the execution
//! engine and the template resolver. The presentation layer calls these
//! operations; the identity layer supplies the principal key checked
//! against permission grants. QueryDesk never authenticates anyone.

use crate::config::{Config, EngineSettings};
use crate::db::{Dial, ExecutionEngine, HealthTracker, RetryDial};
use crate::error::{DeskError, DeskResult};
use crate::models::{
    ConnectionDefinition, ConnectionPatch, DateRange, ExecutionResult, Folder, GrantTarget,
    NewConnection, QueryParam, RowBatch, SavedQuery,
};
use crate::store::{CatalogStore, ConnectionStore};
use crate::template::{self, TemplateResolver};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

pub struct QueryDesk {
    connections: Arc<ConnectionStore>,
    catalog: Arc<CatalogStore>,
    health: Arc<HealthTracker>,
    engine: Arc<ExecutionEngine>,
    resolver: TemplateResolver,
}

impl QueryDesk {
    /// Build the service with the production dialer.
    pub fn new(config: &Config) -> Self {
        let connections = Arc::new(ConnectionStore::new(config.connections_path()));
        let catalog = Arc::new(CatalogStore::new(config.folders_path()));
        let settings = config.engine_settings();
        let dial: Arc<dyn Dial> = Arc::new(RetryDial::new(settings.clone()));
        Self::with_dial(connections, catalog, dial, settings)
    }

    /// Build the service around an explicit dialer (tests use a stub).
    pub fn with_dial(
        connections: Arc<ConnectionStore>,
        catalog: Arc<CatalogStore>,
        dial: Arc<dyn Dial>,
        settings: EngineSettings,
    ) -> Self {
        let health = Arc::new(HealthTracker::new(Arc::clone(&connections), dial.clone()));
        let engine = Arc::new(ExecutionEngine::new(
            Arc::clone(&connections),
            Arc::clone(&health),
            dial,
            settings,
        ));
        let resolver = TemplateResolver::new(Arc::clone(&engine));
        Self {
            connections,
            catalog,
            health,
            engine,
            resolver,
        }
    }

    // -------------------------------------------------------------------
    // Connections
    // -------------------------------------------------------------------

    pub async fn list_connections(&self) -> DeskResult<Vec<ConnectionDefinition>> {
        self.connections.list().await
    }

    pub async fn create_connection(&self, input: NewConnection) -> DeskResult<ConnectionDefinition> {
        self.connections.create(input).await
    }

    pub async fn get_connection(&self, id: &str) -> DeskResult<ConnectionDefinition> {
        self.connections.get(id).await
    }

    pub async fn update_connection(
        &self,
        id: &str,
        patch: ConnectionPatch,
    ) -> DeskResult<ConnectionDefinition> {
        self.connections.update(id, patch).await
    }

    /// Delete a connection and every folder/query that references it.
    pub async fn delete_connection(&self, id: &str) -> DeskResult<()> {
        self.connections.delete(id).await?;
        let removed = self.catalog.delete_by_connection(id).await?;
        info!(connection_id = %id, folders_removed = removed, "Connection deleted");
        Ok(())
    }

    /// Probe an unsaved definition, e.g. from a "test connection" form.
    /// Nothing is persisted.
    pub async fn test_connection(&self, input: &NewConnection) -> DeskResult<()> {
        input
            .validate()
            .map_err(DeskError::invalid_argument)?;
        let def = input
            .clone()
            .into_definition(String::new(), chrono::Utc::now());
        self.health.probe(&def).await
    }

    /// Probe a registered connection, updating its health state.
    pub async fn probe_connection(&self, id: &str) -> DeskResult<()> {
        let def = self.connections.get(id).await?;
        self.health.probe(&def).await
    }

    pub async fn disconnect(&self, id: &str) -> DeskResult<()> {
        self.health.disconnect(id).await
    }

    pub async fn reconnect(&self, id: &str) -> DeskResult<()> {
        self.health.reconnect(id).await
    }

    // -------------------------------------------------------------------
    // Folders and queries
    // -------------------------------------------------------------------

    pub async fn list_folders(&self, connection_id: &str) -> DeskResult<Vec<Folder>> {
        self.catalog.folders_for_connection(connection_id).await
    }

    pub async fn create_folder(
        &self,
        connection_id: &str,
        name: &str,
        parent_folder_id: Option<String>,
    ) -> DeskResult<Folder> {
        // Creating a folder under an unknown connection is a caller bug.
        self.connections.get(connection_id).await?;
        self.catalog
            .create_folder(connection_id, name, parent_folder_id)
            .await
    }

    pub async fn rename_folder(&self, folder_id: &str, new_name: &str) -> DeskResult<Folder> {
        self.catalog.rename_folder(folder_id, new_name).await
    }

    pub async fn delete_folder(&self, folder_id: &str) -> DeskResult<()> {
        self.catalog.delete_folder(folder_id).await
    }

    pub async fn list_queries(&self, folder_id: &str) -> DeskResult<Vec<SavedQuery>> {
        self.catalog.queries_sorted(folder_id).await
    }

    pub async fn create_query(
        &self,
        folder_id: &str,
        name: &str,
        sql: &str,
    ) -> DeskResult<SavedQuery> {
        self.catalog.create_query(folder_id, name, sql).await
    }

    pub async fn rename_query(
        &self,
        folder_id: &str,
        query_id: &str,
        new_name: &str,
    ) -> DeskResult<SavedQuery> {
        self.catalog
            .rename_query(folder_id, query_id, new_name)
            .await
    }

    pub async fn update_query_text(
        &self,
        folder_id: &str,
        query_id: &str,
        sql: &str,
    ) -> DeskResult<SavedQuery> {
        self.catalog
            .update_query_text(folder_id, query_id, sql)
            .await
    }

    /// Delete a query; returns the id of the folder that owned it.
    pub async fn delete_query(&self, query_id: &str) -> DeskResult<String> {
        self.catalog.delete_query(query_id).await
    }

    pub async fn get_query(&self, query_id: &str) -> DeskResult<(Folder, SavedQuery)> {
        self.catalog.get_query(query_id).await
    }

    // -------------------------------------------------------------------
    // Permissions
    // -------------------------------------------------------------------

    /// Replace the grant set of a folder or query.
    pub async fn set_permissions(
        &self,
        item_id: &str,
        target: GrantTarget,
        principal_keys: Vec<String>,
    ) -> DeskResult<()> {
        self.catalog
            .set_permissions(item_id, target, principal_keys)
            .await
    }

    /// The folders (and queries) a principal may see under one connection.
    ///
    /// A folder-level grant exposes the whole folder; otherwise the folder
    /// appears with just the queries the principal holds grants for, and
    /// folders with nothing visible are dropped.
    pub async fn visible_folders(
        &self,
        connection_id: &str,
        principal: &str,
    ) -> DeskResult<Vec<Folder>> {
        let mut visible = Vec::new();
        for mut folder in self.catalog.folders_for_connection(connection_id).await? {
            if folder.grants.allows(principal) {
                visible.push(folder);
                continue;
            }
            folder.queries.retain(|q| q.grants.allows(principal));
            if !folder.queries.is_empty() {
                visible.push(folder);
            }
        }
        // Most recently granted first, the order operators hand out access.
        visible.sort_by_key(|f| {
            std::cmp::Reverse(
                f.grants
                    .granted_at(principal)
                    .or_else(|| f.queries.iter().filter_map(|q| q.grants.granted_at(principal)).max()),
            )
        });
        Ok(visible)
    }

    // -------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------

    /// Execute raw SQL against a connection. A date range, when supplied,
    /// replaces the date placeholders before execution.
    pub async fn execute_query(
        &self,
        connection_id: &str,
        sql: &str,
        params: &[QueryParam],
        date_range: Option<DateRange>,
        cache_key: Option<&str>,
    ) -> DeskResult<ExecutionResult> {
        let sql = template::substitute_dates(sql, date_range.as_ref());
        self.engine
            .execute(connection_id, &sql, params, cache_key)
            .await
    }

    /// Execute a saved query on behalf of a principal: check the grant,
    /// expand the template, run the result.
    pub async fn run_saved_query(
        &self,
        query_id: &str,
        principal: &str,
        date_range: Option<DateRange>,
        cache_key: Option<&str>,
    ) -> DeskResult<ExecutionResult> {
        let (folder, query) = self.catalog.get_query(query_id).await?;
        if !folder.grants_access(&query, principal) {
            return Err(DeskError::unauthorized(
                principal,
                format!("query '{}'", query.name),
            ));
        }

        let expanded = self.resolver.resolve(&folder, &query, date_range).await?;
        self.engine
            .execute(&folder.connection_id, &expanded, &[], cache_key)
            .await
    }

    /// Execute raw SQL and push the rows out in fixed-size batches.
    pub async fn execute_streaming(
        &self,
        connection_id: &str,
        sql: &str,
        params: &[QueryParam],
        sender: mpsc::Sender<RowBatch>,
    ) -> DeskResult<()> {
        self.engine
            .execute_streaming(connection_id, sql, params, sender)
            .await
    }

    /// Look up a previously cached result by its cache key.
    pub async fn cached_result(&self, cache_key: &str) -> Option<Arc<ExecutionResult>> {
        self.engine.cached(cache_key).await
    }
}
