//! Durable store of folders and their saved queries.
//!
//! One JSON document holds every folder; queries are embedded in their
//! owning folder. Folder names are unique case-insensitively within one
//! connection, query names within one folder. The store is the sole writer
//! of permission grant sets.

use crate::error::{DeskError, DeskResult};
use crate::models::{Folder, GrantTarget, SavedQuery, names_equal_ci};
use chrono::Utc;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

pub struct CatalogStore {
    path: PathBuf,
    /// Store-level write lock: at most one read-modify-write cycle at a time.
    lock: Mutex<()>,
}

impl CatalogStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load_all(&self) -> DeskResult<Vec<Folder>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| DeskError::unknown(format!("corrupt folders table: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(DeskError::unknown(format!(
                "failed to read folders table: {}",
                e
            ))),
        }
    }

    async fn persist(&self, table: &[Folder]) -> DeskResult<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DeskError::unknown(format!("failed to create data dir: {}", e)))?;
        }
        let bytes = serde_json::to_vec_pretty(table)
            .map_err(|e| DeskError::unknown(format!("failed to encode folders: {}", e)))?;
        tokio::fs::write(&self.path, bytes)
            .await
            .map_err(|e| DeskError::unknown(format!("failed to write folders table: {}", e)))
    }

    /// Create a folder under a connection.
    pub async fn create_folder(
        &self,
        connection_id: &str,
        name: &str,
        parent_folder_id: Option<String>,
    ) -> DeskResult<Folder> {
        if name.trim().is_empty() {
            return Err(DeskError::invalid_argument("folder name cannot be empty"));
        }

        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;

        let duplicate = table
            .iter()
            .any(|f| f.connection_id == connection_id && names_equal_ci(&f.name, name));
        if duplicate {
            return Err(DeskError::invalid_argument(format!(
                "a folder named '{}' already exists for this connection",
                name
            )));
        }

        let folder = Folder {
            id: uuid::Uuid::new_v4().to_string(),
            connection_id: connection_id.to_string(),
            name: name.to_string(),
            parent_folder_id,
            created_at: Utc::now(),
            last_modified_at: None,
            grants: Default::default(),
            queries: Vec::new(),
        };
        info!(folder_id = %folder.id, connection_id = %connection_id, name = %name, "Created folder");
        table.push(folder.clone());
        self.persist(&table).await?;
        Ok(folder)
    }

    /// All folders of a connection.
    pub async fn folders_for_connection(&self, connection_id: &str) -> DeskResult<Vec<Folder>> {
        let _guard = self.lock.lock().await;
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .filter(|f| f.connection_id == connection_id)
            .collect())
    }

    /// Look up one folder.
    pub async fn get_folder(&self, folder_id: &str) -> DeskResult<Folder> {
        let _guard = self.lock.lock().await;
        self.load_all()
            .await?
            .into_iter()
            .find(|f| f.id == folder_id)
            .ok_or_else(|| DeskError::folder_not_found(folder_id))
    }

    /// Rename a folder, re-checking sibling uniqueness.
    pub async fn rename_folder(&self, folder_id: &str, new_name: &str) -> DeskResult<Folder> {
        if new_name.trim().is_empty() {
            return Err(DeskError::invalid_argument("folder name cannot be empty"));
        }

        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;

        let idx = table
            .iter()
            .position(|f| f.id == folder_id)
            .ok_or_else(|| DeskError::folder_not_found(folder_id))?;

        let connection_id = table[idx].connection_id.clone();
        let duplicate = table.iter().any(|f| {
            f.id != folder_id
                && f.connection_id == connection_id
                && names_equal_ci(&f.name, new_name)
        });
        if duplicate {
            return Err(DeskError::invalid_argument(format!(
                "a folder named '{}' already exists for this connection",
                new_name
            )));
        }

        let folder = &mut table[idx];
        folder.name = new_name.to_string();
        folder.last_modified_at = Some(Utc::now());
        let updated = folder.clone();
        self.persist(&table).await?;
        Ok(updated)
    }

    /// Delete a folder and everything in it.
    pub async fn delete_folder(&self, folder_id: &str) -> DeskResult<()> {
        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        let before = table.len();
        table.retain(|f| f.id != folder_id);
        if table.len() == before {
            return Err(DeskError::folder_not_found(folder_id));
        }
        info!(folder_id = %folder_id, "Deleted folder");
        self.persist(&table).await
    }

    /// Delete every folder of a connection (cascade from connection delete).
    pub async fn delete_by_connection(&self, connection_id: &str) -> DeskResult<usize> {
        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        let before = table.len();
        table.retain(|f| f.connection_id != connection_id);
        let removed = before - table.len();
        if removed > 0 {
            info!(connection_id = %connection_id, removed, "Cascaded folder delete");
            self.persist(&table).await?;
        }
        Ok(removed)
    }

    /// Create a saved query inside a folder.
    pub async fn create_query(
        &self,
        folder_id: &str,
        name: &str,
        sql: &str,
    ) -> DeskResult<SavedQuery> {
        if name.trim().is_empty() {
            return Err(DeskError::invalid_argument("query name cannot be empty"));
        }
        if sql.trim().is_empty() {
            return Err(DeskError::invalid_argument("query text cannot be empty"));
        }

        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        let folder = table
            .iter_mut()
            .find(|f| f.id == folder_id)
            .ok_or_else(|| DeskError::folder_not_found(folder_id))?;

        if folder.queries.iter().any(|q| names_equal_ci(&q.name, name)) {
            return Err(DeskError::invalid_argument(format!(
                "a query named '{}' already exists in this folder",
                name
            )));
        }

        let query = SavedQuery {
            id: uuid::Uuid::new_v4().to_string(),
            folder_id: folder_id.to_string(),
            name: name.to_string(),
            sql: sql.to_string(),
            created_at: Utc::now(),
            last_modified_at: None,
            grants: Default::default(),
        };
        debug!(query_id = %query.id, folder_id = %folder_id, name = %name, "Created query");
        folder.queries.push(query.clone());
        self.persist(&table).await?;
        Ok(query)
    }

    /// Queries of a folder, most recently modified (or created) first.
    pub async fn queries_sorted(&self, folder_id: &str) -> DeskResult<Vec<SavedQuery>> {
        let folder = self.get_folder(folder_id).await?;
        let mut queries = folder.queries;
        queries.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        Ok(queries)
    }

    /// Find a query by id, along with its owning folder.
    pub async fn get_query(&self, query_id: &str) -> DeskResult<(Folder, SavedQuery)> {
        let _guard = self.lock.lock().await;
        for folder in self.load_all().await? {
            if let Some(query) = folder.query(query_id) {
                let query = query.clone();
                return Ok((folder, query));
            }
        }
        Err(DeskError::query_not_found(query_id))
    }

    /// Rename a query within its folder, re-checking sibling uniqueness.
    pub async fn rename_query(
        &self,
        folder_id: &str,
        query_id: &str,
        new_name: &str,
    ) -> DeskResult<SavedQuery> {
        if new_name.trim().is_empty() {
            return Err(DeskError::invalid_argument("query name cannot be empty"));
        }

        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        let folder = table
            .iter_mut()
            .find(|f| f.id == folder_id)
            .ok_or_else(|| DeskError::folder_not_found(folder_id))?;

        let duplicate = folder
            .queries
            .iter()
            .any(|q| q.id != query_id && names_equal_ci(&q.name, new_name));
        if duplicate {
            return Err(DeskError::invalid_argument(format!(
                "a query named '{}' already exists in this folder",
                new_name
            )));
        }

        let query = folder
            .query_mut(query_id)
            .ok_or_else(|| DeskError::query_not_found(query_id))?;
        query.name = new_name.to_string();
        query.last_modified_at = Some(Utc::now());
        let updated = query.clone();
        self.persist(&table).await?;
        Ok(updated)
    }

    /// Replace a query's SQL text.
    pub async fn update_query_text(
        &self,
        folder_id: &str,
        query_id: &str,
        sql: &str,
    ) -> DeskResult<SavedQuery> {
        if sql.trim().is_empty() {
            return Err(DeskError::invalid_argument("query text cannot be empty"));
        }

        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        let folder = table
            .iter_mut()
            .find(|f| f.id == folder_id)
            .ok_or_else(|| DeskError::folder_not_found(folder_id))?;
        let query = folder
            .query_mut(query_id)
            .ok_or_else(|| DeskError::query_not_found(query_id))?;
        query.sql = sql.to_string();
        query.last_modified_at = Some(Utc::now());
        let updated = query.clone();
        self.persist(&table).await?;
        Ok(updated)
    }

    /// Delete a query, searching across folders.
    pub async fn delete_query(&self, query_id: &str) -> DeskResult<String> {
        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        for folder in table.iter_mut() {
            let before = folder.queries.len();
            folder.queries.retain(|q| q.id != query_id);
            if folder.queries.len() != before {
                let folder_id = folder.id.clone();
                debug!(query_id = %query_id, folder_id = %folder_id, "Deleted query");
                self.persist(&table).await?;
                return Ok(folder_id);
            }
        }
        Err(DeskError::query_not_found(query_id))
    }

    /// Replace the grant set of a folder or query.
    pub async fn set_permissions(
        &self,
        item_id: &str,
        target: GrantTarget,
        principals: Vec<String>,
    ) -> DeskResult<()> {
        let _guard = self.lock.lock().await;
        let mut table = self.load_all().await?;
        let now = Utc::now();

        let updated = match target {
            GrantTarget::Folder => match table.iter_mut().find(|f| f.id == item_id) {
                Some(folder) => {
                    folder.grants.replace(principals, now);
                    true
                }
                None => false,
            },
            GrantTarget::Query => {
                let mut found = false;
                for folder in table.iter_mut() {
                    if let Some(query) = folder.query_mut(item_id) {
                        query.grants.replace(principals, now);
                        found = true;
                        break;
                    }
                }
                found
            }
        };

        if !updated {
            return Err(match target {
                GrantTarget::Folder => DeskError::folder_not_found(item_id),
                GrantTarget::Query => DeskError::query_not_found(item_id),
            });
        }
        info!(item_id = %item_id, ?target, "Replaced permission grants");
        self.persist(&table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> CatalogStore {
        CatalogStore::new(dir.path().join("folders.json"))
    }

    #[tokio::test]
    async fn test_folder_create_and_list() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.create_folder("c1", "Reports", None).await.unwrap();
        store.create_folder("c1", "Exports", None).await.unwrap();
        store.create_folder("c2", "Reports", None).await.unwrap();

        let folders = store.folders_for_connection("c1").await.unwrap();
        assert_eq!(folders.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_folder_name_differs_only_by_case() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.create_folder("c1", "Reports", None).await.unwrap();
        let err = store
            .create_folder("c1", "REPORTS", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidArgument { .. }));

        // Same name under another connection is fine.
        assert!(store.create_folder("c2", "REPORTS", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_rename_folder_checks_siblings() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let a = store.create_folder("c1", "Alpha", None).await.unwrap();
        store.create_folder("c1", "Beta", None).await.unwrap();

        let err = store.rename_folder(&a.id, "beta").await.unwrap_err();
        assert!(matches!(err, DeskError::InvalidArgument { .. }));

        let renamed = store.rename_folder(&a.id, "Gamma").await.unwrap();
        assert_eq!(renamed.name, "Gamma");
        assert!(renamed.last_modified_at.is_some());
    }

    #[tokio::test]
    async fn test_query_name_unique_per_folder() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        let folder = store.create_folder("c1", "Reports", None).await.unwrap();
        store
            .create_query(&folder.id, "Revenue", "SELECT 1")
            .await
            .unwrap();
        let err = store
            .create_query(&folder.id, "revenue", "SELECT 2")
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidArgument { .. }));

        let other = store.create_folder("c1", "Other", None).await.unwrap();
        assert!(
            store
                .create_query(&other.id, "revenue", "SELECT 2")
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_create_query_rejects_empty_sql() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let folder = store.create_folder("c1", "Reports", None).await.unwrap();
        let err = store
            .create_query(&folder.id, "Revenue", "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_queries_sorted_newest_first() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let folder = store.create_folder("c1", "Reports", None).await.unwrap();

        let first = store
            .create_query(&folder.id, "First", "SELECT 1")
            .await
            .unwrap();
        store
            .create_query(&folder.id, "Second", "SELECT 2")
            .await
            .unwrap();

        // Editing "First" bumps it above "Second".
        store
            .update_query_text(&folder.id, &first.id, "SELECT 10")
            .await
            .unwrap();

        let sorted = store.queries_sorted(&folder.id).await.unwrap();
        assert_eq!(sorted[0].name, "First");
        assert_eq!(sorted[1].name, "Second");
    }

    #[tokio::test]
    async fn test_delete_query_searches_folders() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let folder = store.create_folder("c1", "Reports", None).await.unwrap();
        let query = store
            .create_query(&folder.id, "Revenue", "SELECT 1")
            .await
            .unwrap();

        let owner = store.delete_query(&query.id).await.unwrap();
        assert_eq!(owner, folder.id);
        assert!(matches!(
            store.delete_query(&query.id).await.unwrap_err(),
            DeskError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn test_cascade_delete_by_connection() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        store.create_folder("c1", "A", None).await.unwrap();
        store.create_folder("c1", "B", None).await.unwrap();
        store.create_folder("c2", "C", None).await.unwrap();

        let removed = store.delete_by_connection("c1").await.unwrap();
        assert_eq!(removed, 2);
        assert!(store.folders_for_connection("c1").await.unwrap().is_empty());
        assert_eq!(store.folders_for_connection("c2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_set_permissions_on_folder_and_query() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let folder = store.create_folder("c1", "Reports", None).await.unwrap();
        let query = store
            .create_query(&folder.id, "Revenue", "SELECT 1")
            .await
            .unwrap();

        store
            .set_permissions(&folder.id, GrantTarget::Folder, vec!["alice".to_string()])
            .await
            .unwrap();
        store
            .set_permissions(&query.id, GrantTarget::Query, vec!["bob".to_string()])
            .await
            .unwrap();

        let reloaded = store.get_folder(&folder.id).await.unwrap();
        assert!(reloaded.grants.allows("alice"));
        assert!(reloaded.queries[0].grants.allows("bob"));
        assert!(!reloaded.queries[0].grants.allows("alice"));
    }

    #[tokio::test]
    async fn test_set_permissions_unknown_item() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);
        let err = store
            .set_permissions("nope", GrantTarget::Query, vec!["alice".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, DeskError::NotFound { .. }));
    }
}
