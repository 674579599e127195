//! Folder and saved-query data models.
//!
//! Folders belong to one connection and embed their queries; both levels
//! carry a permission grant set mapping principal keys to grant timestamps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single access grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    pub granted_at: DateTime<Utc>,
}

/// Permission grant set: principal key -> grant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrantSet(pub HashMap<String, Grant>);

impl GrantSet {
    /// Whether this principal holds a grant.
    pub fn allows(&self, principal: &str) -> bool {
        self.0.contains_key(principal)
    }

    /// When the principal was granted access, if ever.
    pub fn granted_at(&self, principal: &str) -> Option<DateTime<Utc>> {
        self.0.get(principal).map(|g| g.granted_at)
    }

    /// Replace the whole set with the given principal keys, stamped `now`.
    /// Empty keys are dropped.
    pub fn replace<I>(&mut self, principals: I, now: DateTime<Utc>)
    where
        I: IntoIterator<Item = String>,
    {
        self.0 = principals
            .into_iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| (k, Grant { granted_at: now }))
            .collect();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A saved query inside a folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedQuery {
    pub id: String,
    pub folder_id: String,
    /// Unique case-insensitively within the owning folder.
    pub name: String,
    pub sql: String,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub grants: GrantSet,
}

impl SavedQuery {
    /// Sort key for listings: most recent edit, else creation time.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.last_modified_at.unwrap_or(self.created_at)
    }
}

/// A folder of saved queries under one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Folder {
    pub id: String,
    pub connection_id: String,
    /// Unique case-insensitively among the folders of one connection.
    pub name: String,
    /// Stored for nesting display; not enforced beyond storage.
    pub parent_folder_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub grants: GrantSet,
    #[serde(default)]
    pub queries: Vec<SavedQuery>,
}

impl Folder {
    /// Look up an embedded query by id.
    pub fn query(&self, query_id: &str) -> Option<&SavedQuery> {
        self.queries.iter().find(|q| q.id == query_id)
    }

    /// Mutable lookup of an embedded query by id.
    pub fn query_mut(&mut self, query_id: &str) -> Option<&mut SavedQuery> {
        self.queries.iter_mut().find(|q| q.id == query_id)
    }

    /// Whether the principal may read the given query of this folder.
    ///
    /// A folder-level grant covers every query it contains; a query-level
    /// grant covers just that query. A query grant never narrows a folder
    /// grant.
    pub fn grants_access(&self, query: &SavedQuery, principal: &str) -> bool {
        self.grants.allows(principal) || query.grants.allows(principal)
    }
}

/// Case-insensitive name comparison used for uniqueness checks.
pub fn names_equal_ci(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Which kind of item a permission update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantTarget {
    Folder,
    Query,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder_with_queries() -> Folder {
        let now = Utc::now();
        let make_query = |id: &str, name: &str| SavedQuery {
            id: id.to_string(),
            folder_id: "f1".to_string(),
            name: name.to_string(),
            sql: "SELECT 1".to_string(),
            created_at: now,
            last_modified_at: None,
            grants: GrantSet::default(),
        };
        Folder {
            id: "f1".to_string(),
            connection_id: "c1".to_string(),
            name: "Reports".to_string(),
            parent_folder_id: None,
            created_at: now,
            last_modified_at: None,
            grants: GrantSet::default(),
            queries: vec![make_query("q1", "Revenue"), make_query("q2", "Stores")],
        }
    }

    #[test]
    fn test_folder_grant_covers_all_queries() {
        let mut folder = folder_with_queries();
        folder
            .grants
            .replace(vec!["alice".to_string()], Utc::now());

        for query in &folder.queries {
            assert!(folder.grants_access(query, "alice"));
            assert!(!folder.grants_access(query, "bob"));
        }
    }

    #[test]
    fn test_query_grant_covers_only_that_query() {
        let mut folder = folder_with_queries();
        folder.queries[0]
            .grants
            .replace(vec!["bob".to_string()], Utc::now());

        let (granted, sibling) = (folder.queries[0].clone(), folder.queries[1].clone());
        assert!(folder.grants_access(&granted, "bob"));
        assert!(!folder.grants_access(&sibling, "bob"));
    }

    #[test]
    fn test_replace_drops_empty_keys() {
        let mut grants = GrantSet::default();
        grants.replace(
            vec!["alice".to_string(), "".to_string(), "  ".to_string()],
            Utc::now(),
        );
        assert!(grants.allows("alice"));
        assert_eq!(grants.0.len(), 1);
    }

    #[test]
    fn test_replace_overwrites_previous_set() {
        let mut grants = GrantSet::default();
        grants.replace(vec!["alice".to_string()], Utc::now());
        grants.replace(vec!["bob".to_string()], Utc::now());
        assert!(!grants.allows("alice"));
        assert!(grants.allows("bob"));
    }

    #[test]
    fn test_names_equal_ci() {
        assert!(names_equal_ci("Reports", "reports"));
        assert!(names_equal_ci("BÁO CÁO", "báo cáo"));
        assert!(!names_equal_ci("Reports", "Report"));
    }

    #[test]
    fn test_query_sort_key() {
        let folder = folder_with_queries();
        let mut q = folder.queries[0].clone();
        assert_eq!(q.sort_key(), q.created_at);
        let edited = Utc::now();
        q.last_modified_at = Some(edited);
        assert_eq!(q.sort_key(), edited);
    }
}
