use std::sync::Arc;

use crate::api::reference::{CollectionReference, DocumentReference};
use crate::error::FirestoreResult;
use crate::model::{DatabaseId, ResourcePath};

/// Handle to a single Firestore database, shared by references and clients.
#[derive(Clone, Debug)]
pub struct Firestore {
    inner: Arc<FirestoreInner>,
}

#[derive(Debug)]
struct FirestoreInner {
    database_id: DatabaseId,
}

impl Firestore {
    pub fn new(database_id: DatabaseId) -> Self {
        Self {
            inner: Arc::new(FirestoreInner { database_id }),
        }
    }

    /// The fully qualified database identifier (project + database name).
    pub fn database_id(&self) -> &DatabaseId {
        &self.inner.database_id
    }

    /// Creates a `CollectionReference` pointing at `path`.
    ///
    /// The path is interpreted relative to the Firestore root using forward
    /// slashes to separate segments (e.g. `"users/alovelace/repos"`).
    pub fn collection(&self, path: &str) -> FirestoreResult<CollectionReference> {
        let resource = ResourcePath::from_string(path)?;
        CollectionReference::new(self.clone(), resource)
    }

    /// Creates a `DocumentReference` pointing at `path`.
    ///
    /// The path must contain an even number of segments (collection/doc pairs).
    pub fn doc(&self, path: &str) -> FirestoreResult<DocumentReference> {
        let resource = ResourcePath::from_string(path)?;
        DocumentReference::new(self.clone(), resource)
    }

    pub fn project_id(&self) -> &str {
        self.inner.database_id.project_id()
    }

    /// The logical database name (usually `"(default)"`).
    pub fn database(&self) -> &str {
        self.inner.database_id.database()
    }
}
