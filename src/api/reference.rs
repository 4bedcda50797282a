use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::fmt::{Display, Formatter};

use crate::api::database::Firestore;
use crate::api::query::Query;
use crate::error::{invalid_argument, FirestoreResult};
use crate::model::{DocumentKey, ResourcePath};

const AUTO_ID_LENGTH: usize = 20;

/// A reference to a collection of documents.
#[derive(Clone, Debug)]
pub struct CollectionReference {
    firestore: Firestore,
    path: ResourcePath,
}

impl CollectionReference {
    pub(crate) fn new(firestore: Firestore, path: ResourcePath) -> FirestoreResult<Self> {
        if path.is_empty() || path.len() % 2 == 0 {
            return Err(invalid_argument(
                "Collection references must point to a collection (odd number of segments)",
            ));
        }
        Ok(Self { firestore, path })
    }

    pub fn firestore(&self) -> &Firestore {
        &self.firestore
    }

    /// The full resource path of the collection (e.g. `rooms/eros/messages`).
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The last segment of the collection path.
    pub fn id(&self) -> &str {
        self.path
            .last_segment()
            .expect("Collection path always has id")
    }

    /// Returns the document that logically contains this collection, if any.
    pub fn parent(&self) -> Option<DocumentReference> {
        self.path.pop_last().and_then(|parent_path| {
            if parent_path.is_empty() || parent_path.len() % 2 != 0 {
                return None;
            }
            DocumentReference::new(self.firestore.clone(), parent_path).ok()
        })
    }

    /// Returns a reference to the document identified by `document_id`.
    ///
    /// When `document_id` is `None`, an auto-ID is generated.
    pub fn doc(&self, document_id: Option<&str>) -> FirestoreResult<DocumentReference> {
        let id = document_id
            .map(|id| id.to_string())
            .unwrap_or_else(generate_auto_id);
        if id.is_empty() || id.contains('/') {
            return Err(invalid_argument(
                "Document ID must be non-empty and cannot contain '/'.",
            ));
        }
        let path = self.path.child([id]);
        DocumentReference::new(self.firestore.clone(), path)
    }

    /// Creates a query that targets this collection.
    pub fn query(&self) -> Query {
        Query::new(self.firestore.clone(), self.path.clone())
            .expect("CollectionReference always points to a valid collection")
    }
}

impl Display for CollectionReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "CollectionReference({})", self.path.canonical_string())
    }
}

/// A reference to a single document location.
#[derive(Clone, Debug)]
pub struct DocumentReference {
    firestore: Firestore,
    key: DocumentKey,
}

impl DocumentReference {
    pub(crate) fn new(firestore: Firestore, path: ResourcePath) -> FirestoreResult<Self> {
        let key = DocumentKey::from_path(path)?;
        Ok(Self { firestore, key })
    }

    pub fn firestore(&self) -> &Firestore {
        &self.firestore
    }

    /// The document identifier (the last segment of its path).
    pub fn id(&self) -> &str {
        self.key.id()
    }

    /// The full resource path to the document.
    pub fn path(&self) -> &ResourcePath {
        self.key.path()
    }

    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    /// The parent collection containing this document.
    pub fn parent(&self) -> CollectionReference {
        CollectionReference::new(self.firestore.clone(), self.key.collection_path())
            .expect("Document parent path is always a collection")
    }

    /// Returns a reference to a subcollection rooted at this document.
    pub fn collection(&self, path: &str) -> FirestoreResult<CollectionReference> {
        let sub_path = ResourcePath::from_string(path)?;
        let full_path = self.key.path().child(sub_path.as_vec().clone());
        CollectionReference::new(self.firestore.clone(), full_path)
    }
}

impl Display for DocumentReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "DocumentReference({})",
            self.key.path().canonical_string()
        )
    }
}

fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .map(char::from)
        .take(AUTO_ID_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DatabaseId;

    fn setup_firestore() -> Firestore {
        Firestore::new(DatabaseId::default_database("test-project"))
    }

    #[test]
    fn collection_and_document_roundtrip() {
        let firestore = setup_firestore();
        let collection = firestore.collection("cities").unwrap();
        assert_eq!(collection.id(), "cities");
        let document = collection.doc(Some("sf")).unwrap();
        assert_eq!(document.id(), "sf");
        assert_eq!(document.parent().id(), "cities");
    }

    #[test]
    fn auto_id_generation() {
        let firestore = setup_firestore();
        let collection = firestore.collection("cities").unwrap();
        let document = collection.doc(None).unwrap();
        assert_eq!(document.parent().id(), "cities");
        assert_eq!(document.id().len(), 20);
    }

    #[test]
    fn rejects_slash_in_document_id() {
        let firestore = setup_firestore();
        let collection = firestore.collection("cities").unwrap();
        let err = collection.doc(Some("bad/id")).unwrap_err();
        assert_eq!(err.code_str(), "firestore/invalid-argument");
    }

    #[test]
    fn subcollection_under_document() {
        let firestore = setup_firestore();
        let document = firestore.doc("cities/sf").unwrap();
        let landmarks = document.collection("landmarks").unwrap();
        assert_eq!(landmarks.path().canonical_string(), "cities/sf/landmarks");
        assert_eq!(landmarks.parent().unwrap().id(), "sf");
    }
}
