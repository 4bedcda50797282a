use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::client::FirestoreClient;
use crate::api::database::Firestore;
use crate::api::operations::UpdateMap;
use crate::api::reference::DocumentReference;
use crate::api::snapshot::DocumentSnapshot;
use crate::api::transaction::Transaction;
use crate::error::{internal_error, FirestoreResult};
use crate::value::codec;

/// A simple serializable document view. Use this when a function takes a
/// document but does not need to mutate it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TypedDocument<T> {
    pub id: String,
    pub data: T,
}

/// A document view carrying write capabilities bound to its source location.
///
/// Several views may reference the same remote document; nothing coordinates
/// concurrent local mutation attempts, consistency is whatever the backend
/// provides.
pub struct MutableDocument<T> {
    id: String,
    data: T,
    reference: DocumentReference,
    client: FirestoreClient,
}

impl<T: std::fmt::Debug> std::fmt::Debug for MutableDocument<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutableDocument")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("reference", &self.reference)
            .finish_non_exhaustive()
    }
}

impl<T> MutableDocument<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn reference(&self) -> &DocumentReference {
        &self.reference
    }

    /// Returns the read-only projection of this view.
    pub fn as_document(&self) -> TypedDocument<T>
    where
        T: Clone,
    {
        TypedDocument {
            id: self.id.clone(),
            data: self.data.clone(),
        }
    }

    /// Applies a partial update to the source document.
    pub async fn update(&self, data: UpdateMap) -> FirestoreResult<()> {
        self.client.update_doc(&self.reference, data).await
    }

    /// Applies a partial update built from a serializable value; every field
    /// the value serializes to is written.
    pub async fn update_with_partial<P>(&self, partial: &P) -> FirestoreResult<()>
    where
        P: Serialize,
    {
        let map = codec::to_map_value(partial)?;
        self.client
            .update_doc(&self.reference, map.into_fields())
            .await
    }

    /// Deletes the source document.
    pub async fn delete(&self) -> FirestoreResult<()> {
        self.client.delete_doc(&self.reference).await
    }
}

/// A document view whose writes enqueue into an in-flight [`Transaction`]
/// instead of being issued immediately.
pub struct TransactionDocument<T> {
    id: String,
    data: T,
    reference: DocumentReference,
}

impl<T> TransactionDocument<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }

    pub fn reference(&self) -> &DocumentReference {
        &self.reference
    }

    /// Queues a partial update of the source document on `transaction`.
    pub fn update(&self, transaction: &mut Transaction, data: UpdateMap) -> FirestoreResult<()> {
        transaction.update(&self.reference, data)?;
        Ok(())
    }

    /// Queues a partial update built from a serializable value.
    pub fn update_with_partial<P>(
        &self,
        transaction: &mut Transaction,
        partial: &P,
    ) -> FirestoreResult<()>
    where
        P: Serialize,
    {
        let map = codec::to_map_value(partial)?;
        transaction.update(&self.reference, map.into_fields())?;
        Ok(())
    }

    /// Queues a delete of the source document on `transaction`.
    pub fn delete(&self, transaction: &mut Transaction) -> FirestoreResult<()> {
        transaction.delete(&self.reference)?;
        Ok(())
    }
}

pub(crate) fn make_document<T>(snapshot: &DocumentSnapshot) -> FirestoreResult<TypedDocument<T>>
where
    T: DeserializeOwned,
{
    let map = snapshot.map_value().ok_or_else(|| {
        internal_error(format!(
            "Document {} exists but has no data",
            snapshot.key().path()
        ))
    })?;
    Ok(TypedDocument {
        id: snapshot.id().to_string(),
        data: codec::from_map_value(map)?,
    })
}

pub(crate) fn make_mutable_document<T>(
    client: &FirestoreClient,
    snapshot: &DocumentSnapshot,
) -> FirestoreResult<MutableDocument<T>>
where
    T: DeserializeOwned,
{
    let document = make_document(snapshot)?;
    let reference = client
        .firestore()
        .doc(&snapshot.key().path().canonical_string())?;
    Ok(MutableDocument {
        id: document.id,
        data: document.data,
        reference,
        client: client.clone(),
    })
}

pub(crate) fn make_transaction_document<T>(
    firestore: &Firestore,
    snapshot: &DocumentSnapshot,
) -> FirestoreResult<TransactionDocument<T>>
where
    T: DeserializeOwned,
{
    let document = make_document(snapshot)?;
    let reference = firestore.doc(&snapshot.key().path().canonical_string())?;
    Ok(TransactionDocument {
        id: document.id,
        data: document.data,
        reference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::database::Firestore;
    use crate::api::snapshot::SnapshotMetadata;
    use crate::model::{DatabaseId, DocumentKey};
    use crate::value::{FirestoreValue, MapValue};
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct City {
        name: String,
    }

    fn existing_snapshot() -> DocumentSnapshot {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), FirestoreValue::from_string("SF"));
        DocumentSnapshot::new(
            DocumentKey::from_string("cities/sf").unwrap(),
            Some(MapValue::new(fields)),
            SnapshotMetadata::default(),
        )
    }

    #[test]
    fn make_document_projects_id_and_data() {
        let document: TypedDocument<City> = make_document(&existing_snapshot()).unwrap();
        assert_eq!(document.id, "sf");
        assert_eq!(document.data.name, "SF");
    }

    #[test]
    fn make_document_rejects_missing_data() {
        let snapshot = DocumentSnapshot::new(
            DocumentKey::from_string("cities/sf").unwrap(),
            None,
            SnapshotMetadata::default(),
        );
        let err = make_document::<City>(&snapshot).unwrap_err();
        assert_eq!(err.code_str(), "firestore/internal");
    }

    #[test]
    fn mutable_document_keeps_reference() {
        let firestore = Firestore::new(DatabaseId::default_database("project"));
        let client = FirestoreClient::with_in_memory(firestore);
        let document: MutableDocument<City> =
            make_mutable_document(&client, &existing_snapshot()).unwrap();
        assert_eq!(document.id(), "sf");
        assert_eq!(document.reference().path().canonical_string(), "cities/sf");
    }
}
