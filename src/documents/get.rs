use serde::de::DeserializeOwned;

use crate::api::client::FirestoreClient;
use crate::api::query::{Query, QueryConstraint};
use crate::api::reference::{CollectionReference, DocumentReference};
use crate::api::transaction::Transaction;
use crate::error::{missing_document, FirestoreResult};
use crate::value::codec;

use super::types::{
    make_document, make_mutable_document, make_transaction_document, MutableDocument,
    TransactionDocument, TypedDocument,
};

/// Result ceiling applied to queries that pass no constraints, so an
/// accidentally unbounded fetch cannot pull a whole collection.
pub const DEFAULT_QUERY_LIMIT: u32 = 500;

/// Fetches a document that is expected to exist.
pub async fn get_document<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<MutableDocument<T>>
where
    T: DeserializeOwned,
{
    let reference = collection.doc(Some(document_id))?;
    get_document_at(client, &reference).await
}

/// Fetches only the data of a document that is expected to exist.
pub async fn get_document_data<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<T>
where
    T: DeserializeOwned,
{
    let reference = collection.doc(Some(document_id))?;
    get_document_data_at(client, &reference).await
}

/// Fetches a document that may not exist.
pub async fn get_document_maybe<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<Option<MutableDocument<T>>>
where
    T: DeserializeOwned,
{
    let reference = collection.doc(Some(document_id))?;
    let snapshot = client.get_doc(&reference).await?;
    if !snapshot.exists() {
        return Ok(None);
    }
    make_mutable_document(client, &snapshot).map(Some)
}

/// Fetches only the data of a document that may not exist.
pub async fn get_document_data_maybe<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<Option<T>>
where
    T: DeserializeOwned,
{
    let reference = collection.doc(Some(document_id))?;
    let snapshot = client.get_doc(&reference).await?;
    if !snapshot.exists() {
        return Ok(None);
    }
    snapshot
        .map_value()
        .map(codec::from_map_value)
        .transpose()
}

/// Fetches the document behind an existing reference; the document is
/// expected to exist.
pub async fn get_document_at<T>(
    client: &FirestoreClient,
    reference: &DocumentReference,
) -> FirestoreResult<MutableDocument<T>>
where
    T: DeserializeOwned,
{
    let snapshot = client.get_doc(reference).await?;
    if !snapshot.exists() {
        return Err(missing_document(reference.path()));
    }
    make_mutable_document(client, &snapshot)
}

/// Fetches only the data behind an existing reference.
pub async fn get_document_data_at<T>(
    client: &FirestoreClient,
    reference: &DocumentReference,
) -> FirestoreResult<T>
where
    T: DeserializeOwned,
{
    let snapshot = client.get_doc(reference).await?;
    match snapshot.map_value() {
        Some(map) => codec::from_map_value(map),
        None => Err(missing_document(reference.path())),
    }
}

/// Reads a document inside a transaction; the document is expected to exist.
pub async fn get_document_in_tx<T>(
    transaction: &Transaction,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<TransactionDocument<T>>
where
    T: DeserializeOwned,
{
    let reference = collection.doc(Some(document_id))?;
    let snapshot = transaction.get(&reference).await?;
    if !snapshot.exists() {
        return Err(missing_document(reference.path()));
    }
    make_transaction_document(collection.firestore(), &snapshot)
}

/// Reads a document inside a transaction; a missing document yields `None`.
pub async fn get_document_in_tx_maybe<T>(
    transaction: &Transaction,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<Option<TransactionDocument<T>>>
where
    T: DeserializeOwned,
{
    let reference = collection.doc(Some(document_id))?;
    let snapshot = transaction.get(&reference).await?;
    if !snapshot.exists() {
        return Ok(None);
    }
    make_transaction_document(collection.firestore(), &snapshot).map(Some)
}

/// Reads only the data of a document inside a transaction.
pub async fn get_document_data_in_tx<T>(
    transaction: &Transaction,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<T>
where
    T: DeserializeOwned,
{
    let reference = collection.doc(Some(document_id))?;
    let snapshot = transaction.get(&reference).await?;
    match snapshot.map_value() {
        Some(map) => codec::from_map_value(map),
        None => Err(missing_document(reference.path())),
    }
}

/// Executes a query over `collection` and returns mutable views of every
/// matching document.
///
/// An empty constraint list applies [`DEFAULT_QUERY_LIMIT`].
pub async fn get_documents<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    constraints: impl IntoIterator<Item = QueryConstraint>,
) -> FirestoreResult<Vec<MutableDocument<T>>>
where
    T: DeserializeOwned,
{
    let query = build_query(collection, constraints)?;
    let snapshot = client.get_docs(&query).await?;
    snapshot
        .documents()
        .iter()
        .map(|document| make_mutable_document(client, document))
        .collect()
}

/// Executes a query over `collection` and returns only the decoded data.
pub async fn get_documents_data<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    constraints: impl IntoIterator<Item = QueryConstraint>,
) -> FirestoreResult<Vec<T>>
where
    T: DeserializeOwned,
{
    let query = build_query(collection, constraints)?;
    let snapshot = client.get_docs(&query).await?;
    snapshot
        .documents()
        .iter()
        .map(|document| make_document(document).map(|typed: TypedDocument<T>| typed.data))
        .collect()
}

pub(crate) fn build_query(
    collection: &CollectionReference,
    constraints: impl IntoIterator<Item = QueryConstraint>,
) -> FirestoreResult<Query> {
    let mut query = collection.query();
    let mut constrained = false;
    for constraint in constraints {
        query = constraint.apply(query)?;
        constrained = true;
    }
    if !constrained {
        query = query.limit(DEFAULT_QUERY_LIMIT)?;
    }
    Ok(query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::database::Firestore;
    use crate::api::query::limit;
    use crate::model::DatabaseId;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct City {
        name: String,
    }

    fn build_client() -> (FirestoreClient, Firestore) {
        let firestore = Firestore::new(DatabaseId::default_database("project"));
        let client = FirestoreClient::with_in_memory(firestore.clone());
        (client, firestore)
    }

    #[test]
    fn empty_constraints_apply_default_limit() {
        let (_, firestore) = build_client();
        let collection = firestore.collection("cities").unwrap();
        let query = build_query(&collection, Vec::new()).unwrap();
        assert_eq!(query.definition().limit(), Some(DEFAULT_QUERY_LIMIT));
    }

    #[test]
    fn explicit_constraints_suppress_default_limit() {
        let (_, firestore) = build_client();
        let collection = firestore.collection("cities").unwrap();
        let query = build_query(&collection, vec![limit(10)]).unwrap();
        assert_eq!(query.definition().limit(), Some(10));
    }

    #[tokio::test]
    async fn required_fetch_of_missing_document_fails() {
        let (client, firestore) = build_client();
        let collection = firestore.collection("cities").unwrap();
        let err = get_document::<City>(&client, &collection, "nowhere")
            .await
            .unwrap_err();
        assert_eq!(err.code_str(), "firestore/not-found");
        assert!(err.message().contains("No document available at cities/nowhere"));
    }

    #[tokio::test]
    async fn maybe_fetch_of_missing_document_returns_none() {
        let (client, firestore) = build_client();
        let collection = firestore.collection("cities").unwrap();
        let document = get_document_maybe::<City>(&client, &collection, "nowhere")
            .await
            .unwrap();
        assert!(document.is_none());
    }
}
