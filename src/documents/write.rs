use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::api::client::FirestoreClient;
use crate::api::operations::{SetOptions, UpdateMap};
use crate::api::reference::{CollectionReference, DocumentReference};
use crate::error::FirestoreResult;
use crate::value::codec;

use super::types::{make_mutable_document, MutableDocument};

/// Writes `data` to the document identified by `document_id`, replacing it
/// unless merge options are given.
pub async fn set_document<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
    data: &T,
    options: Option<SetOptions>,
) -> FirestoreResult<()>
where
    T: Serialize,
{
    let reference = collection.doc(Some(document_id))?;
    set_document_at(client, &reference, data, options).await
}

/// Writes `data` to an existing reference.
pub async fn set_document_at<T>(
    client: &FirestoreClient,
    reference: &DocumentReference,
    data: &T,
    options: Option<SetOptions>,
) -> FirestoreResult<()>
where
    T: Serialize,
{
    let map = codec::to_map_value(data)?;
    client.set_doc(reference, map.into_fields(), options).await
}

/// Applies a partial update to the document identified by `document_id`.
pub async fn update_document(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
    data: UpdateMap,
) -> FirestoreResult<()> {
    let reference = collection.doc(Some(document_id))?;
    client.update_doc(&reference, data).await
}

/// Applies a partial update to an existing reference.
pub async fn update_document_at(
    client: &FirestoreClient,
    reference: &DocumentReference,
    data: UpdateMap,
) -> FirestoreResult<()> {
    client.update_doc(reference, data).await
}

/// Applies a partial update built from a serializable value; every field the
/// value serializes to is written.
pub async fn update_document_partial<P>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
    partial: &P,
) -> FirestoreResult<()>
where
    P: Serialize,
{
    let reference = collection.doc(Some(document_id))?;
    update_document_partial_at(client, &reference, partial).await
}

/// Applies a serialized partial update to an existing reference.
pub async fn update_document_partial_at<P>(
    client: &FirestoreClient,
    reference: &DocumentReference,
    partial: &P,
) -> FirestoreResult<()>
where
    P: Serialize,
{
    let map = codec::to_map_value(partial)?;
    client.update_doc(reference, map.into_fields()).await
}

/// Deletes the document identified by `document_id`.
pub async fn delete_document(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<()> {
    let reference = collection.doc(Some(document_id))?;
    client.delete_doc(&reference).await
}

/// Deletes the document behind an existing reference.
pub async fn delete_document_at(
    client: &FirestoreClient,
    reference: &DocumentReference,
) -> FirestoreResult<()> {
    client.delete_doc(reference).await
}

/// Adds a new document to `collection` under a generated ID and returns a
/// mutable view of it.
pub async fn add_document<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    data: &T,
) -> FirestoreResult<MutableDocument<T>>
where
    T: Serialize + DeserializeOwned,
{
    let map = codec::to_map_value(data)?;
    let snapshot = client.add_doc(collection, map.into_fields()).await?;
    make_mutable_document(client, &snapshot)
}
