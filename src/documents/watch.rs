//! Stream-based document and query watchers.
//!
//! Each watcher wraps a client listener and adapts raw snapshots into typed
//! views. "Still loading" is simply the stream not having yielded yet; errors
//! arrive in-band as `Err` items; dropping the watcher detaches the listener
//! so no deliveries happen after teardown.

use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::de::DeserializeOwned;

use crate::api::client::FirestoreClient;
use crate::api::listen::{DocumentListener, QueryListener};
use crate::api::query::QueryConstraint;
use crate::api::reference::{CollectionReference, DocumentReference};
use crate::api::snapshot::{DocumentSnapshot, QuerySnapshot};
use crate::error::{internal_error, FirestoreResult};
use crate::value::codec;

use super::get::build_query;
use super::types::{make_mutable_document, MutableDocument};

/// Watches a single document, yielding a mutable view whenever it exists and
/// `None` whenever it does not.
pub struct DocumentWatcher<T> {
    listener: DocumentListener,
    client: FirestoreClient,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DocumentWatcher<T>
where
    T: DeserializeOwned,
{
    /// Waits for the next delivery. Returns `None` once the watcher has been
    /// detached and the channel drained.
    pub async fn next(&mut self) -> Option<FirestoreResult<Option<MutableDocument<T>>>> {
        let snapshot = self.listener.next().await?;
        Some(snapshot.and_then(|snapshot| adapt_document(&self.client, &snapshot)))
    }
}

impl<T> Stream for DocumentWatcher<T>
where
    T: DeserializeOwned,
{
    type Item = FirestoreResult<Option<MutableDocument<T>>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let client = self.client.clone();
        Pin::new(&mut self.listener).poll_next(cx).map(|item| {
            item.map(|result| result.and_then(|snapshot| adapt_document(&client, &snapshot)))
        })
    }
}

/// Watches a single document, yielding only its decoded data.
pub struct DocumentDataWatcher<T> {
    listener: DocumentListener,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DocumentDataWatcher<T>
where
    T: DeserializeOwned,
{
    pub async fn next(&mut self) -> Option<FirestoreResult<Option<T>>> {
        let snapshot = self.listener.next().await?;
        Some(snapshot.and_then(|snapshot| adapt_document_data(&snapshot)))
    }
}

impl<T> Stream for DocumentDataWatcher<T>
where
    T: DeserializeOwned,
{
    type Item = FirestoreResult<Option<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.listener)
            .poll_next(cx)
            .map(|item| item.map(|result| result.and_then(|snapshot| adapt_document_data(&snapshot))))
    }
}

/// Watches a query, yielding mutable views of every matching document.
pub struct QueryWatcher<T> {
    listener: QueryListener,
    client: FirestoreClient,
    _marker: PhantomData<fn() -> T>,
}

impl<T> QueryWatcher<T>
where
    T: DeserializeOwned,
{
    pub async fn next(&mut self) -> Option<FirestoreResult<Vec<MutableDocument<T>>>> {
        let snapshot = self.listener.next().await?;
        Some(snapshot.and_then(|snapshot| adapt_query(&self.client, &snapshot)))
    }
}

impl<T> Stream for QueryWatcher<T>
where
    T: DeserializeOwned,
{
    type Item = FirestoreResult<Vec<MutableDocument<T>>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let client = self.client.clone();
        Pin::new(&mut self.listener).poll_next(cx).map(|item| {
            item.map(|result| result.and_then(|snapshot| adapt_query(&client, &snapshot)))
        })
    }
}

/// Watches a query, yielding only the decoded data of every match.
pub struct QueryDataWatcher<T> {
    listener: QueryListener,
    _marker: PhantomData<fn() -> T>,
}

impl<T> QueryDataWatcher<T>
where
    T: DeserializeOwned,
{
    pub async fn next(&mut self) -> Option<FirestoreResult<Vec<T>>> {
        let snapshot = self.listener.next().await?;
        Some(snapshot.and_then(|snapshot| adapt_query_data(&snapshot)))
    }
}

impl<T> Stream for QueryDataWatcher<T>
where
    T: DeserializeOwned,
{
    type Item = FirestoreResult<Vec<T>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.listener)
            .poll_next(cx)
            .map(|item| item.map(|result| result.and_then(|snapshot| adapt_query_data(&snapshot))))
    }
}

/// Watches the document identified by `document_id`.
pub async fn watch_document<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<DocumentWatcher<T>>
where
    T: DeserializeOwned,
{
    let reference = collection.doc(Some(document_id))?;
    watch_document_at(client, &reference).await
}

/// Watches the document behind an existing reference.
pub async fn watch_document_at<T>(
    client: &FirestoreClient,
    reference: &DocumentReference,
) -> FirestoreResult<DocumentWatcher<T>>
where
    T: DeserializeOwned,
{
    let listener = client.listen_doc(reference).await?;
    Ok(DocumentWatcher {
        listener,
        client: client.clone(),
        _marker: PhantomData,
    })
}

/// Watches only the data of the document identified by `document_id`.
pub async fn watch_document_data<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    document_id: &str,
) -> FirestoreResult<DocumentDataWatcher<T>>
where
    T: DeserializeOwned,
{
    let reference = collection.doc(Some(document_id))?;
    let listener = client.listen_doc(&reference).await?;
    Ok(DocumentDataWatcher {
        listener,
        _marker: PhantomData,
    })
}

/// Watches a query over `collection`. An empty constraint list applies the
/// same default result ceiling as the one-shot fetch.
pub async fn watch_documents<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    constraints: impl IntoIterator<Item = QueryConstraint>,
) -> FirestoreResult<QueryWatcher<T>>
where
    T: DeserializeOwned,
{
    let query = build_query(collection, constraints)?;
    let listener = client.listen_query(&query).await?;
    Ok(QueryWatcher {
        listener,
        client: client.clone(),
        _marker: PhantomData,
    })
}

/// Watches only the decoded data of a query over `collection`.
pub async fn watch_documents_data<T>(
    client: &FirestoreClient,
    collection: &CollectionReference,
    constraints: impl IntoIterator<Item = QueryConstraint>,
) -> FirestoreResult<QueryDataWatcher<T>>
where
    T: DeserializeOwned,
{
    let query = build_query(collection, constraints)?;
    let listener = client.listen_query(&query).await?;
    Ok(QueryDataWatcher {
        listener,
        _marker: PhantomData,
    })
}

fn adapt_document<T>(
    client: &FirestoreClient,
    snapshot: &DocumentSnapshot,
) -> FirestoreResult<Option<MutableDocument<T>>>
where
    T: DeserializeOwned,
{
    if !snapshot.exists() {
        return Ok(None);
    }
    make_mutable_document(client, snapshot).map(Some)
}

fn adapt_document_data<T>(snapshot: &DocumentSnapshot) -> FirestoreResult<Option<T>>
where
    T: DeserializeOwned,
{
    snapshot.map_value().map(codec::from_map_value).transpose()
}

fn adapt_query<T>(
    client: &FirestoreClient,
    snapshot: &QuerySnapshot,
) -> FirestoreResult<Vec<MutableDocument<T>>>
where
    T: DeserializeOwned,
{
    snapshot
        .documents()
        .iter()
        .map(|document| make_mutable_document(client, document))
        .collect()
}

fn adapt_query_data<T>(snapshot: &QuerySnapshot) -> FirestoreResult<Vec<T>>
where
    T: DeserializeOwned,
{
    snapshot
        .documents()
        .iter()
        .map(|document| match document.map_value() {
            Some(map) => codec::from_map_value(map),
            None => Err(internal_error(format!(
                "Query result {} has no data",
                document.key().path()
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::database::Firestore;
    use crate::documents::write::set_document;
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

    #[tokio::test]
    async fn document_watcher_tracks_lifecycle() {
        let (client, firestore) = build_client();
        let cities = firestore.collection("cities").unwrap();

        let mut watcher = watch_document::<City>(&client, &cities, "sf")
            .await
            .expect("watch");

        // Initial delivery: document does not exist yet.
        let initial = watcher.next().await.expect("delivery").expect("snapshot");
        assert!(initial.is_none());

        set_document(
            &client,
            &cities,
            "sf",
            &City {
                name: "San Francisco".into(),
            },
            None,
        )
        .await
        .expect("set");

        let created = watcher.next().await.expect("delivery").expect("snapshot");
        let document = created.expect("document exists");
        assert_eq!(document.id(), "sf");
        assert_eq!(document.data().name, "San Francisco");

        document.delete().await.expect("delete");
        let deleted = watcher.next().await.expect("delivery").expect("snapshot");
        assert!(deleted.is_none());
    }

    #[tokio::test]
    async fn query_watcher_sees_new_matches() {
        let (client, firestore) = build_client();
        let cities = firestore.collection("cities").unwrap();

        let mut watcher = watch_documents::<City>(&client, &cities, Vec::new())
            .await
            .expect("watch");
        let initial = watcher.next().await.expect("delivery").expect("snapshot");
        assert!(initial.is_empty());

        set_document(
            &client,
            &cities,
            "sf",
            &City {
                name: "San Francisco".into(),
            },
            None,
        )
        .await
        .expect("set");

        let updated = watcher.next().await.expect("delivery").expect("snapshot");
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].data().name, "San Francisco");
    }

    #[tokio::test]
    async fn data_watcher_yields_decoded_models() {
        let (client, firestore) = build_client();
        let cities = firestore.collection("cities").unwrap();

        let mut watcher = watch_document_data::<City>(&client, &cities, "sf")
            .await
            .expect("watch");
        let initial = watcher.next().await.expect("delivery").expect("snapshot");
        assert!(initial.is_none());

        set_document(
            &client,
            &cities,
            "sf",
            &City {
                name: "San Francisco".into(),
            },
            None,
        )
        .await
        .expect("set");

        let data = watcher
            .next()
            .await
            .expect("delivery")
            .expect("snapshot")
            .expect("data");
        assert_eq!(data.name, "San Francisco");
    }
}
