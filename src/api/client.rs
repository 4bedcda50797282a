use std::collections::BTreeMap;
use std::sync::Arc;

use crate::api::database::Firestore;
use crate::api::listen::{
    DocumentListener, ListenerEntry, ListenerRegistration, ListenerRegistry, ListenerSink,
    ListenerTarget, QueryListener,
};
use crate::api::operations::{self, SetOptions, UpdateMap};
use crate::api::query::Query;
use crate::api::reference::{CollectionReference, DocumentReference};
use crate::api::snapshot::{DocumentSnapshot, QuerySnapshot};
use crate::api::transaction::Transaction;
use crate::datastore::{Datastore, HttpDatastore, InMemoryDatastore, TokenProviderArc};
use crate::error::{internal_error, FirestoreResult};
use crate::model::DocumentKey;
use crate::value::FirestoreValue;

/// The delegation point for every read, write, query, and listener.
#[derive(Clone)]
pub struct FirestoreClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    firestore: Firestore,
    datastore: Arc<dyn Datastore>,
    listeners: ListenerRegistry,
}

impl FirestoreClient {
    /// Creates a client backed by the supplied datastore implementation.
    pub fn new(firestore: Firestore, datastore: Arc<dyn Datastore>) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                firestore,
                datastore,
                listeners: ListenerRegistry::default(),
            }),
        }
    }

    /// Returns a client that stores documents in memory only.
    ///
    /// Useful for tests or demos where persistence/network access is not
    /// required.
    pub fn with_in_memory(firestore: Firestore) -> Self {
        Self::new(firestore, Arc::new(InMemoryDatastore::new()))
    }

    /// Builds a client that talks to Firestore over the REST endpoints using
    /// anonymous credentials.
    pub fn with_http(firestore: Firestore) -> FirestoreResult<Self> {
        let datastore = HttpDatastore::from_database_id(firestore.database_id().clone())?;
        Ok(Self::new(firestore, Arc::new(datastore)))
    }

    /// Builds an HTTP-backed client that attaches the provided token provider
    /// to every request.
    pub fn with_http_authenticated(
        firestore: Firestore,
        auth_provider: TokenProviderArc,
    ) -> FirestoreResult<Self> {
        let datastore = HttpDatastore::builder(firestore.database_id().clone())
            .with_auth_provider(auth_provider)
            .build()?;
        Ok(Self::new(firestore, Arc::new(datastore)))
    }

    pub fn firestore(&self) -> &Firestore {
        &self.inner.firestore
    }

    pub(crate) fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.inner.datastore
    }

    /// Fetches the document at `reference`.
    ///
    /// Returns a snapshot that may or may not contain data depending on
    /// whether the document exists.
    pub async fn get_doc(&self, reference: &DocumentReference) -> FirestoreResult<DocumentSnapshot> {
        self.ensure_same_database(reference.firestore())?;
        self.inner.datastore.get_document(reference.key()).await
    }

    /// Writes the provided map of fields to `reference`, replacing the
    /// document unless merge options are given.
    pub async fn set_doc(
        &self,
        reference: &DocumentReference,
        data: BTreeMap<String, FirestoreValue>,
        options: Option<SetOptions>,
    ) -> FirestoreResult<()> {
        self.ensure_same_database(reference.firestore())?;
        let key = reference.key().clone();
        let options = options.unwrap_or_default();
        let encoded = operations::encode_set_data(data, &options)?;
        self.inner
            .datastore
            .set_document(&key, encoded.map, encoded.mask, encoded.transforms)
            .await?;
        self.notify_writes(std::slice::from_ref(&key)).await;
        Ok(())
    }

    /// Applies a partial update to the document at `reference`, touching only
    /// the provided fields and requiring the document to exist.
    pub async fn update_doc(
        &self,
        reference: &DocumentReference,
        data: UpdateMap,
    ) -> FirestoreResult<()> {
        self.ensure_same_database(reference.firestore())?;
        let key = reference.key().clone();
        let encoded = operations::encode_update_data(data)?;
        self.inner
            .datastore
            .update_document(&key, encoded.map, encoded.field_paths, encoded.transforms)
            .await?;
        self.notify_writes(std::slice::from_ref(&key)).await;
        Ok(())
    }

    /// Deletes the document at `reference`. Succeeds even if the document does
    /// not exist.
    pub async fn delete_doc(&self, reference: &DocumentReference) -> FirestoreResult<()> {
        self.ensure_same_database(reference.firestore())?;
        let key = reference.key().clone();
        self.inner.datastore.delete_document(&key).await?;
        self.notify_writes(std::slice::from_ref(&key)).await;
        Ok(())
    }

    /// Adds a new document to `collection` under a generated ID and returns
    /// the resulting snapshot.
    pub async fn add_doc(
        &self,
        collection: &CollectionReference,
        data: BTreeMap<String, FirestoreValue>,
    ) -> FirestoreResult<DocumentSnapshot> {
        let doc_ref = collection.doc(None)?;
        self.set_doc(&doc_ref, data, None).await?;
        self.get_doc(&doc_ref).await
    }

    /// Executes the provided query and returns its results.
    pub async fn get_docs(&self, query: &Query) -> FirestoreResult<QuerySnapshot> {
        self.ensure_same_database(query.firestore())?;
        let documents = self.inner.datastore.run_query(query.definition()).await?;
        Ok(QuerySnapshot::new(documents))
    }

    /// Starts a transaction scoped to this client.
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Registers a listener on a single document. The listener receives the
    /// current snapshot immediately, then a fresh snapshot after every write
    /// issued through this client that touches the document.
    pub async fn listen_doc(
        &self,
        reference: &DocumentReference,
    ) -> FirestoreResult<DocumentListener> {
        self.ensure_same_database(reference.firestore())?;
        let (sender, receiver) = async_channel::unbounded();

        let initial = self.inner.datastore.get_document(reference.key()).await;
        let _ = sender.send(initial).await;

        let id = self.inner.listeners.register(ListenerEntry {
            target: ListenerTarget::Document(reference.key().clone()),
            sink: ListenerSink::Document(sender),
        });
        let registration = ListenerRegistration::new(self.clone(), id);
        Ok(DocumentListener::new(receiver, registration))
    }

    /// Registers a listener on a query. Delivery follows the same contract as
    /// [`listen_doc`](Self::listen_doc): any write to the queried collection
    /// re-runs the query.
    pub async fn listen_query(&self, query: &Query) -> FirestoreResult<QueryListener> {
        self.ensure_same_database(query.firestore())?;
        let (sender, receiver) = async_channel::unbounded();

        let initial = self
            .inner
            .datastore
            .run_query(query.definition())
            .await
            .map(QuerySnapshot::new);
        let _ = sender.send(initial).await;

        let id = self.inner.listeners.register(ListenerEntry {
            target: ListenerTarget::Query(query.definition().clone()),
            sink: ListenerSink::Query(sender),
        });
        let registration = ListenerRegistration::new(self.clone(), id);
        Ok(QueryListener::new(receiver, registration))
    }

    pub(crate) fn remove_listener(&self, id: u64) {
        self.inner.listeners.remove(id);
    }

    /// Re-reads every listener target affected by the given keys and delivers
    /// the fresh snapshots.
    pub(crate) async fn notify_writes(&self, changed: &[DocumentKey]) {
        if changed.is_empty() {
            return;
        }
        let affected = self.inner.listeners.affected_by(changed);
        for entry in affected {
            match (&entry.target, &entry.sink) {
                (ListenerTarget::Document(key), ListenerSink::Document(sender)) => {
                    let snapshot = self.inner.datastore.get_document(key).await;
                    if sender.send(snapshot).await.is_err() {
                        log::debug!("dropping detached document listener for {}", key.path());
                    }
                }
                (ListenerTarget::Query(definition), ListenerSink::Query(sender)) => {
                    let snapshot = self
                        .inner
                        .datastore
                        .run_query(definition)
                        .await
                        .map(QuerySnapshot::new);
                    if sender.send(snapshot).await.is_err() {
                        log::debug!(
                            "dropping detached query listener for {}",
                            definition.collection_path()
                        );
                    }
                }
                _ => {}
            }
        }
    }

    pub(crate) fn ensure_same_database(&self, firestore: &Firestore) -> FirestoreResult<()> {
        if self.inner.firestore.database_id() != firestore.database_id() {
            return Err(internal_error(
                "Reference targets a different Firestore instance than this client",
            ));
        }
        Ok(())
    }
}
