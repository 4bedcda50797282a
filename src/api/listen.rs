//! Client-local snapshot listeners.
//!
//! Writes issued through a [`FirestoreClient`](crate::api::client::FirestoreClient)
//! fan out to listeners registered on the same client: after a write commits,
//! each affected target is re-read and a fresh snapshot is delivered. Errors
//! are delivered in-band. Dropping a listener (or calling
//! [`ListenerRegistration::detach`]) stops delivery.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::task::{Context, Poll};

use futures::Stream;

use crate::api::client::FirestoreClient;
use crate::api::query::QueryDefinition;
use crate::api::snapshot::{DocumentSnapshot, QuerySnapshot};
use crate::error::FirestoreResult;
use crate::model::DocumentKey;

#[derive(Clone)]
pub(crate) enum ListenerTarget {
    Document(DocumentKey),
    Query(QueryDefinition),
}

impl ListenerTarget {
    pub(crate) fn is_affected_by(&self, changed: &[DocumentKey]) -> bool {
        match self {
            ListenerTarget::Document(key) => changed.iter().any(|candidate| candidate == key),
            ListenerTarget::Query(definition) => changed
                .iter()
                .any(|candidate| definition.matches_collection(candidate)),
        }
    }
}

#[derive(Clone)]
pub(crate) enum ListenerSink {
    Document(async_channel::Sender<FirestoreResult<DocumentSnapshot>>),
    Query(async_channel::Sender<FirestoreResult<QuerySnapshot>>),
}

impl ListenerSink {
    fn is_closed(&self) -> bool {
        match self {
            ListenerSink::Document(sender) => sender.is_closed(),
            ListenerSink::Query(sender) => sender.is_closed(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct ListenerEntry {
    pub(crate) target: ListenerTarget,
    pub(crate) sink: ListenerSink,
}

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    listeners: Mutex<HashMap<u64, ListenerEntry>>,
    next_listener_id: AtomicU64,
}

impl ListenerRegistry {
    pub(crate) fn register(&self, entry: ListenerEntry) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.listeners.lock().unwrap().insert(id, entry);
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.listeners.lock().unwrap().remove(&id);
    }

    /// Returns the listeners whose target overlaps the changed keys, pruning
    /// entries whose receiver has gone away.
    pub(crate) fn affected_by(&self, changed: &[DocumentKey]) -> Vec<ListenerEntry> {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|_, entry| !entry.sink.is_closed());
        listeners
            .values()
            .filter(|entry| entry.target.is_affected_by(changed))
            .cloned()
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }
}

/// RAII handle for a registered listener; dropping it detaches the listener.
pub struct ListenerRegistration {
    client: FirestoreClient,
    id: Option<u64>,
}

impl ListenerRegistration {
    pub(crate) fn new(client: FirestoreClient, id: u64) -> Self {
        Self {
            client,
            id: Some(id),
        }
    }

    pub fn detach(mut self) {
        if let Some(id) = self.id.take() {
            self.client.remove_listener(id);
        }
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.client.remove_listener(id);
        }
    }
}

/// Delivers snapshots of a single document, starting with its current state.
pub struct DocumentListener {
    receiver: async_channel::Receiver<FirestoreResult<DocumentSnapshot>>,
    _registration: ListenerRegistration,
}

impl DocumentListener {
    pub(crate) fn new(
        receiver: async_channel::Receiver<FirestoreResult<DocumentSnapshot>>,
        registration: ListenerRegistration,
    ) -> Self {
        Self {
            receiver,
            _registration: registration,
        }
    }

    /// Waits for the next snapshot. Returns `None` once the listener has been
    /// detached and the channel drained.
    pub async fn next(&mut self) -> Option<FirestoreResult<DocumentSnapshot>> {
        self.receiver.recv().await.ok()
    }
}

impl Stream for DocumentListener {
    type Item = FirestoreResult<DocumentSnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

/// Delivers result sets of a query, starting with its current state.
pub struct QueryListener {
    receiver: async_channel::Receiver<FirestoreResult<QuerySnapshot>>,
    _registration: ListenerRegistration,
}

impl QueryListener {
    pub(crate) fn new(
        receiver: async_channel::Receiver<FirestoreResult<QuerySnapshot>>,
        registration: ListenerRegistration,
    ) -> Self {
        Self {
            receiver,
            _registration: registration,
        }
    }

    pub async fn next(&mut self) -> Option<FirestoreResult<QuerySnapshot>> {
        self.receiver.recv().await.ok()
    }
}

impl Stream for QueryListener {
    type Item = FirestoreResult<QuerySnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}
