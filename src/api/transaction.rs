use std::collections::BTreeMap;

use crate::api::client::FirestoreClient;
use crate::api::operations::{self, SetOptions, UpdateMap};
use crate::api::reference::DocumentReference;
use crate::api::snapshot::DocumentSnapshot;
use crate::datastore::WriteOperation;
use crate::error::{failed_precondition, resource_exhausted, FirestoreResult};
use crate::model::DocumentKey;
use crate::value::FirestoreValue;

const MAX_TRANSACTION_WRITES: usize = 500;

/// An atomic unit of reads followed by queued writes.
///
/// Reads go straight to the backend; writes queue locally and commit in a
/// single atomic batch. All reads must happen before the first write, matching
/// Firestore's transaction contract. Contention and isolation semantics remain
/// the backend's concern.
pub struct Transaction {
    client: FirestoreClient,
    writes: Vec<WriteOperation>,
}

impl Transaction {
    pub(crate) fn new(client: FirestoreClient) -> Self {
        Self {
            client,
            writes: Vec::new(),
        }
    }

    /// Reads a document inside this transaction.
    pub async fn get(&self, reference: &DocumentReference) -> FirestoreResult<DocumentSnapshot> {
        if !self.writes.is_empty() {
            return Err(failed_precondition(
                "Transactions require all reads to be executed before all writes",
            ));
        }
        self.client.ensure_same_database(reference.firestore())?;
        self.client.datastore().get_document(reference.key()).await
    }

    /// Queues a set operation.
    pub fn set(
        &mut self,
        reference: &DocumentReference,
        data: BTreeMap<String, FirestoreValue>,
        options: Option<SetOptions>,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.client.ensure_same_database(reference.firestore())?;
        let key = reference.key().clone();
        let options = options.unwrap_or_default();
        let encoded = operations::encode_set_data(data, &options)?;
        self.writes.push(WriteOperation::Set {
            key,
            data: encoded.map,
            mask: encoded.mask,
            transforms: encoded.transforms,
        });
        Ok(self)
    }

    /// Queues a partial update.
    pub fn update(
        &mut self,
        reference: &DocumentReference,
        data: UpdateMap,
    ) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.client.ensure_same_database(reference.firestore())?;
        let key = reference.key().clone();
        let encoded = operations::encode_update_data(data)?;
        self.writes.push(WriteOperation::Update {
            key,
            data: encoded.map,
            field_paths: encoded.field_paths,
            transforms: encoded.transforms,
        });
        Ok(self)
    }

    /// Queues a delete operation.
    pub fn delete(&mut self, reference: &DocumentReference) -> FirestoreResult<&mut Self> {
        self.ensure_capacity()?;
        self.client.ensure_same_database(reference.firestore())?;
        let key = reference.key().clone();
        self.writes.push(WriteOperation::Delete { key });
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commits all queued writes atomically.
    pub async fn commit(self) -> FirestoreResult<()> {
        let keys: Vec<DocumentKey> = self.writes.iter().map(|write| write.key().clone()).collect();
        self.client.datastore().commit(self.writes).await?;
        self.client.notify_writes(&keys).await;
        Ok(())
    }

    fn ensure_capacity(&self) -> FirestoreResult<()> {
        if self.writes.len() >= MAX_TRANSACTION_WRITES {
            return Err(resource_exhausted(
                "A transaction cannot contain more than 500 write operations",
            ));
        }
        Ok(())
    }
}
