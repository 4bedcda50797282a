//! Typed convenience helpers for Cloud Firestore.
//!
//! The `documents` module is the main entry point: it layers typed
//! `{id, data}` views, required/maybe fetch paths, mutable views with bound
//! `update`/`delete` operations, transaction-scoped views, and stream-based
//! watchers on top of a [`FirestoreClient`]. The client delegates every read
//! and write to a [`datastore::Datastore`] backend: an in-memory store for
//! tests and demos, or the Firestore REST endpoints.
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//! use typed_firestore::documents::{get_document, set_document};
//! use typed_firestore::{DatabaseId, Firestore, FirestoreClient};
//!
//! #[derive(Serialize, Deserialize)]
//! struct City {
//!     name: String,
//!     population: i64,
//! }
//!
//! # async fn run() -> typed_firestore::FirestoreResult<()> {
//! let firestore = Firestore::new(DatabaseId::default_database("my-project"));
//! let client = FirestoreClient::with_http(firestore.clone())?;
//! let cities = firestore.collection("cities")?;
//!
//! set_document(
//!     &client,
//!     &cities,
//!     "sf",
//!     &City { name: "San Francisco".into(), population: 860_000 },
//!     None,
//! )
//! .await?;
//!
//! let city = get_document::<City>(&client, &cities, "sf").await?;
//! city.delete().await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod datastore;
pub mod documents;
pub mod error;
pub mod model;
pub mod value;

pub use api::{
    CollectionReference, DocumentReference, Firestore, FirestoreClient, Query, SetOptions,
    Transaction, UpdateMap,
};
pub use error::{FirestoreError, FirestoreErrorCode, FirestoreResult};
pub use model::{DatabaseId, DocumentKey, FieldPath, ResourcePath, Timestamp};
pub use value::FirestoreValue;
