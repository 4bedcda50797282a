pub mod client;
pub mod database;
pub mod listen;
pub(crate) mod operations;
pub mod query;
pub(crate) mod reference;
pub(crate) mod snapshot;
pub mod transaction;

pub use client::FirestoreClient;
pub use database::Firestore;
pub use listen::{DocumentListener, ListenerRegistration, QueryListener};
pub use operations::{FieldTransform, SetOptions, TransformOperation, UpdateMap};
pub use query::{
    limit, limit_to_last, order_by, where_field, FilterOperator, LimitType, OrderDirection, Query,
    QueryConstraint,
};
pub use reference::{CollectionReference, DocumentReference};
pub use snapshot::{DocumentSnapshot, QuerySnapshot, SnapshotMetadata};
pub use transaction::Transaction;
