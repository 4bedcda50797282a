//! Typed convenience helpers over the client: `{id, data}` document views,
//! required/maybe fetch paths, mutable views with bound writes, and
//! stream-based watchers.

pub mod get;
pub mod types;
pub mod watch;
pub mod write;

pub use get::{
    get_document, get_document_at, get_document_data, get_document_data_at,
    get_document_data_in_tx, get_document_data_maybe, get_document_in_tx, get_document_in_tx_maybe,
    get_document_maybe, get_documents, get_documents_data, DEFAULT_QUERY_LIMIT,
};
pub use types::{MutableDocument, TransactionDocument, TypedDocument};
pub use watch::{
    watch_document, watch_document_at, watch_document_data, watch_documents, watch_documents_data,
    DocumentDataWatcher, DocumentWatcher, QueryDataWatcher, QueryWatcher,
};
pub use write::{
    add_document, delete_document, delete_document_at, set_document, set_document_at,
    update_document, update_document_at, update_document_partial, update_document_partial_at,
};
