//! todolist core library
//!
//! Entry model, the local item store, the remote document store boundary,
//! snapshot synchronization and the session that ties them together.

pub mod auth;
pub mod models;
pub mod protocol;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;

pub use auth::{AuthError, AuthProvider, UserId};
pub use models::{Entry, EntryId};
pub use protocol::{collection_key, ClientMessage, ServerMessage, TODO_COLLECTION_KIND};
pub use remote::{
    Document, DocumentStore, FieldValue, MemoryDocumentStore, RemoteError, Snapshot,
    SnapshotStream,
};
pub use session::{SessionError, TodoSession};
pub use store::{ItemStore, SubscriptionId};
pub use sync::{Backoff, ReconcilePolicy, SyncOptions, SyncState, SyncStatus};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
