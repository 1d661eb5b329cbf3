//! Remote synchronization for the entry list.
//!
//! The synchronizer keeps one subscription to the signed-in user's
//! collection. Every snapshot is decoded and reconciled with writes this
//! session issued but the remote has not reflected yet.
//!
//! ## States
//!
//! ```text
//! Unsubscribed --subscribe ok--> Subscribed --close--> Unsubscribed
//!                                    |  ^
//!                   error / stream end  |  subscribe ok
//!                                    v  |
//!                               Reconnecting
//! ```

mod options;
mod pending;
mod status;
mod synchronizer;

pub use options::{Backoff, ReconcilePolicy, SyncOptions};
pub use pending::{PendingWrite, PendingWrites};
pub use status::{SyncState, SyncStatus};
pub use synchronizer::{Notification, Synchronizer, WriteFailure, WriteOp};
