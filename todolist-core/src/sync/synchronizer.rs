//! Subscription and write-through for one user's collection.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Sleep};

use super::options::{ReconcilePolicy, SyncOptions};
use super::pending::{PendingWrite, PendingWrites};
use super::status::{SyncState, SyncStatus};
use crate::models::{Entry, EntryId};
use crate::remote::{
    decode_snapshot, encode_entry, Document, DocumentStore, RemoteError, Snapshot, SnapshotStream,
};
use crate::store::ItemStore;

/// How long closing waits for queued writes to reach the remote store.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

type SubscribeFuture = BoxFuture<'static, Result<SnapshotStream, RemoteError>>;

/// A write queued for the remote store.
#[derive(Debug, Clone)]
pub enum WriteOp {
    Set {
        seq: u64,
        id: EntryId,
        document: Document,
    },
    Delete {
        seq: u64,
        id: EntryId,
    },
}

/// A remote write that did not go through.
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub seq: u64,
    pub id: EntryId,
    pub error: RemoteError,
}

/// Result of one remote write, as reported by the writer task.
#[derive(Debug)]
enum WriteOutcome {
    Acked { seq: u64, id: EntryId },
    Failed(WriteFailure),
}

/// Something the synchronizer has to react to.
pub enum Notification {
    Snapshot(Snapshot),
    Subscribed(Result<SnapshotStream, RemoteError>),
    Failed(RemoteError),
    Ended,
    RetryDue,
    WriteAcked { seq: u64, id: EntryId },
    WriteFailed(WriteFailure),
}

impl std::fmt::Debug for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::Snapshot(snapshot) => f.debug_tuple("Snapshot").field(snapshot).finish(),
            Notification::Subscribed(Ok(_)) => f.write_str("Subscribed(Ok(..))"),
            Notification::Subscribed(Err(e)) => f.debug_tuple("Subscribed").field(e).finish(),
            Notification::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
            Notification::Ended => f.write_str("Ended"),
            Notification::RetryDue => f.write_str("RetryDue"),
            Notification::WriteAcked { seq, id } => f
                .debug_struct("WriteAcked")
                .field("seq", seq)
                .field("id", id)
                .finish(),
            Notification::WriteFailed(failure) => {
                f.debug_tuple("WriteFailed").field(failure).finish()
            }
        }
    }
}

/// Keeps the item store in step with a remote collection.
pub struct Synchronizer {
    remote: Arc<dyn DocumentStore>,
    collection: String,
    options: SyncOptions,
    state: SyncState,
    stream: Option<SnapshotStream>,
    /// Subscription attempt in progress.
    connecting: Option<SubscribeFuture>,
    retry: Option<Pin<Box<Sleep>>>,
    attempt: u32,
    snapshots: u64,
    pending: PendingWrites,
    /// Sequence number of the latest write per entry.
    latest_write: HashMap<EntryId, u64>,
    next_seq: u64,
    last_remote: Option<Vec<Entry>>,
    writes: Option<mpsc::UnboundedSender<WriteOp>>,
    writer: Option<JoinHandle<()>>,
    outcomes: mpsc::UnboundedReceiver<WriteOutcome>,
}

impl Synchronizer {
    /// Creates a synchronizer and starts its writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        remote: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        options: SyncOptions,
    ) -> Self {
        let collection = collection.into();
        let (writes, write_rx) = mpsc::unbounded_channel();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();

        let writer = tokio::spawn(run_writer(
            remote.clone(),
            collection.clone(),
            write_rx,
            outcome_tx,
        ));

        Self {
            remote,
            collection,
            options,
            state: SyncState::Unsubscribed,
            stream: None,
            connecting: None,
            retry: None,
            attempt: 0,
            snapshots: 0,
            pending: PendingWrites::new(),
            latest_write: HashMap::new(),
            next_seq: 0,
            last_remote: None,
            writes: Some(writes),
            writer: Some(writer),
            outcomes,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            state: self.state,
            pending: self.pending.len(),
            snapshots: self.snapshots,
        }
    }

    /// Starts a subscription attempt. Its result arrives as
    /// [`Notification::Subscribed`].
    pub fn subscribe(&mut self) {
        self.retry = None;
        let remote = self.remote.clone();
        let collection = self.collection.clone();
        self.connecting = Some(Box::pin(async move {
            remote.subscribe(&collection).await
        }));
    }

    /// Tears down the subscription, then waits for queued writes to be sent.
    pub async fn close(&mut self) {
        self.stream = None;
        self.connecting = None;
        self.retry = None;
        self.state = SyncState::Unsubscribed;
        tracing::info!("Unsubscribed from collection {}", self.collection);

        // Dropping the sender lets the writer finish once the queue is empty.
        self.writes = None;
        if let Some(writer) = self.writer.take() {
            if timeout(FLUSH_TIMEOUT, writer).await.is_err() {
                tracing::warn!(
                    "Gave up flushing writes for {} after {:?}",
                    self.collection,
                    FLUSH_TIMEOUT
                );
            }
        }
    }

    /// Waits for the next notification. Cancel safe.
    pub async fn next_notification(&mut self) -> Notification {
        tokio::select! {
            item = next_item(&mut self.stream) => match item {
                Some(Ok(snapshot)) => Notification::Snapshot(snapshot),
                Some(Err(e)) => Notification::Failed(e),
                None => Notification::Ended,
            },
            result = wait_subscribe(&mut self.connecting) => Notification::Subscribed(result),
            _ = wait_retry(&mut self.retry) => Notification::RetryDue,
            Some(outcome) = self.outcomes.recv() => match outcome {
                WriteOutcome::Acked { seq, id } => Notification::WriteAcked { seq, id },
                WriteOutcome::Failed(failure) => Notification::WriteFailed(failure),
            },
        }
    }

    pub fn handle(&mut self, notification: Notification, store: &mut ItemStore) {
        match notification {
            Notification::Snapshot(snapshot) => self.apply_snapshot(snapshot, store),
            Notification::Subscribed(Ok(stream)) => {
                tracing::info!("Subscribed to collection {}", self.collection);
                self.stream = Some(stream);
                self.state = SyncState::Subscribed;
            }
            Notification::Subscribed(Err(e)) => {
                tracing::warn!("Failed to subscribe to {}: {}", self.collection, e);
                self.schedule_retry();
            }
            Notification::Failed(e) => {
                tracing::warn!(
                    "Remote notification error on {}: {}; keeping local list",
                    self.collection,
                    e
                );
                self.schedule_retry();
            }
            Notification::Ended => {
                tracing::warn!("Subscription to {} ended", self.collection);
                self.schedule_retry();
            }
            Notification::RetryDue => self.subscribe(),
            Notification::WriteAcked { seq, id } => self.confirm(seq, &id),
            Notification::WriteFailed(failure) => self.roll_back(failure, store),
        }
    }

    /// Queues the remote write for an added or toggled entry.
    pub fn record_upsert(&mut self, entry: &Entry) {
        let seq = self.bump(&entry.id);
        self.pending
            .record(entry.id.clone(), PendingWrite::Upsert(entry.clone()));
        self.enqueue(WriteOp::Set {
            seq,
            id: entry.id.clone(),
            document: encode_entry(entry),
        });
    }

    /// Queues the remote delete for a removed entry.
    pub fn record_delete(&mut self, id: &EntryId) {
        let seq = self.bump(id);
        self.pending.record(id.clone(), PendingWrite::Delete);
        self.enqueue(WriteOp::Delete {
            seq,
            id: id.clone(),
        });
    }

    fn bump(&mut self, id: &EntryId) -> u64 {
        self.next_seq += 1;
        self.latest_write.insert(id.clone(), self.next_seq);
        self.next_seq
    }

    fn enqueue(&mut self, op: WriteOp) {
        let sent = match &self.writes {
            Some(writes) => writes.send(op).is_ok(),
            None => false,
        };
        if !sent {
            tracing::error!("Writer for {} has stopped; write dropped", self.collection);
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot, store: &mut ItemStore) {
        let remote = decode_snapshot(&snapshot);
        self.snapshots += 1;
        self.attempt = 0;

        let view = match self.options.policy {
            ReconcilePolicy::RemoteWins => {
                self.pending.clear();
                self.latest_write.clear();
                remote.clone()
            }
            ReconcilePolicy::LocalUntilAcknowledged => self.pending.reconcile(remote.clone()),
        };
        tracing::debug!(
            "Snapshot for {}: {} remote, {} pending",
            self.collection,
            remote.len(),
            self.pending.len()
        );
        self.last_remote = Some(remote);
        store.replace_all(view);
    }

    fn confirm(&mut self, seq: u64, id: &EntryId) {
        // Only the newest write to an entry may stand in for it.
        if self.latest_write.get(id) != Some(&seq) {
            return;
        }
        self.latest_write.remove(id);
        self.pending.confirm(id);
    }

    fn roll_back(&mut self, failure: WriteFailure, store: &mut ItemStore) {
        tracing::warn!(
            "Write for {} in {} failed: {}",
            failure.id,
            self.collection,
            failure.error
        );

        // A newer write to the same entry is still in flight.
        if self.latest_write.get(&failure.id) != Some(&failure.seq) {
            return;
        }
        self.latest_write.remove(&failure.id);
        self.pending.forget(&failure.id);

        let remote = self.last_remote.clone().unwrap_or_default();
        let view = match self.options.policy {
            ReconcilePolicy::RemoteWins => remote,
            ReconcilePolicy::LocalUntilAcknowledged => self.pending.overlay(remote),
        };
        store.replace_all(view);
    }

    fn schedule_retry(&mut self) {
        self.stream = None;
        self.attempt += 1;
        let delay = self.options.backoff.delay(self.attempt);
        self.state = SyncState::Reconnecting {
            attempt: self.attempt,
        };
        tracing::info!(
            "Resubscribing to {} in {:?} (attempt {})",
            self.collection,
            delay,
            self.attempt
        );
        self.retry = Some(Box::pin(tokio::time::sleep(delay)));
    }
}

async fn next_item(stream: &mut Option<SnapshotStream>) -> Option<Result<Snapshot, RemoteError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_subscribe(
    connecting: &mut Option<SubscribeFuture>,
) -> Result<SnapshotStream, RemoteError> {
    match connecting {
        Some(attempt) => {
            let result = attempt.as_mut().await;
            *connecting = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

/// Sends queued writes in order, reporting each outcome back.
async fn run_writer(
    remote: Arc<dyn DocumentStore>,
    collection: String,
    mut ops: mpsc::UnboundedReceiver<WriteOp>,
    outcomes: mpsc::UnboundedSender<WriteOutcome>,
) {
    while let Some(op) = ops.recv().await {
        let (seq, id, result) = match op {
            WriteOp::Set { seq, id, document } => {
                let result = remote.set(&collection, document).await;
                (seq, id, result)
            }
            WriteOp::Delete { seq, id } => {
                let result = remote.delete(&collection, id.as_str()).await;
                (seq, id, result)
            }
        };

        let outcome = match result {
            Ok(()) => WriteOutcome::Acked { seq, id },
            Err(error) => WriteOutcome::Failed(WriteFailure { seq, id, error }),
        };
        // Receiver is gone once the session has closed.
        let _ = outcomes.send(outcome);
    }
    tracing::debug!("Writer for {} finished", collection);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryDocumentStore;
    use std::time::Duration;

    fn remote_doc(id: &str, text: &str, done: bool) -> Document {
        Document::new(id)
            .with_field("text", text)
            .with_field("isDone", done)
    }

    async fn setup(policy: ReconcilePolicy) -> (Arc<MemoryDocumentStore>, Synchronizer, ItemStore) {
        let remote = Arc::new(MemoryDocumentStore::new());
        let options = SyncOptions::default().with_policy(policy);
        let sync = Synchronizer::new(remote.clone(), "user-1", options);
        (remote, sync, ItemStore::new())
    }

    async fn pump(sync: &mut Synchronizer, store: &mut ItemStore) {
        let n = sync.next_notification().await;
        sync.handle(n, store);
    }

    /// Subscribes and applies the initial listing.
    async fn open(sync: &mut Synchronizer, store: &mut ItemStore) {
        sync.subscribe();
        pump(sync, store).await;
        assert_eq!(sync.state(), SyncState::Subscribed);
        pump(sync, store).await;
    }

    #[tokio::test]
    async fn test_snapshot_replaces_local_list() {
        let (remote, mut sync, mut store) = setup(ReconcilePolicy::RemoteWins).await;
        store.add("stale local");
        remote.replace_collection(
            "user-1",
            vec![remote_doc("1", "A", false), remote_doc("2", "B", true)],
        );

        open(&mut sync, &mut store).await;

        let got: Vec<_> = store
            .entries()
            .iter()
            .map(|e| (e.text.as_str(), e.done))
            .collect();
        assert_eq!(got, vec![("A", false), ("B", true)]);
        assert_eq!(sync.status().snapshots, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_notification_keeps_list_and_resubscribes() {
        let (remote, mut sync, mut store) = setup(ReconcilePolicy::RemoteWins).await;
        remote.replace_collection("user-1", vec![remote_doc("1", "A", false)]);
        open(&mut sync, &mut store).await;
        let before = store.entries().to_vec();

        remote.inject_error("user-1", RemoteError::Connection("lost".into()));
        pump(&mut sync, &mut store).await;
        assert_eq!(store.entries(), before.as_slice());
        assert_eq!(sync.state(), SyncState::Reconnecting { attempt: 1 });

        // Retry timer fires, the attempt succeeds, then a snapshot arrives.
        pump(&mut sync, &mut store).await;
        assert!(matches!(sync.state(), SyncState::Reconnecting { .. }));
        pump(&mut sync, &mut store).await;
        assert_eq!(sync.state(), SyncState::Subscribed);
        pump(&mut sync, &mut store).await;
        assert_eq!(sync.status().snapshots, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_stream_schedules_retry() {
        let (remote, mut sync, mut store) = setup(ReconcilePolicy::default()).await;
        open(&mut sync, &mut store).await;

        remote.close_subscriptions("user-1");
        pump(&mut sync, &mut store).await;
        assert!(matches!(sync.state(), SyncState::Reconnecting { .. }));
    }

    #[tokio::test]
    async fn test_local_write_survives_stale_snapshot() {
        let (remote, mut sync, mut store) = setup(ReconcilePolicy::LocalUntilAcknowledged).await;
        open(&mut sync, &mut store).await;

        let entry = store.add("local");
        sync.record_upsert(&entry);

        // Another client writes first; its snapshot may not contain ours yet.
        remote.replace_collection("user-1", vec![remote_doc("r", "remote", false)]);
        pump(&mut sync, &mut store).await;

        let texts: Vec<_> = store.entries().iter().map(|e| e.text.as_str()).collect();
        assert!(texts.contains(&"local"));
        assert!(texts.contains(&"remote"));
    }

    #[tokio::test]
    async fn test_write_through_is_acknowledged() {
        let (remote, mut sync, mut store) = setup(ReconcilePolicy::LocalUntilAcknowledged).await;
        open(&mut sync, &mut store).await;

        let entry = store.add("buy milk");
        sync.record_upsert(&entry);
        assert_eq!(sync.status().pending, 1);

        // The echoed snapshot and the ack arrive in either order.
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(5), pump(&mut sync, &mut store))
                .await
                .unwrap();
        }
        assert_eq!(sync.status().pending, 0);
        assert_eq!(remote.documents("user-1").len(), 1);
        assert_eq!(store.entries(), &[entry]);
    }

    #[tokio::test]
    async fn test_failed_write_is_rolled_back() {
        let (remote, mut sync, mut store) = setup(ReconcilePolicy::LocalUntilAcknowledged).await;
        open(&mut sync, &mut store).await;

        remote.fail_writes(Some(RemoteError::Rejected("quota".into())));
        let entry = store.add("doomed");
        sync.record_upsert(&entry);

        let n = tokio::time::timeout(Duration::from_secs(5), sync.next_notification())
            .await
            .unwrap();
        assert!(matches!(n, Notification::WriteFailed(_)));
        sync.handle(n, &mut store);

        assert!(store.is_empty());
        assert_eq!(sync.status().pending, 0);
    }

    #[tokio::test]
    async fn test_acked_write_yields_to_newer_remote_state() {
        let (remote, mut sync, mut store) = setup(ReconcilePolicy::LocalUntilAcknowledged).await;
        open(&mut sync, &mut store).await;

        let entry = store.add("eggs");
        sync.record_upsert(&entry);
        // Drain the echo snapshot and the ack
        for _ in 0..2 {
            tokio::time::timeout(Duration::from_secs(5), pump(&mut sync, &mut store))
                .await
                .unwrap();
        }

        // Another device toggles the entry; the remote state wins.
        let toggled = entry.clone().with_done(true);
        remote.replace_collection("user-1", vec![encode_entry(&toggled)]);
        pump(&mut sync, &mut store).await;

        assert_eq!(store.entries(), &[toggled]);
        assert_eq!(sync.status().pending, 0);
    }

    #[tokio::test]
    async fn test_close_unsubscribes() {
        let (remote, mut sync, mut store) = setup(ReconcilePolicy::default()).await;
        open(&mut sync, &mut store).await;
        assert_eq!(remote.subscriber_count("user-1"), 1);

        sync.close().await;
        assert_eq!(sync.state(), SyncState::Unsubscribed);
        assert_eq!(remote.subscriber_count("user-1"), 0);
    }

    #[tokio::test]
    async fn test_remote_wins_drops_pending_writes() {
        let (_remote, mut sync, mut store) = setup(ReconcilePolicy::RemoteWins).await;
        open(&mut sync, &mut store).await;

        let entry = store.add("local");
        sync.record_upsert(&entry);
        assert_eq!(sync.status().pending, 1);

        // A listing that does not contain the local write yet
        let stale = Snapshot::new(vec![remote_doc("r", "R", false)]);
        sync.handle(Notification::Snapshot(stale), &mut store);

        let texts: Vec<_> = store.entries().iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["R"]);
        assert_eq!(sync.status().pending, 0);
    }

    #[tokio::test]
    async fn test_subscribe_does_not_block_writes() {
        struct NeverSubscribes(MemoryDocumentStore);

        #[async_trait::async_trait]
        impl DocumentStore for NeverSubscribes {
            async fn subscribe(&self, _collection: &str) -> Result<SnapshotStream, RemoteError> {
                std::future::pending().await
            }

            async fn set(&self, collection: &str, document: Document) -> Result<(), RemoteError> {
                self.0.set(collection, document).await
            }

            async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
                self.0.delete(collection, id).await
            }
        }

        let remote = Arc::new(NeverSubscribes(MemoryDocumentStore::new()));
        let mut sync = Synchronizer::new(remote.clone(), "user-1", SyncOptions::default());
        let mut store = ItemStore::new();
        sync.subscribe();
        assert_eq!(sync.state(), SyncState::Unsubscribed);

        let entry = store.add("offline");
        sync.record_upsert(&entry);
        let n = tokio::time::timeout(Duration::from_secs(5), sync.next_notification())
            .await
            .unwrap();
        assert!(matches!(n, Notification::WriteAcked { .. }));
        sync.handle(n, &mut store);

        tokio::time::timeout(Duration::from_secs(5), sync.close())
            .await
            .unwrap();
        assert_eq!(remote.0.documents("user-1").len(), 1);
    }

    #[tokio::test]
    async fn test_close_flushes_queued_writes() {
        let (remote, mut sync, mut store) = setup(ReconcilePolicy::default()).await;
        open(&mut sync, &mut store).await;

        for text in ["a", "b", "c"] {
            let entry = store.add(text);
            sync.record_upsert(&entry);
        }
        sync.close().await;

        assert_eq!(remote.documents("user-1").len(), 3);
    }
}
