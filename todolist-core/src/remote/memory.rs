//! In-process document store.
//!
//! Used by tests and for embedding without a server. Supports fault
//! injection so callers can exercise error paths.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;

use super::{Document, DocumentStore, RemoteError, Snapshot, SnapshotStream};

type Subscriber = mpsc::UnboundedSender<Result<Snapshot, RemoteError>>;

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Document>>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    write_failure: Option<RemoteError>,
}

impl Inner {
    fn snapshot(&self, collection: &str) -> Snapshot {
        Snapshot::new(self.collections.get(collection).cloned().unwrap_or_default())
    }

    fn notify(&mut self, collection: &str, item: Result<Snapshot, RemoteError>) {
        if let Some(subs) = self.subscribers.get_mut(collection) {
            subs.retain(|tx| tx.send(item.clone()).is_ok());
        }
    }

    fn publish(&mut self, collection: &str) {
        let snapshot = self.snapshot(collection);
        self.notify(collection, Ok(snapshot));
    }
}

/// Document store kept entirely in memory.
#[derive(Default)]
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current documents of a collection.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock().snapshot(collection).documents
    }

    /// Replaces a collection wholesale and notifies subscribers.
    pub fn replace_collection(&self, collection: &str, documents: Vec<Document>) {
        let mut inner = self.lock();
        inner.collections.insert(collection.to_string(), documents);
        inner.publish(collection);
    }

    /// Delivers an error notification to every subscriber of a collection.
    pub fn inject_error(&self, collection: &str, error: RemoteError) {
        self.lock().notify(collection, Err(error));
    }

    /// Ends every open subscription on a collection.
    pub fn close_subscriptions(&self, collection: &str) {
        self.lock().subscribers.remove(collection);
    }

    /// Makes subsequent writes fail with `error`, or succeed again with `None`.
    pub fn fail_writes(&self, error: Option<RemoteError>) {
        self.lock().write_failure = error;
    }

    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.lock()
            .subscribers
            .get(collection)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn subscribe(&self, collection: &str) -> Result<SnapshotStream, RemoteError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        // Receiver is alive, so the initial send cannot fail.
        let _ = tx.send(Ok(inner.snapshot(collection)));
        inner
            .subscribers
            .entry(collection.to_string())
            .or_default()
            .push(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }

    async fn set(&self, collection: &str, document: Document) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        if let Some(e) = inner.write_failure.clone() {
            return Err(e);
        }

        let docs = inner.collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|d| d.id == document.id) {
            Some(existing) => *existing = document,
            None => docs.push(document),
        }
        inner.publish(collection);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.lock();
        if let Some(e) = inner.write_failure.clone() {
            return Err(e);
        }

        if let Some(docs) = inner.collections.get_mut(collection) {
            docs.retain(|d| d.id != id);
        }
        inner.publish(collection);
        Ok(())
    }
}
