//! A to-do session: the single owner of the entry list.
//!
//! One task per session owns the [`ItemStore`] and, for synced sessions,
//! the [`Synchronizer`]. Intents from the presentation layer and remote
//! notifications are processed one at a time on that task, so the list is
//! never mutated concurrently. Observers read the list through a tokio
//! `watch` channel.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::auth::{AuthProvider, UserId};
use crate::models::{Entry, EntryId};
use crate::remote::DocumentStore;
use crate::store::ItemStore;
use crate::sync::{Notification, SyncOptions, SyncStatus, Synchronizer};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Please enter some text")]
    EmptyText,
    #[error("Not signed in")]
    NotAuthenticated,
    #[error("Session is closed")]
    Closed,
}

enum Command {
    Add {
        text: String,
        reply: oneshot::Sender<Entry>,
    },
    Remove {
        id: EntryId,
        reply: oneshot::Sender<Option<Entry>>,
    },
    Toggle {
        id: EntryId,
        reply: oneshot::Sender<Option<Entry>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running session.
///
/// Dropping the handle ends the session.
pub struct TodoSession {
    commands: mpsc::UnboundedSender<Command>,
    entries: watch::Receiver<Vec<Entry>>,
    status: watch::Receiver<SyncStatus>,
    user: Option<UserId>,
    task: JoinHandle<()>,
}

impl TodoSession {
    /// Starts a session that keeps the list in memory only.
    pub fn local() -> Self {
        Self::spawn(None, None)
    }

    /// Starts a session synced with `user`'s collection on `remote`.
    pub fn connect(user: UserId, remote: Arc<dyn DocumentStore>, options: SyncOptions) -> Self {
        let sync = Synchronizer::new(remote, user.as_str(), options);
        Self::spawn(Some(user), Some(sync))
    }

    /// Starts a synced session for whoever `auth` reports as signed in.
    pub fn for_current_user(
        auth: &dyn AuthProvider,
        remote: Arc<dyn DocumentStore>,
        options: SyncOptions,
    ) -> Result<Self, SessionError> {
        let user = auth.current_user().ok_or(SessionError::NotAuthenticated)?;
        Ok(Self::connect(user, remote, options))
    }

    fn spawn(user: Option<UserId>, sync: Option<Synchronizer>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (entries_tx, entries) = watch::channel(Vec::new());
        let (status_tx, status) = watch::channel(SyncStatus::default());

        let mut store = ItemStore::new();
        store.subscribe(move |list| {
            entries_tx.send_replace(list.to_vec());
        });

        let task = tokio::spawn(
            SessionTask {
                store,
                sync,
                status: status_tx,
            }
            .run(command_rx),
        );

        Self {
            commands,
            entries,
            status,
            user,
            task,
        }
    }

    pub fn user(&self) -> Option<&UserId> {
        self.user.as_ref()
    }

    pub fn is_synced(&self) -> bool {
        self.user.is_some()
    }

    /// Current full list.
    pub fn entries(&self) -> Vec<Entry> {
        self.entries.borrow().clone()
    }

    /// Receiver that observes every published list.
    pub fn watch(&self) -> watch::Receiver<Vec<Entry>> {
        self.entries.clone()
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    /// Adds an entry. Blank text is rejected.
    pub async fn add(&self, text: impl Into<String>) -> Result<Entry, SessionError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SessionError::EmptyText);
        }
        self.request(|reply| Command::Add { text, reply }).await
    }

    /// Removes an entry. Returns `None` if it was not in the list.
    pub async fn remove(&self, id: &EntryId) -> Result<Option<Entry>, SessionError> {
        let id = id.clone();
        self.request(|reply| Command::Remove { id, reply }).await
    }

    /// Flips an entry's done flag. Returns the entry's new state.
    pub async fn toggle(&self, id: &EntryId) -> Result<Option<Entry>, SessionError> {
        let id = id.clone();
        self.request(|reply| Command::Toggle { id, reply }).await
    }

    /// Waits until a synced session has caught up with the remote and has
    /// no unacknowledged writes. Local sessions are always settled.
    pub async fn settled(&self) -> Result<SyncStatus, SessionError> {
        if !self.is_synced() {
            return Ok(self.status());
        }
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(|s| s.is_settled())
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(*status)
    }

    /// Ends the session and its subscription. Returns once queued writes
    /// have reached the remote store or the flush timed out.
    pub async fn close(self) -> Result<(), SessionError> {
        let result = self.request(|reply| Command::Close { reply }).await;
        let _ = self.task.await;
        result
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }
}

struct SessionTask {
    store: ItemStore,
    sync: Option<Synchronizer>,
    status: watch::Sender<SyncStatus>,
}

impl SessionTask {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        if let Some(sync) = self.sync.as_mut() {
            sync.subscribe();
        }
        self.publish_status();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Close { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                notification = next_notification(&mut self.sync) => {
                    if let Some(sync) = self.sync.as_mut() {
                        sync.handle(notification, &mut self.store);
                    }
                }
            }
            self.publish_status();
        }
    }

    /// Status is published before replying so a caller that awaits
    /// `settled()` right after an intent sees its pending write.
    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Add { text, reply } => {
                let entry = self.store.add(text);
                if let Some(sync) = self.sync.as_mut() {
                    sync.record_upsert(&entry);
                }
                self.publish_status();
                let _ = reply.send(entry);
            }
            Command::Remove { id, reply } => {
                let removed = self.store.remove(&id);
                if let (Some(sync), Some(_)) = (self.sync.as_mut(), removed.as_ref()) {
                    sync.record_delete(&id);
                }
                self.publish_status();
                let _ = reply.send(removed);
            }
            Command::Toggle { id, reply } => {
                let toggled = self.store.toggle(&id);
                if let (Some(sync), Some(entry)) = (self.sync.as_mut(), toggled.as_ref()) {
                    sync.record_upsert(entry);
                }
                self.publish_status();
                let _ = reply.send(toggled);
            }
            Command::Close { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Unsubscribes and flushes queued writes.
    async fn shutdown(&mut self) {
        if let Some(sync) = self.sync.as_mut() {
            sync.close().await;
        }
        self.publish_status();
    }

    fn publish_status(&self) {
        let status = self
            .sync
            .as_ref()
            .map(|s| s.status())
            .unwrap_or_default();
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn next_notification(sync: &mut Option<Synchronizer>) -> Notification {
    match sync {
        Some(sync) => sync.next_notification().await,
        None => std::future::pending().await,
    }
}
