//! Local owner of the entry sequence and its observers.
//!
//! Every change republishes the full sequence to all observers. The store
//! never hands out the backing vector mutably; callers go through
//! `add`/`remove`/`toggle`/`replace_all`.

use crate::models::{Entry, EntryId};

/// Handle returned by [`ItemStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Box<dyn FnMut(&[Entry]) + Send>;

/// Ordered collection of entries with synchronous observers.
#[derive(Default)]
pub struct ItemStore {
    entries: Vec<Entry>,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription: u64,
}

impl ItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, id: &EntryId) -> Option<&Entry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a new not-done entry and returns a copy of it.
    pub fn add(&mut self, text: impl Into<String>) -> Entry {
        self.push(Entry::new(text))
    }

    /// Appends an already built entry.
    pub fn push(&mut self, entry: Entry) -> Entry {
        self.entries.push(entry.clone());
        self.publish();
        entry
    }

    /// Removes the entry with the given id.
    ///
    /// Returns `None` without publishing when no such entry exists.
    pub fn remove(&mut self, id: &EntryId) -> Option<Entry> {
        let idx = self.entries.iter().position(|e| &e.id == id)?;
        let removed = self.entries.remove(idx);
        self.publish();
        Some(removed)
    }

    /// Flips `done` on the entry with the given id and returns its new state.
    pub fn toggle(&mut self, id: &EntryId) -> Option<Entry> {
        let entry = self.entries.iter_mut().find(|e| &e.id == id)?;
        entry.done = !entry.done;
        let toggled = entry.clone();
        self.publish();
        Some(toggled)
    }

    /// Replaces the whole sequence.
    pub fn replace_all(&mut self, entries: Vec<Entry>) {
        self.entries = entries;
        self.publish();
    }

    /// Registers an observer. It is called right away with the current
    /// sequence and again after every change.
    pub fn subscribe<F>(&mut self, mut observer: F) -> SubscriptionId
    where
        F: FnMut(&[Entry]) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        observer(&self.entries);
        self.observers.push((id, Box::new(observer)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(sub, _)| *sub != id);
        self.observers.len() != before
    }

    fn publish(&mut self) {
        for (_, observer) in self.observers.iter_mut() {
            observer(&self.entries);
        }
    }
}

impl std::fmt::Debug for ItemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemStore")
            .field("entries", &self.entries)
            .field("observers", &self.observers.len())
            .finish()
    }
}
