//! Writes issued locally that no snapshot has reflected yet.

use crate::models::{Entry, EntryId};

/// The last local write for one entry.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Upsert(Entry),
    Delete,
}

/// Non-reflecting snapshots a confirmed write outlives. Acks and snapshots
/// travel separately, so one listing built before the write may still
/// arrive after its ack.
const CONFIRMED_GRACE: u32 = 1;

#[derive(Debug, Clone)]
struct PendingRecord {
    id: EntryId,
    write: PendingWrite,
    /// Snapshots seen since the remote store accepted the write.
    confirmed: Option<u32>,
}

/// Pending writes in the order they were first issued.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    writes: Vec<PendingRecord>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn get(&self, id: &EntryId) -> Option<&PendingWrite> {
        self.writes.iter().find(|r| &r.id == id).map(|r| &r.write)
    }

    /// Records a write. A later write to the same entry supersedes the
    /// earlier one but keeps its position.
    pub fn record(&mut self, id: EntryId, write: PendingWrite) {
        match self.writes.iter_mut().find(|r| r.id == id) {
            Some(slot) => {
                slot.write = write;
                slot.confirmed = None;
            }
            None => self.writes.push(PendingRecord {
                id,
                write,
                confirmed: None,
            }),
        }
    }

    /// Marks the write for an entry as accepted by the remote store. It is
    /// dropped once a snapshot reflects it, or after the grace snapshot.
    pub fn confirm(&mut self, id: &EntryId) -> bool {
        match self.writes.iter_mut().find(|r| &r.id == id) {
            Some(record) => {
                record.confirmed.get_or_insert(0);
                true
            }
            None => false,
        }
    }

    /// Drops the record for an entry, e.g. after its write failed.
    pub fn forget(&mut self, id: &EntryId) -> bool {
        let before = self.writes.len();
        self.writes.retain(|r| &r.id != id);
        self.writes.len() != before
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Overlays pending writes on a decoded snapshot.
    ///
    /// Writes the snapshot already reflects, and confirmed writes past
    /// their grace, are dropped; the rest are applied on top of the remote
    /// listing and kept.
    pub fn reconcile(&mut self, remote: Vec<Entry>) -> Vec<Entry> {
        let mut merged = remote;

        self.writes.retain_mut(|record| {
            let id = &record.id;
            let position = merged.iter().position(|e| &e.id == id);
            let reflected = match (&record.write, position) {
                (PendingWrite::Upsert(local), Some(idx)) => merged[idx].same_content(local),
                (PendingWrite::Upsert(_), None) => false,
                (PendingWrite::Delete, found) => found.is_none(),
            };
            if reflected {
                return false;
            }

            // The remote state moved on after our write landed.
            if let Some(seen) = record.confirmed.as_mut() {
                if *seen >= CONFIRMED_GRACE {
                    return false;
                }
                *seen += 1;
            }

            match (&record.write, position) {
                (PendingWrite::Upsert(local), Some(idx)) => merged[idx] = local.clone(),
                (PendingWrite::Upsert(local), None) => merged.push(local.clone()),
                (PendingWrite::Delete, Some(idx)) => {
                    merged.remove(idx);
                }
                (PendingWrite::Delete, None) => {}
            }
            true
        });

        merged
    }

    /// Applies pending writes to a listing without acknowledging any.
    pub fn overlay(&self, remote: Vec<Entry>) -> Vec<Entry> {
        let mut scratch = self.clone();
        scratch.reconcile(remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(entries: &[Entry]) -> Vec<(&str, bool)> {
        entries.iter().map(|e| (e.text.as_str(), e.done)).collect()
    }

    #[test]
    fn test_empty_pending_passes_snapshot_through() {
        let mut pending = PendingWrites::new();
        let remote = vec![Entry::new("A"), Entry::new("B").with_done(true)];
        assert_eq!(pending.reconcile(remote.clone()), remote);
    }

    #[test]
    fn test_unacknowledged_add_is_appended() {
        let mut pending = PendingWrites::new();
        let local = Entry::new("local");
        pending.record(local.id.clone(), PendingWrite::Upsert(local.clone()));

        let merged = pending.reconcile(vec![Entry::new("remote")]);
        assert_eq!(texts(&merged), vec![("remote", false), ("local", false)]);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_matching_snapshot_acknowledges_upsert() {
        let mut pending = PendingWrites::new();
        let local = Entry::new("x").with_done(true);
        pending.record(local.id.clone(), PendingWrite::Upsert(local.clone()));

        let merged = pending.reconcile(vec![local.clone()]);
        assert_eq!(merged, vec![local]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_stale_snapshot_is_overridden_by_pending_toggle() {
        let mut pending = PendingWrites::new();
        let remote = Entry::new("x");
        let toggled = remote.clone().with_done(true);
        pending.record(remote.id.clone(), PendingWrite::Upsert(toggled));

        let merged = pending.reconcile(vec![remote]);
        assert_eq!(texts(&merged), vec![("x", true)]);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn test_pending_delete() {
        let mut pending = PendingWrites::new();
        let gone = Entry::new("gone");
        let kept = Entry::new("kept");
        pending.record(gone.id.clone(), PendingWrite::Delete);

        let merged = pending.reconcile(vec![gone.clone(), kept.clone()]);
        assert_eq!(merged, vec![kept.clone()]);
        assert_eq!(pending.len(), 1);

        let merged = pending.reconcile(vec![kept.clone()]);
        assert_eq!(merged, vec![kept]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_later_write_supersedes_earlier() {
        let mut pending = PendingWrites::new();
        let entry = Entry::new("x");
        pending.record(entry.id.clone(), PendingWrite::Upsert(entry.clone()));
        pending.record(entry.id.clone(), PendingWrite::Delete);

        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get(&entry.id), Some(&PendingWrite::Delete));
    }

    #[test]
    fn test_forget_and_overlay() {
        let mut pending = PendingWrites::new();
        let entry = Entry::new("x");
        pending.record(entry.id.clone(), PendingWrite::Upsert(entry.clone()));

        let overlaid = pending.overlay(vec![entry.clone()]);
        assert_eq!(overlaid, vec![entry.clone()]);
        assert_eq!(pending.len(), 1);

        assert!(pending.forget(&entry.id));
        assert!(!pending.forget(&entry.id));
        assert!(pending.is_empty());
    }

    #[test]
    fn test_confirmed_write_yields_to_newer_remote_state() {
        let mut pending = PendingWrites::new();
        let mine = Entry::new("x");
        pending.record(mine.id.clone(), PendingWrite::Upsert(mine.clone()));
        assert!(pending.confirm(&mine.id));

        // Another device toggled it after our write landed
        let theirs = mine.clone().with_done(true);
        let merged = pending.reconcile(vec![theirs.clone()]);
        assert_eq!(merged, vec![mine]);
        assert_eq!(pending.len(), 1);

        let merged = pending.reconcile(vec![theirs.clone()]);
        assert_eq!(merged, vec![theirs]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_confirmed_write_survives_listing_older_than_ack() {
        let mut pending = PendingWrites::new();
        let mine = Entry::new("x");
        pending.record(mine.id.clone(), PendingWrite::Upsert(mine.clone()));
        pending.confirm(&mine.id);

        // Built before the write reached the store, delivered after its ack
        let merged = pending.reconcile(Vec::new());
        assert_eq!(merged, vec![mine.clone()]);
        assert_eq!(pending.len(), 1);

        let merged = pending.reconcile(vec![mine.clone()]);
        assert_eq!(merged, vec![mine]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_new_write_clears_confirmation() {
        let mut pending = PendingWrites::new();
        let entry = Entry::new("x");
        pending.record(entry.id.clone(), PendingWrite::Upsert(entry.clone()));
        pending.confirm(&entry.id);
        pending.record(entry.id.clone(), PendingWrite::Delete);

        let merged = pending.reconcile(vec![entry]);
        assert!(merged.is_empty());
        assert_eq!(pending.len(), 1);
        assert!(!pending.confirm(&EntryId::from("other")));
    }
}
