use std::fmt;

/// Subscription state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Unsubscribed,
    Subscribed,
    Reconnecting { attempt: u32 },
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Unsubscribed => write!(f, "unsubscribed"),
            SyncState::Subscribed => write!(f, "subscribed"),
            SyncState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
        }
    }
}

/// Observable sync progress of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncStatus {
    pub state: SyncState,
    /// Local writes not yet reflected by a snapshot.
    pub pending: usize,
    /// Snapshots applied so far.
    pub snapshots: u64,
}

impl SyncStatus {
    /// Subscribed, caught up with at least one snapshot and nothing pending.
    pub fn is_settled(&self) -> bool {
        self.state == SyncState::Subscribed && self.snapshots > 0 && self.pending == 0
    }
}
