mod entry;

pub use entry::{Entry, EntryId};
