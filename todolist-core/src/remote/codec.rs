//! Conversion between entries and remote documents.
//!
//! Document layout:
//! - `text`: string, required
//! - `isDone`: bool, required
//! - `createdAt`: RFC 3339 string, optional

use chrono::{DateTime, Utc};

use super::{Document, Snapshot};
use crate::models::Entry;

pub const FIELD_TEXT: &str = "text";
pub const FIELD_DONE: &str = "isDone";
pub const FIELD_CREATED_AT: &str = "createdAt";

/// Why a document could not be turned into an entry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("document has an empty id")]
    EmptyId,
    #[error("document {id} is missing string field '{field}'")]
    MissingString { id: String, field: &'static str },
    #[error("document {id} is missing bool field '{field}'")]
    MissingBool { id: String, field: &'static str },
}

pub fn encode_entry(entry: &Entry) -> Document {
    let doc = Document::new(entry.id.as_str())
        .with_field(FIELD_TEXT, entry.text.as_str())
        .with_field(FIELD_DONE, entry.done);
    match entry.created_at {
        Some(created_at) => doc.with_field(FIELD_CREATED_AT, created_at.to_rfc3339()),
        None => doc,
    }
}

pub fn decode_entry(doc: &Document) -> Result<Entry, DecodeError> {
    if doc.id.is_empty() {
        return Err(DecodeError::EmptyId);
    }

    let text = doc
        .get_string(FIELD_TEXT)
        .ok_or_else(|| DecodeError::MissingString {
            id: doc.id.clone(),
            field: FIELD_TEXT,
        })?;
    let done = doc
        .get_bool(FIELD_DONE)
        .ok_or_else(|| DecodeError::MissingBool {
            id: doc.id.clone(),
            field: FIELD_DONE,
        })?;

    let mut entry = Entry::new(text)
        .with_id(doc.id.as_str())
        .with_done(done);

    // A missing or unparsable timestamp leaves the entry undated.
    entry.created_at = doc
        .get_string(FIELD_CREATED_AT)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc));

    Ok(entry)
}

/// Decodes every document of a snapshot in delivered order.
///
/// Malformed documents are logged and skipped.
pub fn decode_snapshot(snapshot: &Snapshot) -> Vec<Entry> {
    snapshot
        .documents
        .iter()
        .filter_map(|doc| match decode_entry(doc) {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping malformed document: {}", e);
                None
            }
        })
        .collect()
}
