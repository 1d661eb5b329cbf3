//! Remote document store boundary.
//!
//! A store holds named collections of documents. Each document has an id
//! and a flat map of scalar fields. Subscribers receive the full document
//! listing of a collection on every change.

mod codec;
mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub use codec::{
    decode_entry, decode_snapshot, encode_entry, DecodeError, FIELD_CREATED_AT, FIELD_DONE,
    FIELD_TEXT,
};
pub use memory::MemoryDocumentStore;

/// A scalar field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    String(String),
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

/// A single remote document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
}

impl Document {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(FieldValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.fields.get(name) {
            Some(FieldValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }
}

/// Point-in-time listing of every document in a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

impl Snapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }
}

/// Change notifications for one collection.
pub type SnapshotStream = BoxStream<'static, Result<Snapshot, RemoteError>>;

/// Errors reported by a document store.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Remote store rejected request: {0}")]
    Rejected(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Subscription closed")]
    Closed,
}

/// A store of per-collection documents with change subscriptions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Opens a long-lived subscription. The first item is the current
    /// listing; later items follow each change.
    async fn subscribe(&self, collection: &str) -> Result<SnapshotStream, RemoteError>;

    /// Creates or overwrites a document.
    async fn set(&self, collection: &str, document: Document) -> Result<(), RemoteError>;

    /// Deletes a document. Deleting a missing document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_field_access() {
        let doc = Document::new("d1")
            .with_field("text", "milk")
            .with_field("isDone", true)
            .with_field("count", 3i64);

        assert_eq!(doc.get_string("text"), Some("milk"));
        assert_eq!(doc.get_bool("isDone"), Some(true));
        assert_eq!(doc.get_string("isDone"), None);
        assert_eq!(doc.get_bool("missing"), None);
    }

    #[test]
    fn test_field_value_untagged_json() {
        let doc = Document::new("d1")
            .with_field("text", "milk")
            .with_field("isDone", false);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["fields"]["text"], "milk");
        assert_eq!(json["fields"]["isDone"], false);
    }
}
