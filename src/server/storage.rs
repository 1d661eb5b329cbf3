//! Server-side collection storage.
//!
//! Each collection is one Automerge document on disk:
//! ```text
//! <DATA_DIR>/
//!   <collection_key(owner, "todos")>.automerge
//! ```
//! The document root maps document id to a map of scalar fields.

use automerge::transaction::Transactable;
use automerge::{AutoCommit, AutomergeError, ObjType, ReadDoc, ScalarValue, Value, ROOT};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;

use todolist_core::remote::FIELD_CREATED_AT;
use todolist_core::{collection_key, Document, FieldValue, TODO_COLLECTION_KIND};

/// Errors that can occur during server storage operations.
#[derive(Debug)]
pub enum ServerStorageError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// Error loading or editing an Automerge document.
    AutomergeError(PathBuf, String),
    /// Invalid collection name (e.g., empty).
    InvalidCollection(String),
}

impl std::fmt::Display for ServerStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerStorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            ServerStorageError::AutomergeError(path, e) => {
                write!(f, "Failed to load document {}: {}", path.display(), e)
            }
            ServerStorageError::InvalidCollection(name) => {
                write!(f, "Invalid collection: {:?}", name)
            }
        }
    }
}

impl std::error::Error for ServerStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerStorageError::IoError(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Reads every document stored in `doc`, ordered by `createdAt` then id.
///
/// Entries that are not maps and fields that are not string, bool or
/// integer scalars are skipped.
pub fn read_documents(doc: &AutoCommit) -> Result<Vec<Document>, AutomergeError> {
    let mut documents = Vec::new();

    for id in doc.keys(ROOT) {
        let obj = match doc.get(ROOT, id.as_str())? {
            Some((Value::Object(ObjType::Map), obj)) => obj,
            _ => continue,
        };

        let mut document = Document::new(id.clone());
        for field in doc.keys(&obj) {
            let value = match doc.get(&obj, field.as_str())? {
                Some((Value::Scalar(scalar), _)) => match scalar.as_ref() {
                    ScalarValue::Str(s) => FieldValue::String(s.to_string()),
                    ScalarValue::Boolean(b) => FieldValue::Bool(*b),
                    ScalarValue::Int(i) => FieldValue::Integer(*i),
                    _ => continue,
                },
                _ => continue,
            };
            document.fields.insert(field, value);
        }
        documents.push(document);
    }

    documents.sort_by_cached_key(|d| {
        let created = d
            .get_string(FIELD_CREATED_AT)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc));
        // Documents without a timestamp sort last
        (created.is_none(), created, d.id.clone())
    });

    Ok(documents)
}

/// Creates or overwrites `document` in `doc`.
pub fn write_document(doc: &mut AutoCommit, document: &Document) -> Result<(), AutomergeError> {
    let obj = doc.put_object(ROOT, document.id.as_str(), ObjType::Map)?;
    for (name, value) in &document.fields {
        match value {
            FieldValue::String(s) => doc.put(&obj, name.as_str(), s.as_str())?,
            FieldValue::Bool(b) => doc.put(&obj, name.as_str(), *b)?,
            FieldValue::Integer(i) => doc.put(&obj, name.as_str(), *i)?,
        }
    }
    Ok(())
}

/// Deletes `id` from `doc`. Returns false if it was not present.
pub fn delete_document(doc: &mut AutoCommit, id: &str) -> Result<bool, AutomergeError> {
    if doc.get(ROOT, id)?.is_none() {
        return Ok(false);
    }
    doc.delete(ROOT, id)?;
    Ok(true)
}

/// On-disk storage for per-user collections.
#[derive(Debug, Clone)]
pub struct CollectionStorage {
    data_dir: PathBuf,
}

impl CollectionStorage {
    /// Creates a new storage instance rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn validate_collection(collection: &str) -> Result<(), ServerStorageError> {
        if collection.trim().is_empty() {
            return Err(ServerStorageError::InvalidCollection(
                collection.to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the file holding `collection`.
    pub fn doc_path(&self, collection: &str) -> PathBuf {
        let key = collection_key(collection, TODO_COLLECTION_KIND);
        self.data_dir.join(format!("{}.automerge", key))
    }

    /// Loads the document for `collection`.
    ///
    /// Returns `Ok(None)` if the collection has never been written.
    pub fn load(&self, collection: &str) -> Result<Option<AutoCommit>, ServerStorageError> {
        Self::validate_collection(collection)?;
        let path = self.doc_path(collection);

        match fs::read(&path) {
            Ok(bytes) => {
                let doc = AutoCommit::load(&bytes)
                    .map_err(|e| ServerStorageError::AutomergeError(path, e.to_string()))?;
                Ok(Some(doc))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ServerStorageError::IoError(path, e)),
        }
    }

    /// Saves the document for `collection`.
    ///
    /// Creates the data directory if it doesn't exist.
    pub fn save(&self, collection: &str, doc: &mut AutoCommit) -> Result<(), ServerStorageError> {
        Self::validate_collection(collection)?;

        fs::create_dir_all(&self.data_dir)
            .map_err(|e| ServerStorageError::IoError(self.data_dir.clone(), e))?;

        let path = self.doc_path(collection);
        let bytes = doc.save();

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("automerge.tmp");
        let mut file = File::create(&temp_path)
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;
        file.write_all(&bytes)
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;
        file.sync_all()
            .map_err(|e| ServerStorageError::IoError(temp_path.clone(), e))?;

        fs::rename(&temp_path, &path).map_err(|e| ServerStorageError::IoError(path, e))?;
        Ok(())
    }

    /// Lists the documents of `collection` in snapshot order.
    pub fn list(&self, collection: &str) -> Result<Vec<Document>, ServerStorageError> {
        match self.load(collection)? {
            Some(doc) => read_documents(&doc).map_err(|e| {
                ServerStorageError::AutomergeError(self.doc_path(collection), e.to_string())
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Creates or overwrites one document.
    pub fn put(&self, collection: &str, document: &Document) -> Result<(), ServerStorageError> {
        let mut doc = self.load(collection)?.unwrap_or_else(AutoCommit::new);
        write_document(&mut doc, document).map_err(|e| {
            ServerStorageError::AutomergeError(self.doc_path(collection), e.to_string())
        })?;
        self.save(collection, &mut doc)
    }

    /// Deletes one document. Returns false if it did not exist.
    pub fn remove(&self, collection: &str, id: &str) -> Result<bool, ServerStorageError> {
        let Some(mut doc) = self.load(collection)? else {
            return Ok(false);
        };
        let removed = delete_document(&mut doc, id).map_err(|e| {
            ServerStorageError::AutomergeError(self.doc_path(collection), e.to_string())
        })?;
        if removed {
            self.save(collection, &mut doc)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (CollectionStorage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = CollectionStorage::new(temp_dir.path());
        (storage, temp_dir)
    }

    fn todo(id: &str, text: &str, done: bool, created_at: &str) -> Document {
        Document::new(id)
            .with_field("text", text)
            .with_field("isDone", done)
            .with_field(FIELD_CREATED_AT, created_at)
    }

    #[test]
    fn test_validate_collection() {
        assert!(CollectionStorage::validate_collection("alice").is_ok());
        assert!(CollectionStorage::validate_collection("../etc").is_ok());
        assert!(CollectionStorage::validate_collection("").is_err());
        assert!(CollectionStorage::validate_collection("  ").is_err());
    }

    #[test]
    fn test_doc_path_hides_collection_name() {
        let (storage, temp_dir) = setup();
        let path = storage.doc_path("../escape");
        assert_eq!(path.parent().unwrap(), temp_dir.path());
        assert!(!path.to_string_lossy().contains("escape"));
    }

    #[test]
    fn test_load_nonexistent_returns_none() {
        let (storage, _temp) = setup();
        assert!(storage.load("alice").unwrap().is_none());
        assert!(storage.list("alice").unwrap().is_empty());
    }

    #[test]
    fn test_put_and_list() {
        let (storage, _temp) = setup();
        let doc = todo("a", "buy milk", false, "2024-01-01T00:00:00Z");

        storage.put("alice", &doc).unwrap();

        assert_eq!(storage.list("alice").unwrap(), vec![doc]);
    }

    #[test]
    fn test_put_overwrites_existing() {
        let (storage, _temp) = setup();
        storage
            .put("alice", &todo("a", "buy milk", false, "2024-01-01T00:00:00Z"))
            .unwrap();
        let updated = todo("a", "buy milk", true, "2024-01-01T00:00:00Z");
        storage.put("alice", &updated).unwrap();

        assert_eq!(storage.list("alice").unwrap(), vec![updated]);
    }

    #[test]
    fn test_list_orders_by_created_at_then_id() {
        let (storage, _temp) = setup();
        let late = todo("a", "late", false, "2024-01-03T00:00:00Z");
        let early = todo("z", "early", false, "2024-01-01T00:00:00Z");
        let tie_b = todo("b", "tie b", false, "2024-01-02T00:00:00+00:00");
        let tie_a = todo("a2", "tie a", false, "2024-01-02T00:00:00Z");
        let undated = Document::new("0")
            .with_field("text", "undated")
            .with_field("isDone", false);

        for doc in [&late, &undated, &tie_b, &early, &tie_a] {
            storage.put("alice", doc).unwrap();
        }

        let ids: Vec<String> = storage
            .list("alice")
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["z", "a2", "b", "a", "0"]);
    }

    #[test]
    fn test_remove() {
        let (storage, _temp) = setup();
        storage
            .put("alice", &todo("a", "x", false, "2024-01-01T00:00:00Z"))
            .unwrap();

        assert!(storage.remove("alice", "a").unwrap());
        assert!(!storage.remove("alice", "a").unwrap());
        assert!(!storage.remove("bob", "a").unwrap());
        assert!(storage.list("alice").unwrap().is_empty());
    }

    #[test]
    fn test_collections_are_isolated() {
        let (storage, _temp) = setup();
        storage
            .put("alice", &todo("a", "alice's", false, "2024-01-01T00:00:00Z"))
            .unwrap();

        assert!(storage.list("bob").unwrap().is_empty());
        assert_eq!(storage.list("alice").unwrap().len(), 1);
    }

    #[test]
    fn test_integer_fields_survive() {
        let (storage, _temp) = setup();
        let doc = Document::new("a").with_field("priority", 3i64);
        storage.put("alice", &doc).unwrap();

        assert_eq!(storage.list("alice").unwrap(), vec![doc]);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let (storage, temp_dir) = setup();
        storage
            .put("alice", &todo("a", "x", false, "2024-01-01T00:00:00Z"))
            .unwrap();

        let files: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with(".automerge"));
    }
}
