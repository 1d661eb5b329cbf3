//! Wire messages between the sync server and its clients.
//!
//! Messages are CBOR-encoded and tagged by `type`. Field names use
//! camelCase on the wire.

use serde::{Deserialize, Serialize};

use crate::remote::Document;

/// Kind name used when deriving the storage key of a to-do collection.
pub const TODO_COLLECTION_KIND: &str = "todos";

/// Messages sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Start receiving snapshots of a collection.
    #[serde(rename = "subscribe")]
    Subscribe { collection: String },
    /// Create or overwrite a document.
    #[serde(rename = "set")]
    Set {
        #[serde(rename = "requestId")]
        request_id: u64,
        collection: String,
        document: Document,
    },
    /// Delete a document.
    #[serde(rename = "delete")]
    Delete {
        #[serde(rename = "requestId")]
        request_id: u64,
        collection: String,
        #[serde(rename = "documentId")]
        document_id: String,
    },
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Full listing of a subscribed collection.
    #[serde(rename = "snapshot")]
    Snapshot {
        collection: String,
        documents: Vec<Document>,
    },
    /// A write was applied.
    #[serde(rename = "ack")]
    Ack {
        #[serde(rename = "requestId")]
        request_id: u64,
    },
    /// A request failed. `requestId` is absent for subscription errors.
    #[serde(rename = "error")]
    Error {
        #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        message: String,
    },
}

macro_rules! cbor_codec {
    ($ty:ty) => {
        impl $ty {
            /// Encode message as CBOR bytes.
            pub fn encode(&self) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
                let mut buf = Vec::new();
                ciborium::into_writer(self, &mut buf)?;
                Ok(buf)
            }

            /// Decode message from CBOR bytes.
            pub fn decode(data: &[u8]) -> Result<Self, ciborium::de::Error<std::io::Error>> {
                ciborium::from_reader(data)
            }
        }
    };
}

cbor_codec!(ClientMessage);
cbor_codec!(ServerMessage);

/// Storage key for a collection owned by `owner`.
///
/// Computed as base58check(sha256(owner + ":" + kind)[0..16]) so that user
/// ids never reach the filesystem directly.
pub fn collection_key(owner: &str, kind: &str) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update(b":");
    hasher.update(kind.as_bytes());
    let hash = hasher.finalize();
    bs58::encode(&hash[..16]).with_check().into_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collection_key() {
        let a = collection_key("user1", TODO_COLLECTION_KIND);
        assert_eq!(a, collection_key("user1", TODO_COLLECTION_KIND));
        assert_ne!(a, collection_key("user2", TODO_COLLECTION_KIND));
        assert_ne!(a, collection_key("user1", "other"));
        assert!(!a.contains('/'));
    }

    #[test]
    fn test_set_message_encode_decode() {
        let msg = ClientMessage::Set {
            request_id: 7,
            collection: "user1".to_string(),
            document: Document::new("d1")
                .with_field("text", "milk")
                .with_field("isDone", true),
        };

        let decoded = ClientMessage::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_error_without_request_id() {
        let msg = ServerMessage::Error {
            request_id: None,
            message: "forbidden".to_string(),
        };

        match ServerMessage::decode(&msg.encode().unwrap()).unwrap() {
            ServerMessage::Error {
                request_id,
                message,
            } => {
                assert!(request_id.is_none());
                assert_eq!(message, "forbidden");
            }
            other => panic!("Expected Error message, got {:?}", other),
        }
    }

    #[test]
    fn test_snapshot_keeps_document_order() {
        let msg = ServerMessage::Snapshot {
            collection: "user1".to_string(),
            documents: vec![Document::new("b"), Document::new("a")],
        };

        match ServerMessage::decode(&msg.encode().unwrap()).unwrap() {
            ServerMessage::Snapshot { documents, .. } => {
                let ids: Vec<_> = documents.iter().map(|d| d.id.as_str()).collect();
                assert_eq!(ids, vec!["b", "a"]);
            }
            other => panic!("Expected Snapshot message, got {:?}", other),
        }
    }
}
