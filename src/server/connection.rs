//! One WebSocket connection to the sync server.
//!
//! A connection may subscribe to its own collection and write to it.
//! Subscribed connections get a fresh full snapshot after every change.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use todolist_core::{ClientMessage, ServerMessage};

use super::auth::AuthUser;
use super::AppState;

struct Subscription {
    collection: String,
    changes: broadcast::Receiver<()>,
}

/// Runs a connection until the client goes away.
pub async fn serve_connection(socket: WebSocket, user: AuthUser, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription: Option<Subscription> = None;

    tracing::info!(user = %user.user_id, "sync connection opened");

    loop {
        let outgoing = tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Binary(data))) => match ClientMessage::decode(&data) {
                    Ok(message) => handle_message(&state, &user, message, &mut subscription).await,
                    Err(e) => {
                        tracing::debug!(user = %user.user_id, "undecodable message: {}", e);
                        ServerMessage::Error {
                            request_id: None,
                            message: format!("Malformed message: {}", e),
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::debug!(user = %user.user_id, "websocket error: {}", e);
                    break;
                }
            },
            changed = next_change(&mut subscription) => match changed {
                // Missed notifications collapse into one snapshot
                Ok(()) | Err(RecvError::Lagged(_)) => match subscription.as_ref() {
                    Some(sub) => snapshot(&state, &sub.collection).await,
                    None => continue,
                },
                Err(RecvError::Closed) => {
                    subscription = None;
                    continue;
                }
            },
        };

        let encoded = match outgoing.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("failed to encode server message: {}", e);
                continue;
            }
        };
        if sender.send(Message::Binary(encoded.into())).await.is_err() {
            break;
        }
    }

    tracing::info!(user = %user.user_id, "sync connection closed");
}

async fn next_change(subscription: &mut Option<Subscription>) -> Result<(), RecvError> {
    match subscription {
        Some(sub) => sub.changes.recv().await,
        None => std::future::pending().await,
    }
}

async fn snapshot(state: &AppState, collection: &str) -> ServerMessage {
    let listed = state.storage.lock().await.list(collection);
    match listed {
        Ok(documents) => ServerMessage::Snapshot {
            collection: collection.to_string(),
            documents,
        },
        Err(e) => {
            tracing::error!("failed to list {}: {}", collection, e);
            ServerMessage::Error {
                request_id: None,
                message: e.to_string(),
            }
        }
    }
}

fn forbidden(request_id: Option<u64>, collection: &str) -> ServerMessage {
    ServerMessage::Error {
        request_id,
        message: format!("Access to collection {:?} denied", collection),
    }
}

async fn handle_message(
    state: &AppState,
    user: &AuthUser,
    message: ClientMessage,
    subscription: &mut Option<Subscription>,
) -> ServerMessage {
    match message {
        ClientMessage::Subscribe { collection } => {
            if collection != user.user_id {
                return forbidden(None, &collection);
            }
            // Register before listing so no change slips between the two
            let changes = state.hub.subscribe(&collection).await;
            *subscription = Some(Subscription {
                collection: collection.clone(),
                changes,
            });
            tracing::debug!(user = %user.user_id, "subscribed");
            snapshot(state, &collection).await
        }
        ClientMessage::Set {
            request_id,
            collection,
            document,
        } => {
            if collection != user.user_id {
                return forbidden(Some(request_id), &collection);
            }
            if document.id.is_empty() {
                return ServerMessage::Error {
                    request_id: Some(request_id),
                    message: "Document id must not be empty".to_string(),
                };
            }
            let result = state.storage.lock().await.put(&collection, &document);
            match result {
                Ok(()) => {
                    tracing::debug!(user = %user.user_id, id = %document.id, "document set");
                    state.hub.notify(&collection).await;
                    ServerMessage::Ack { request_id }
                }
                Err(e) => {
                    tracing::error!("failed to write {}: {}", collection, e);
                    ServerMessage::Error {
                        request_id: Some(request_id),
                        message: e.to_string(),
                    }
                }
            }
        }
        ClientMessage::Delete {
            request_id,
            collection,
            document_id,
        } => {
            if collection != user.user_id {
                return forbidden(Some(request_id), &collection);
            }
            let result = state.storage.lock().await.remove(&collection, &document_id);
            match result {
                Ok(removed) => {
                    if removed {
                        tracing::debug!(user = %user.user_id, id = %document_id, "document deleted");
                        state.hub.notify(&collection).await;
                    }
                    ServerMessage::Ack { request_id }
                }
                Err(e) => {
                    tracing::error!("failed to delete from {}: {}", collection, e);
                    ServerMessage::Error {
                        request_id: Some(request_id),
                        message: e.to_string(),
                    }
                }
            }
        }
    }
}
