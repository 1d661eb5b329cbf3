//! WebSocket client for the todolist sync server.
//!
//! Subscriptions get a dedicated connection each; writes share one lazily
//! opened connection and wait for the server's ack before returning.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use todolist_core::{
    ClientMessage, Document, DocumentStore, RemoteError, ServerMessage, Snapshot, SnapshotStream,
};

/// How long a write waits for its ack.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Upper bound on opening a WebSocket connection.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors from the plain HTTP endpoints.
#[derive(Debug)]
pub enum ClientError {
    /// No server URL configured
    NotConfigured,
    /// The server refused the API key
    Unauthorized,
    /// Transport or decoding failure
    Http(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::NotConfigured => write!(
                f,
                "Sync not configured. Set sync.server_url in config or TODOLIST_SERVER_URL."
            ),
            ClientError::Unauthorized => write!(f, "Invalid API key"),
            ClientError::Http(e) => write!(f, "HTTP error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {}

/// Body of `GET /me`.
#[derive(Debug, Clone, Deserialize)]
pub struct MeResponse {
    pub user_id: String,
}

/// Converts http(s) to ws(s); bare hosts get `ws://`.
fn to_ws_base(server_url: &str) -> String {
    let url = server_url.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        url.to_string()
    } else {
        format!("ws://{}", url)
    }
}

/// Converts ws(s) to http(s); bare hosts get `http://`.
fn to_http_base(server_url: &str) -> String {
    let url = server_url.trim_end_matches('/');
    if let Some(rest) = url.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = url.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("http://{}", url)
    }
}

pub fn build_http_url(server_url: &str, path: &str) -> String {
    format!("{}{}", to_http_base(server_url), path)
}

pub fn build_ws_url(server_url: &str, api_key: &str) -> String {
    format!(
        "{}/sync?key={}",
        to_ws_base(server_url),
        urlencoding::encode(api_key)
    )
}

/// Returns true if the server answers `GET /health`.
pub async fn check_server(server_url: &str) -> bool {
    match reqwest::get(build_http_url(server_url, "/health")).await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!("health check failed: {}", e);
            false
        }
    }
}

/// Resolves an API key to its user through `GET /me`.
pub async fn fetch_identity(server_url: &str, api_key: &str) -> Result<MeResponse, ClientError> {
    let response = reqwest::Client::new()
        .get(build_http_url(server_url, "/me"))
        .header("Authorization", format!("Bearer {}", api_key))
        .send()
        .await
        .map_err(|e| ClientError::Http(e.to_string()))?;

    if response.status() == reqwest::StatusCode::UNAUTHORIZED {
        return Err(ClientError::Unauthorized);
    }
    if !response.status().is_success() {
        return Err(ClientError::Http(format!(
            "Server returned status {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::Http(e.to_string()))
}

/// [`DocumentStore`] backed by the sync server.
pub struct WsDocumentStore {
    server_url: String,
    api_key: String,
    writer: Mutex<Option<WsStream>>,
    next_request: AtomicU64,
}

impl WsDocumentStore {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            api_key: api_key.into(),
            writer: Mutex::new(None),
            next_request: AtomicU64::new(1),
        }
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn connect(&self) -> Result<WsStream, RemoteError> {
        let url = build_ws_url(&self.server_url, &self.api_key);
        let (ws, _) = timeout(HANDSHAKE_TIMEOUT, connect_async(&url))
            .await
            .map_err(|_| RemoteError::Connection("connection timed out".to_string()))?
            .map_err(|e| RemoteError::Connection(e.to_string()))?;
        tracing::debug!("connected to {}", self.server_url);
        Ok(ws)
    }

    /// Sends one write and waits for its ack on the shared connection.
    async fn request(&self, message: ClientMessage, request_id: u64) -> Result<(), RemoteError> {
        let mut writer = self.writer.lock().await;
        let mut ws = match writer.take() {
            Some(ws) => ws,
            None => self.connect().await?,
        };

        let result = match timeout(REQUEST_TIMEOUT, exchange(&mut ws, &message, request_id)).await
        {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Connection("request timed out".to_string())),
        };

        // A rejected write leaves the connection usable; anything else drops it.
        match &result {
            Ok(()) | Err(RemoteError::Rejected(_)) => *writer = Some(ws),
            Err(e) => tracing::debug!("dropping writer connection: {}", e),
        }
        result
    }

    fn next_request_id(&self) -> u64 {
        self.next_request.fetch_add(1, Ordering::Relaxed)
    }
}

async fn send_message(ws: &mut WsStream, message: &ClientMessage) -> Result<(), RemoteError> {
    let encoded = message
        .encode()
        .map_err(|e| RemoteError::Protocol(e.to_string()))?;
    ws.send(Message::Binary(encoded.into()))
        .await
        .map_err(|e| RemoteError::Connection(e.to_string()))
}

async fn exchange(
    ws: &mut WsStream,
    message: &ClientMessage,
    request_id: u64,
) -> Result<(), RemoteError> {
    send_message(ws, message).await?;

    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => match ServerMessage::decode(&data) {
                Ok(ServerMessage::Ack { request_id: id }) if id == request_id => return Ok(()),
                Ok(ServerMessage::Error {
                    request_id: Some(id),
                    message,
                }) if id == request_id => return Err(RemoteError::Rejected(message)),
                Ok(ServerMessage::Error {
                    request_id: None,
                    message,
                }) => return Err(RemoteError::Protocol(message)),
                Ok(_) => {}
                Err(e) => return Err(RemoteError::Protocol(e.to_string())),
            },
            Some(Ok(Message::Close(_))) | None => return Err(RemoteError::Closed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(RemoteError::Connection(e.to_string())),
        }
    }
}

/// Next snapshot from a subscription connection. `None` once the
/// connection is gone.
async fn next_snapshot(ws: &mut WsStream) -> Option<Result<Snapshot, RemoteError>> {
    loop {
        match ws.next().await {
            Some(Ok(Message::Binary(data))) => match ServerMessage::decode(&data) {
                Ok(ServerMessage::Snapshot { documents, .. }) => {
                    return Some(Ok(Snapshot::new(documents)))
                }
                Ok(ServerMessage::Error { message, .. }) => {
                    return Some(Err(RemoteError::Rejected(message)))
                }
                Ok(ServerMessage::Ack { .. }) => {}
                Err(e) => return Some(Err(RemoteError::Protocol(e.to_string()))),
            },
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Ok(_)) => {}
            Some(Err(e)) => return Some(Err(RemoteError::Connection(e.to_string()))),
        }
    }
}

#[async_trait]
impl DocumentStore for WsDocumentStore {
    async fn subscribe(&self, collection: &str) -> Result<SnapshotStream, RemoteError> {
        let mut ws = self.connect().await?;
        send_message(
            &mut ws,
            &ClientMessage::Subscribe {
                collection: collection.to_string(),
            },
        )
        .await?;

        // An error item ends the stream; the synchronizer resubscribes.
        let stream = futures::stream::unfold(Some(ws), |state| async move {
            let mut ws = state?;
            match next_snapshot(&mut ws).await? {
                Ok(snapshot) => Some((Ok(snapshot), Some(ws))),
                Err(e) => Some((Err(e), None)),
            }
        });
        Ok(stream.boxed())
    }

    async fn set(&self, collection: &str, document: Document) -> Result<(), RemoteError> {
        let request_id = self.next_request_id();
        self.request(
            ClientMessage::Set {
                request_id,
                collection: collection.to_string(),
                document,
            },
            request_id,
        )
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let request_id = self.next_request_id();
        self.request(
            ClientMessage::Delete {
                request_id,
                collection: collection.to_string(),
                document_id: id.to_string(),
            },
            request_id,
        )
        .await
    }
}
