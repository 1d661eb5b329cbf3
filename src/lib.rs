//! todolist: a per-user to-do list kept in sync through a small WebSocket
//! server.
//!
//! The list logic lives in `todolist-core`. This crate adds the pieces that
//! touch the outside world: configuration, API key sign-in, the WebSocket
//! document store client and the sync server.

pub mod auth;
pub mod client;
pub mod config;
pub mod server;

pub use auth::{ApiKeyAuth, Credentials};
pub use client::{check_server, fetch_identity, ClientError, WsDocumentStore};
pub use config::{Config, ConfigError};
