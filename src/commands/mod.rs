mod auth_cmd;
mod config_cmd;
mod shell;
mod todo;

use std::sync::Arc;

use clap::ValueEnum;
use todolist::{ApiKeyAuth, ClientError, Config, WsDocumentStore};
use todolist_core::{Entry, EntryId, SessionError, TodoSession};

pub use auth_cmd::{login, logout, whoami};
pub use config_cmd::ConfigCommand;
pub use shell::ShellCommand;
pub use todo::TodoCommand;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Errors shared by the list commands
#[derive(Debug)]
pub enum CommandError {
    NotSignedIn,
    NotConfigured,
    EntryNotFound(String),
    AmbiguousId(String, usize),
    Timeout,
    Session(SessionError),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::NotSignedIn => {
                write!(f, "Not signed in. Run `todolist login --key <KEY>` first.")
            }
            CommandError::NotConfigured => write!(f, "{}", ClientError::NotConfigured),
            CommandError::EntryNotFound(id) => write!(f, "No item matches '{}'", id),
            CommandError::AmbiguousId(id, n) => {
                write!(f, "'{}' matches {} items; use more characters", id, n)
            }
            CommandError::Timeout => write!(f, "Timed out waiting for the server"),
            CommandError::Session(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Session(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SessionError> for CommandError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotAuthenticated => CommandError::NotSignedIn,
            other => CommandError::Session(other),
        }
    }
}

pub fn load_auth(config: &Config) -> ApiKeyAuth {
    ApiKeyAuth::load(config.sync.server_url.clone(), &config.data_dir.value)
}

/// Starts a synced session for the signed-in user without waiting for
/// the first snapshot.
pub fn start_session(config: &Config, auth: &ApiKeyAuth) -> Result<TodoSession, CommandError> {
    let server_url = config
        .sync
        .server_url
        .clone()
        .ok_or(CommandError::NotConfigured)?;
    let api_key = auth.api_key().ok_or(CommandError::NotSignedIn)?;
    let remote = Arc::new(WsDocumentStore::new(server_url, api_key));
    Ok(TodoSession::for_current_user(
        auth,
        remote,
        config.sync.options(),
    )?)
}

/// Waits until the session has caught up with the server.
pub async fn settle(session: &TodoSession, config: &Config) -> Result<(), CommandError> {
    match tokio::time::timeout(config.sync.settle_timeout(), session.settled()).await {
        Ok(result) => {
            result?;
            Ok(())
        }
        Err(_) => Err(CommandError::Timeout),
    }
}

/// Finds the entry whose id equals `prefix` or uniquely starts with it.
pub fn resolve_entry(entries: &[Entry], prefix: &str) -> Result<EntryId, CommandError> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        return Err(CommandError::EntryNotFound(prefix.to_string()));
    }
    if let Some(exact) = entries.iter().find(|e| e.id.as_str() == prefix) {
        return Ok(exact.id.clone());
    }

    let matches: Vec<&Entry> = entries
        .iter()
        .filter(|e| e.id.as_str().starts_with(prefix))
        .collect();
    match matches.as_slice() {
        [] => Err(CommandError::EntryNotFound(prefix.to_string())),
        [only] => Ok(only.id.clone()),
        many => Err(CommandError::AmbiguousId(prefix.to_string(), many.len())),
    }
}

pub fn print_entries(entries: &[Entry]) {
    if entries.is_empty() {
        println!("No items.");
        return;
    }
    for entry in entries {
        println!("{}", entry);
    }
}
