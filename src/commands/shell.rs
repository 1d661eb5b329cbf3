//! Interactive list screen.
//!
//! The list is re-rendered whenever the session publishes a new sequence,
//! whether the change came from this shell or from another device.

use clap::Args;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

use todolist::{ApiKeyAuth, Config};
use todolist_core::{AuthError, AuthProvider, Entry, SyncState, TodoSession, UserId};

use super::{load_auth, print_entries, resolve_entry, start_session};

type Input = Lines<BufReader<Stdin>>;

#[derive(Args)]
pub struct ShellCommand {
    /// Keep the list in memory only; nothing is synced
    #[arg(long)]
    offline: bool,
}

#[derive(Debug, PartialEq)]
enum ShellAction {
    Add(String),
    Toggle(String),
    Delete(String),
    List,
    Help,
    SignOut,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_line(line: &str) -> ShellAction {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };

    match command {
        "" => ShellAction::Empty,
        "add" | "a" => ShellAction::Add(rest.to_string()),
        "toggle" | "t" | "x" => ShellAction::Toggle(rest.to_string()),
        "delete" | "rm" | "d" => ShellAction::Delete(rest.to_string()),
        "list" | "ls" => ShellAction::List,
        "help" | "?" => ShellAction::Help,
        "logout" => ShellAction::SignOut,
        "quit" | "exit" | "q" => ShellAction::Quit,
        other => ShellAction::Unknown(other.to_string()),
    }
}

#[derive(Debug, PartialEq)]
enum ScreenExit {
    Quit,
    SignOut,
}

fn print_help(can_sign_out: bool) {
    println!("Commands:");
    println!("  add <text>     add an item");
    println!("  toggle <id>    mark an item done / not done");
    println!("  rm <id>        delete an item");
    println!("  ls             show the list");
    if can_sign_out {
        println!("  logout         sign out");
    }
    println!("  quit           leave the shell");
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn render(entries: &[Entry]) {
    println!();
    println!("-- {} item(s) --", entries.len());
    print_entries(entries);
}

impl ShellCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let mut input = BufReader::new(tokio::io::stdin()).lines();

        if self.offline {
            let session = TodoSession::local();
            let result = run_screen(&session, &mut input, false).await;
            session.close().await?;
            result?;
            return Ok(());
        }

        let auth = load_auth(config);
        loop {
            if auth.current_user().is_none() {
                match sign_in(&auth, &mut input).await {
                    Ok(user) => println!("Signed in as {}", user),
                    Err(e) => {
                        println!("Sign-in failed: {}", e);
                        return Ok(());
                    }
                }
            }

            let session = start_session(config, &auth)?;
            let result = run_screen(&session, &mut input, true).await;
            session.close().await?;

            match result? {
                ScreenExit::Quit => return Ok(()),
                ScreenExit::SignOut => {
                    auth.sign_out().await?;
                    println!("Signed out.");
                }
            }
        }
    }
}

async fn sign_in(auth: &ApiKeyAuth, input: &mut Input) -> Result<UserId, AuthError> {
    print!("API key: ");
    let _ = std::io::stdout().flush();

    match input.next_line().await {
        Ok(Some(line)) => auth.sign_in(&line).await,
        Ok(None) => Err(AuthError::NotSignedIn),
        Err(e) => Err(AuthError::Unavailable(e.to_string())),
    }
}

async fn run_screen(
    session: &TodoSession,
    input: &mut Input,
    can_sign_out: bool,
) -> Result<ScreenExit, Box<dyn std::error::Error>> {
    let mut entries = session.watch();
    let mut status = session.watch_status();
    let mut last_state = status.borrow().state;

    if let Some(user) = session.user() {
        println!("Signed in as {}", user);
    } else {
        println!("Offline list; changes are kept in memory only.");
    }
    print_help(can_sign_out);
    render(&entries.borrow_and_update());
    prompt();

    loop {
        tokio::select! {
            line = input.next_line() => {
                let Some(line) = line? else {
                    return Ok(ScreenExit::Quit);
                };
                match parse_line(&line) {
                    ShellAction::Add(text) => {
                        if let Err(e) = session.add(text).await {
                            println!("{}", e);
                        }
                    }
                    ShellAction::Toggle(prefix) => {
                        match resolve_entry(&session.entries(), &prefix) {
                            Ok(id) => {
                                session.toggle(&id).await?;
                            }
                            Err(e) => println!("{}", e),
                        }
                    }
                    ShellAction::Delete(prefix) => {
                        match resolve_entry(&session.entries(), &prefix) {
                            Ok(id) => {
                                session.remove(&id).await?;
                            }
                            Err(e) => println!("{}", e),
                        }
                    }
                    ShellAction::List => render(&session.entries()),
                    ShellAction::Help => print_help(can_sign_out),
                    ShellAction::SignOut if can_sign_out => return Ok(ScreenExit::SignOut),
                    ShellAction::SignOut => println!("Nothing to sign out of in offline mode."),
                    ShellAction::Quit => return Ok(ScreenExit::Quit),
                    ShellAction::Empty => {}
                    ShellAction::Unknown(command) => {
                        println!("Unknown command '{}'. Type 'help' for a list.", command)
                    }
                }
                prompt();
            }
            changed = entries.changed() => {
                if changed.is_err() {
                    return Ok(ScreenExit::Quit);
                }
                render(&entries.borrow_and_update());
                prompt();
            }
            changed = status.changed() => {
                if changed.is_err() {
                    return Ok(ScreenExit::Quit);
                }
                let state = status.borrow_and_update().state;
                if state != last_state {
                    match &state {
                        SyncState::Reconnecting { .. } => println!("\n(connection lost: {})", state),
                        SyncState::Subscribed => println!("\n(connected)"),
                        SyncState::Unsubscribed => {}
                    }
                    last_state = state;
                    prompt();
                }
            }
        }
    }
}
