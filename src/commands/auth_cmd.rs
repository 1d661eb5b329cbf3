//! Sign-in commands.

use todolist::Config;
use todolist_core::AuthProvider;

use super::{load_auth, CommandError};

pub async fn login(config: &Config, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !config.sync.is_configured() {
        return Err(CommandError::NotConfigured.into());
    }
    let auth = load_auth(config);
    let user = auth.sign_in(key).await?;
    println!("Signed in as {}", user);
    Ok(())
}

pub async fn logout(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let auth = load_auth(config);
    match auth.current_user() {
        Some(user) => {
            auth.sign_out().await?;
            println!("Signed out {}", user);
        }
        None => println!("Not signed in."),
    }
    Ok(())
}

pub async fn whoami(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let auth = load_auth(config);
    let user = auth.current_user().ok_or(CommandError::NotSignedIn)?;
    println!("{}", user);

    if let Some(server_url) = &config.sync.server_url {
        let status = if todolist::check_server(server_url).await {
            "reachable"
        } else {
            "unreachable"
        };
        println!("Server: {} ({})", server_url, status);
    }
    Ok(())
}
