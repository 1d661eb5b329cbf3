use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;

use commands::{ConfigCommand, ShellCommand, TodoCommand};
use todolist::Config;

#[derive(Parser)]
#[command(name = "todolist")]
#[command(version)]
#[command(about = "A to-do list synced across devices", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sign in with an API key
    Login {
        /// API key issued by the sync server
        #[arg(long)]
        key: String,
    },

    /// Sign out and forget the stored API key
    Logout,

    /// Show the signed-in user
    Whoami,

    #[command(flatten)]
    Todo(TodoCommand),

    /// Open the interactive list screen
    Shell(ShellCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Login { key }) => commands::login(&config, &key).await?,
        Some(Commands::Logout) => commands::logout(&config).await?,
        Some(Commands::Whoami) => commands::whoami(&config).await?,
        Some(Commands::Todo(cmd)) => cmd.run(&config).await?,
        Some(Commands::Shell(cmd)) => cmd.run(&config).await?,
        Some(Commands::Config(cmd)) => cmd.run(&config)?,
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
