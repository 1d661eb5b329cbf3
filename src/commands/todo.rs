//! One-shot list commands against the synced collection.

use clap::Subcommand;

use todolist::Config;

use super::{
    load_auth, print_entries, resolve_entry, settle, start_session, CommandError, OutputFormat,
};

#[derive(Subcommand)]
pub enum TodoCommand {
    /// Show all items
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Add an item
    Add {
        /// Item text (words are joined with spaces)
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// Flip an item between done and not done
    Toggle {
        /// Item ID or unique prefix
        id: String,
    },

    /// Delete an item
    Delete {
        /// Item ID or unique prefix
        id: String,
    },
}

impl TodoCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let auth = load_auth(config);
        let session = start_session(config, &auth)?;
        let result = self.run_in(&session, config).await;
        session.close().await?;
        result
    }

    async fn run_in(
        &self,
        session: &todolist_core::TodoSession,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        settle(session, config).await?;

        match self {
            TodoCommand::List { format } => match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&session.entries())?);
                }
                OutputFormat::Text => print_entries(&session.entries()),
            },
            TodoCommand::Add { text } => {
                let entry = session
                    .add(text.join(" "))
                    .await
                    .map_err(CommandError::from)?;
                settle(session, config).await?;
                println!("Added: {}", entry);
            }
            TodoCommand::Toggle { id } => {
                let id = resolve_entry(&session.entries(), id)?;
                let toggled = session.toggle(&id).await.map_err(CommandError::from)?;
                settle(session, config).await?;
                if let Some(entry) = toggled {
                    println!("{}", entry);
                }
            }
            TodoCommand::Delete { id } => {
                let id = resolve_entry(&session.entries(), id)?;
                let removed = session.remove(&id).await.map_err(CommandError::from)?;
                settle(session, config).await?;
                if let Some(entry) = removed {
                    println!("Deleted: {}", entry.text);
                }
            }
        }
        Ok(())
    }
}
