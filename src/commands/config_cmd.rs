use clap::{Args, Subcommand};

use todolist::Config;

use super::{load_auth, OutputFormat};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("data_dir: {}", config.data_dir.value.display());
                        println!("  source: {}", config.data_dir.source);
                        println!();

                        let sync = &config.sync;
                        println!(
                            "server_url: {}",
                            sync.server_url.as_deref().unwrap_or("(not set)")
                        );
                        println!("policy: {:?}", sync.policy);
                        println!(
                            "backoff: {}ms .. {}ms",
                            sync.initial_backoff_ms, sync.max_backoff_ms
                        );
                        println!("settle_timeout: {}s", sync.settle_timeout_secs);
                        println!();

                        let auth = load_auth(config);
                        match auth.credentials() {
                            Some(c) => println!("signed in as: {}", c.user_id),
                            None => println!("signed in as: (nobody)"),
                        }
                        println!("  credentials: {}", auth.credentials_path().display());
                    }
                }
                Ok(())
            }
        }
    }
}
