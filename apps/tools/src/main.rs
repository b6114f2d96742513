use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shared::domain::GuildId;
use storage::{parse_document, ConfigStore, JsonFileStore};

/// Inspects and edits the bot's persisted session configuration.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "data.json")]
    data_path: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Lists every guild with saved configuration.
    List,
    Show {
        guild_id: u64,
    },
    /// Drops a guild's configuration so it starts fresh next time.
    Forget {
        guild_id: u64,
    },
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Validate = cli.command {
        let raw = match tokio::fs::read_to_string(&cli.data_path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                println!("{} does not exist yet", cli.data_path.display());
                return Ok(());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read '{}'", cli.data_path.display()))
            }
        };
        let entries = parse_document(&raw)?;
        println!("ok: {} session(s)", entries.len());
        return Ok(());
    }

    let store = JsonFileStore::open(&cli.data_path).await?;
    match cli.command {
        Command::List => {
            for guild_id in store.guild_ids().await? {
                let config = store.load_config(guild_id).await?.unwrap_or_default();
                let text = config.text.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
                let voice = config.voice.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
                println!(
                    "guild_id={guild_id} text={text} voice={voice} excluded_roles={}",
                    config.exclude.len()
                );
            }
        }
        Command::Show { guild_id } => match store.load_config(GuildId(guild_id)).await? {
            Some(config) => println!("{}", serde_json::to_string_pretty(&config)?),
            None => println!("no configuration for guild_id={guild_id}"),
        },
        Command::Forget { guild_id } => {
            if store.remove_config(GuildId(guild_id)).await? {
                println!("forgot guild_id={guild_id}");
            } else {
                println!("no configuration for guild_id={guild_id}");
            }
        }
        Command::Validate => {}
    }

    Ok(())
}
