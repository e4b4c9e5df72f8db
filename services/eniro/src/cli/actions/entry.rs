use anyhow::{Context, Result};
use std::sync::Arc;

use crate::storage::Provider;

#[derive(Debug)]
pub enum Command {
    List,
    Add {
        name: String,
        calendar_url: Option<String>,
    },
    Delete {
        id: i64,
    },
}

#[derive(Debug)]
pub struct Args {
    pub storage_path: String,
    pub command: Command,
}

/// Execute an entryway administration action.
///
/// # Errors
///
/// Returns an error when the storage operation fails.
pub async fn execute(args: Args) -> Result<()> {
    let provider = Arc::new(
        Provider::connect(&args.storage_path)
            .await
            .context("failed to open storage")?,
    );
    provider.migrate().await?;

    match args.command {
        Command::List => {
            let entries = provider.list_entries().await?;
            if entries.is_empty() {
                println!("No entries found");
                return Ok(());
            }
            println!("{:<6} {:<24} CALENDAR URL", "ID", "NAME");
            for entry in entries {
                println!(
                    "{:<6} {:<24} {}",
                    entry.id,
                    entry.name,
                    entry.calendar_url.unwrap_or_default()
                );
            }
        }
        Command::Add { name, calendar_url } => {
            let id = provider
                .create_entry(&name, calendar_url.as_deref())
                .await?;
            println!("Created entry {id}: {name}");
        }
        Command::Delete { id } => {
            provider.delete_entry(id).await?;
            println!("Deleted entry {id}");
        }
    }

    provider.close().await;
    Ok(())
}
