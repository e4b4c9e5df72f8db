use anyhow::{Context, Result, bail};
use std::sync::Arc;
use tracing::info;

use crate::clock::unix_now;
use crate::storage::{DeviceStatus, Provider};

#[derive(Debug)]
pub enum Command {
    List {
        status: DeviceStatus,
    },
    Approve {
        device_id: String,
        entry_id: i64,
    },
    Reject {
        device_id: String,
    },
    Revoke {
        device_id: String,
        entry_id: i64,
    },
    Prune {
        older_than_days: i64,
        status: DeviceStatus,
    },
}

#[derive(Debug)]
pub struct Args {
    pub storage_path: String,
    pub command: Command,
}

/// Identity recorded as the actor of an administrative change,
/// `user@host`.
fn active_user() -> String {
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    format!("{user}@{host}")
}

fn format_timestamp(unix: i64) -> String {
    chrono::DateTime::from_timestamp(unix, 0)
        .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| unix.to_string())
}

/// Execute a device administration action.
///
/// # Errors
///
/// Returns an error when the storage operation fails or referenced rows do
/// not exist.
pub async fn execute(args: Args) -> Result<()> {
    let provider = Arc::new(
        Provider::connect(&args.storage_path)
            .await
            .context("failed to open storage")?,
    );
    provider.migrate().await?;

    match args.command {
        Command::List { status } => {
            let devices = provider.list_devices(status).await?;
            if devices.is_empty() {
                println!("No {status} devices found");
                return Ok(());
            }

            println!(
                "{:<41} {:<9} {:<16} {:<20} {:<20} APPROVED BY",
                "DEVICE ID", "STATUS", "CLIENT IP", "CREATED AT", "UPDATED AT"
            );
            for device in devices {
                println!(
                    "{:<41} {:<9} {:<16} {:<20} {:<20} {}",
                    device.device_id,
                    device.status,
                    device.client_ip,
                    format_timestamp(device.created_at),
                    format_timestamp(device.updated_at),
                    device.approved_by.unwrap_or_default(),
                );
            }
        }
        Command::Approve {
            device_id,
            entry_id,
        } => {
            let Some(device) = provider.get_device(&device_id).await? else {
                bail!("device not found: {device_id}");
            };
            if provider.get_entry(entry_id).await?.is_none() {
                bail!("entry not found: {entry_id}");
            }
            if device.status == DeviceStatus::Rejected {
                bail!("device has been rejected: {device_id}");
            }

            let approver = active_user();
            provider
                .update_device_status(&device_id, DeviceStatus::Approved, Some(&approver))
                .await?;
            if provider
                .get_approved_device(&device_id, entry_id)
                .await?
                .is_none()
            {
                provider
                    .create_approved_device(&device_id, entry_id, &approver)
                    .await?;
            }

            info!(device_id, entry_id, approver, "device approved");
            println!("Approved {device_id} for entry {entry_id}");
        }
        Command::Reject { device_id } => {
            let approver = active_user();
            provider
                .update_device_status(&device_id, DeviceStatus::Rejected, Some(&approver))
                .await?;
            println!("Rejected {device_id}");
        }
        Command::Revoke {
            device_id,
            entry_id,
        } => {
            provider
                .revoke_approved_device(&device_id, entry_id)
                .await?;
            println!("Revoked {device_id} for entry {entry_id}");
        }
        Command::Prune {
            older_than_days,
            status,
        } => {
            let cutoff = unix_now() - older_than_days * 86_400;
            let removed = provider.prune_devices(cutoff, status).await?;
            println!("Pruned {removed} {status} devices older than {older_than_days} days");
        }
    }

    provider.close().await;
    Ok(())
}
