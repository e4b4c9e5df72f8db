use anyhow::{Context, Result, bail};

use crate::api::email::SmtpConfig;
use crate::cli::actions::{Action, device, entry, server};
use crate::nonce::StoreKind;
use crate::storage::DeviceStatus;

fn string_arg(matches: &clap::ArgMatches, name: &str) -> String {
    matches.get_one::<String>(name).cloned().unwrap_or_default()
}

fn parse_server(matches: &clap::ArgMatches, sub: &clap::ArgMatches) -> Result<Action> {
    let nonce_store: StoreKind = string_arg(sub, "nonce-store")
        .parse()
        .map_err(|err: String| anyhow::anyhow!(err))?;

    Ok(Action::Server(server::Args {
        port: sub.get_one::<u16>("port").copied().unwrap_or(8080),
        secret: string_arg(matches, "secret"),
        storage_path: string_arg(matches, "storage-path"),
        base_url: sub.get_one::<String>("base-url").cloned(),
        token_ttl_seconds: sub.get_one::<i64>("token-ttl").copied().unwrap_or(60),
        token_expiry_skew_seconds: sub
            .get_one::<u64>("token-expiry-skew")
            .copied()
            .unwrap_or(5),
        nonce_store,
        allowed_networks: string_arg(sub, "allowed-networks"),
        user_auth_ttl_days: sub.get_one::<i64>("user-auth-ttl").copied().unwrap_or(8),
        support_url: sub.get_one::<String>("support-url").cloned(),
        link_ttl_seconds: sub.get_one::<i64>("link-ttl").copied().unwrap_or(600),
        email_send_interval_seconds: sub
            .get_one::<u64>("email-send-interval")
            .copied()
            .unwrap_or(60),
        access_list: string_arg(sub, "access-list"),
        email: SmtpConfig {
            host: string_arg(sub, "email-host"),
            port: sub.get_one::<u16>("email-port").copied().unwrap_or(25),
            username: string_arg(sub, "email-username"),
            password: string_arg(sub, "email-password"),
            from: string_arg(sub, "email-from"),
        },
    }))
}

fn parse_status(sub: &clap::ArgMatches, name: &str) -> Result<DeviceStatus> {
    string_arg(sub, name)
        .parse()
        .map_err(|err: String| anyhow::anyhow!(err))
}

fn parse_device(matches: &clap::ArgMatches, sub: &clap::ArgMatches) -> Result<Action> {
    let storage_path = string_arg(matches, "storage-path");
    let command = match sub.subcommand() {
        Some(("list", list)) => device::Command::List {
            status: parse_status(list, "status")?,
        },
        Some(("approve", approve)) => device::Command::Approve {
            device_id: string_arg(approve, "device_id"),
            entry_id: approve
                .get_one::<i64>("entry_id")
                .copied()
                .context("entry_id is required")?,
        },
        Some(("reject", reject)) => device::Command::Reject {
            device_id: string_arg(reject, "device_id"),
        },
        Some(("revoke", revoke)) => device::Command::Revoke {
            device_id: string_arg(revoke, "device_id"),
            entry_id: revoke
                .get_one::<i64>("entry_id")
                .copied()
                .context("entry_id is required")?,
        },
        Some(("prune", prune)) => device::Command::Prune {
            older_than_days: prune
                .get_one::<i64>("older-than-days")
                .copied()
                .unwrap_or(30),
            status: parse_status(prune, "status")?,
        },
        _ => bail!("unknown device subcommand"),
    };

    Ok(Action::Device(device::Args {
        storage_path,
        command,
    }))
}

fn parse_entry(matches: &clap::ArgMatches, sub: &clap::ArgMatches) -> Result<Action> {
    let storage_path = string_arg(matches, "storage-path");
    let command = match sub.subcommand() {
        Some(("list", _)) => entry::Command::List,
        Some(("add", add)) => entry::Command::Add {
            name: string_arg(add, "name"),
            calendar_url: add.get_one::<String>("calendar-url").cloned(),
        },
        Some(("delete", delete)) => entry::Command::Delete {
            id: delete
                .get_one::<i64>("id")
                .copied()
                .context("id is required")?,
        },
        _ => bail!("unknown entry subcommand"),
    };

    Ok(Action::Entry(entry::Args {
        storage_path,
        command,
    }))
}

/// Map parsed arguments to an [`Action`].
///
/// # Errors
///
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some(("server", sub)) => parse_server(matches, sub),
        Some(("device", sub)) => parse_device(matches, sub),
        Some(("entry", sub)) => parse_entry(matches, sub),
        _ => bail!("a subcommand is required"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn server_action_defaults() -> Result<()> {
        temp_env::with_vars(
            [
                ("SECRET", None::<&str>),
                ("TOKEN_TTL", None),
                ("NONCE_STORE", None),
                ("STORAGE_PATH", None),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["eniro", "server"]);
                let action = handler(&matches)?;
                let Action::Server(args) = action else {
                    panic!("expected server action");
                };
                assert_eq!(args.port, 8080);
                assert_eq!(args.token_ttl_seconds, 60);
                assert_eq!(args.nonce_store, StoreKind::Memory);
                assert_eq!(args.storage_path, "./data/storage.db");
                assert_eq!(args.email.port, 25);
                Ok(())
            },
        )
    }

    #[test]
    fn device_prune_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec![
            "eniro",
            "device",
            "prune",
            "--older-than-days",
            "7",
            "--status",
            "rejected",
        ]);
        let action = handler(&matches)?;
        let Action::Device(args) = action else {
            panic!("expected device action");
        };
        match args.command {
            device::Command::Prune {
                older_than_days,
                status,
            } => {
                assert_eq!(older_than_days, 7);
                assert_eq!(status, DeviceStatus::Rejected);
            }
            other => panic!("expected prune, got {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn entry_add_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec![
            "eniro",
            "entry",
            "add",
            "Ag C331",
            "--calendar-url",
            "https://calendar.example.com/c331",
        ]);
        let Action::Entry(args) = handler(&matches)? else {
            panic!("expected entry action");
        };
        match args.command {
            entry::Command::Add { name, calendar_url } => {
                assert_eq!(name, "Ag C331");
                assert_eq!(
                    calendar_url.as_deref(),
                    Some("https://calendar.example.com/c331")
                );
            }
            other => panic!("expected add, got {other:?}"),
        }
        Ok(())
    }
}
