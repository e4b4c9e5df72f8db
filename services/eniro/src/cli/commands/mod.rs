pub mod device;
pub mod entry;
pub mod logging;
pub mod server;

use clap::{
    Arg, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let command = Command::new("eniro")
        .about("QR entry-access control")
        .version(env!("CARGO_PKG_VERSION"))
        .color(ColorChoice::Auto)
        .styles(styles)
        .subcommand_required(true)
        .arg(
            Arg::new("secret")
                .long("secret")
                .help("Token signing secret; required in release builds")
                .default_value("")
                .env("SECRET")
                .global(true),
        )
        .arg(
            Arg::new("storage-path")
                .long("storage-path")
                .help("SQLite database path")
                .default_value("./data/storage.db")
                .env("STORAGE_PATH")
                .global(true),
        )
        .subcommand(server::command())
        .subcommand(device::command())
        .subcommand(entry::command());

    logging::with_args(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_metadata() {
        let command = new();
        assert_eq!(command.get_name(), "eniro");
        assert_eq!(
            command.get_version().map(ToString::to_string),
            Some(env!("CARGO_PKG_VERSION").to_string())
        );
    }

    #[test]
    fn server_args_parse() {
        let matches = new().get_matches_from(vec![
            "eniro",
            "server",
            "--port",
            "9090",
            "--nonce-store",
            "sql",
            "--token-ttl",
            "120",
        ]);
        let (name, sub) = matches.subcommand().expect("subcommand");
        assert_eq!(name, "server");
        assert_eq!(sub.get_one::<u16>("port").copied(), Some(9090));
        assert_eq!(sub.get_one::<String>("nonce-store").cloned(), Some("sql".to_string()));
        assert_eq!(sub.get_one::<i64>("token-ttl").copied(), Some(120));
    }

    #[test]
    fn server_args_from_env() {
        temp_env::with_vars(
            [
                ("ENIRO_PORT", Some("4443")),
                ("TOKEN_TTL", Some("90")),
                ("NONCE_STORE", Some("sql")),
                ("SECRET", Some("s3cret")),
            ],
            || {
                let matches = new().get_matches_from(vec!["eniro", "server"]);
                let (_, sub) = matches.subcommand().expect("subcommand");
                assert_eq!(sub.get_one::<u16>("port").copied(), Some(4443));
                assert_eq!(sub.get_one::<i64>("token-ttl").copied(), Some(90));
                assert_eq!(
                    sub.get_one::<String>("nonce-store").cloned(),
                    Some("sql".to_string())
                );
                assert_eq!(
                    sub.get_one::<String>("secret").cloned(),
                    Some("s3cret".to_string())
                );
            },
        );
    }

    #[test]
    fn device_approve_requires_entry_id() {
        let result = new().try_get_matches_from(vec!["eniro", "device", "approve", "dev-1"]);
        assert!(result.is_err());

        let matches = new()
            .try_get_matches_from(vec!["eniro", "device", "approve", "dev-1", "42"])
            .expect("valid approve");
        let (_, device) = matches.subcommand().expect("device");
        let (_, approve) = device.subcommand().expect("approve");
        assert_eq!(approve.get_one::<i64>("entry_id").copied(), Some(42));
    }

    #[test]
    fn invalid_nonce_store_is_rejected() {
        let result =
            new().try_get_matches_from(vec!["eniro", "server", "--nonce-store", "redis"]);
        assert!(result.is_err());
    }
}
