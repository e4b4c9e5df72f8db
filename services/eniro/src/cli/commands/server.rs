use clap::{Arg, Command};

#[must_use]
pub fn command() -> Command {
    Command::new("server")
        .about("Run the HTTP service")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("ENIRO_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("base-url")
                .long("base-url")
                .help("Externally visible base URL; derived from the request when unset")
                .env("BASE_URL"),
        )
        .arg(
            Arg::new("token-ttl")
                .long("token-ttl")
                .help("Entry token TTL in seconds")
                .default_value("60")
                .env("TOKEN_TTL")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("token-expiry-skew")
                .long("token-expiry-skew")
                .help("Clock-skew margin in seconds; also paces the nonce sweeper")
                .default_value("5")
                .env("TOKEN_EXPIRY_SKEW")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("nonce-store")
                .long("nonce-store")
                .help("Nonce store backend")
                .default_value("memory")
                .env("NONCE_STORE")
                .value_parser(["memory", "sql"]),
        )
        .arg(
            Arg::new("allowed-networks")
                .long("allowed-networks")
                .help("Comma separated CIDR allow list; empty allows all")
                .default_value("")
                .env("ALLOWED_NETWORKS"),
        )
        .arg(
            Arg::new("user-auth-ttl")
                .long("user-auth-ttl")
                .help("Session lifetime in days")
                .default_value("8")
                .env("USER_AUTH_TTL")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("support-url")
                .long("support-url")
                .help("Support URL shown to clients")
                .env("SUPPORT_URL"),
        )
        .arg(
            Arg::new("link-ttl")
                .long("link-ttl")
                .help("Email link and OTP lifetime in seconds")
                .default_value("600")
                .env("LINK_TTL")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("email-send-interval")
                .long("email-send-interval")
                .help("Minimum seconds between emails to the same address")
                .default_value("60")
                .env("EMAIL_SEND_INTERVAL")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("access-list")
                .long("access-list")
                .help("Comma separated email addresses allowed to log in")
                .default_value("")
                .env("ACCESS_LIST"),
        )
        .arg(
            Arg::new("email-host")
                .long("email-host")
                .help("SMTP host; empty logs outbound email instead of sending")
                .default_value("")
                .env("EMAIL_HOST"),
        )
        .arg(
            Arg::new("email-port")
                .long("email-port")
                .help("SMTP port")
                .default_value("25")
                .env("EMAIL_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("email-username")
                .long("email-username")
                .default_value("")
                .env("EMAIL_USERNAME"),
        )
        .arg(
            Arg::new("email-password")
                .long("email-password")
                .default_value("")
                .env("EMAIL_PASSWORD"),
        )
        .arg(
            Arg::new("email-from")
                .long("email-from")
                .help("Sender address for login emails")
                .default_value("noreply@example.com")
                .env("EMAIL_FROM"),
        )
}
