use anyhow::{Context, Result};
use std::sync::Arc;

use crate::access::{AllowAllRbac, StaticAccessList};
use crate::api;
use crate::api::email::{EmailSender, LogEmailSender, SmtpConfig, SmtpSender};
use crate::api::state::ServiceConfig;
use crate::nonce::StoreKind;
use crate::storage::Provider;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub secret: String,
    pub storage_path: String,
    pub base_url: Option<String>,
    pub token_ttl_seconds: i64,
    pub token_expiry_skew_seconds: u64,
    pub nonce_store: StoreKind,
    pub allowed_networks: String,
    pub user_auth_ttl_days: i64,
    pub support_url: Option<String>,
    pub link_ttl_seconds: i64,
    pub email_send_interval_seconds: u64,
    pub access_list: String,
    pub email: SmtpConfig,
}

/// Execute the server action.
///
/// # Errors
///
/// Returns an error if storage, email, or server startup fails.
pub async fn execute(args: Args) -> Result<()> {
    let provider = Arc::new(
        Provider::connect(&args.storage_path)
            .await
            .context("failed to open storage")?,
    );

    // An unset SMTP host routes outbound email to the log, which is the
    // local-development mode.
    let email: Arc<dyn EmailSender> = if args.email.host.is_empty() {
        Arc::new(LogEmailSender)
    } else {
        Arc::new(SmtpSender::new(&args.email).context("failed to build SMTP sender")?)
    };

    let mut config = ServiceConfig::new()
        .with_base_url(args.base_url)
        .with_token_ttl_seconds(args.token_ttl_seconds)
        .with_token_expiry_skew_seconds(args.token_expiry_skew_seconds)
        .with_nonce_store(args.nonce_store)
        .with_user_auth_ttl_days(args.user_auth_ttl_days)
        .with_link_ttl_seconds(args.link_ttl_seconds)
        .with_email_send_interval_seconds(args.email_send_interval_seconds);
    if let Some(support_url) = args.support_url {
        config = config.with_support_url(support_url);
    }

    let context = api::ServerContext {
        config,
        secret: args.secret,
        provider,
        email,
        access: Arc::new(StaticAccessList::from_csv(&args.access_list)),
        rbac: Arc::new(AllowAllRbac),
        allowed_networks: api::AllowedNetworks::parse(&args.allowed_networks),
    };

    api::serve(args.port, context).await
}
