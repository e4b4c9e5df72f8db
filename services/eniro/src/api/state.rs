//! Service configuration and shared state.

use std::sync::Arc;
use std::time::Duration;

use crate::access::{AccessList, Rbac};
use crate::api::email::EmailSender;
use crate::api::handlers::auth::send_cache::EmailSentCache;
use crate::api::handlers::entry::EntryTokenCache;
use crate::nonce::{NonceStore, StoreKind};
use crate::tokens::TokenService;

const DEFAULT_TOKEN_TTL_SECONDS: i64 = 60;
const DEFAULT_TOKEN_EXPIRY_SKEW_SECONDS: u64 = 5;
const DEFAULT_USER_AUTH_TTL_DAYS: i64 = 8;
const DEFAULT_LINK_TTL_SECONDS: i64 = 10 * 60;
const DEFAULT_EMAIL_SEND_INTERVAL_SECONDS: u64 = 60;
const DEFAULT_SUPPORT_URL: &str = "https://github.com/eniro-dev/eniro";

/// Address that skips SMTP in debug builds; the OTP and link go to the log
/// instead.
pub const TEST_ADDRESS: &str = "user@example.com";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    base_url: Option<String>,
    token_ttl_seconds: i64,
    token_expiry_skew_seconds: u64,
    nonce_store: StoreKind,
    user_auth_ttl_days: i64,
    link_ttl_seconds: i64,
    email_send_interval_seconds: u64,
    support_url: String,
}

impl ServiceConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            base_url: None,
            token_ttl_seconds: DEFAULT_TOKEN_TTL_SECONDS,
            token_expiry_skew_seconds: DEFAULT_TOKEN_EXPIRY_SKEW_SECONDS,
            nonce_store: StoreKind::Memory,
            user_auth_ttl_days: DEFAULT_USER_AUTH_TTL_DAYS,
            link_ttl_seconds: DEFAULT_LINK_TTL_SECONDS,
            email_send_interval_seconds: DEFAULT_EMAIL_SEND_INTERVAL_SECONDS,
            support_url: DEFAULT_SUPPORT_URL.to_string(),
        }
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: Option<String>) -> Self {
        self.base_url = base_url.filter(|url| !url.trim().is_empty());
        self
    }

    #[must_use]
    pub fn with_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.token_ttl_seconds = seconds;
        self
    }

    /// Skew is capped at half the token TTL so the sweeper margin can never
    /// dominate the token lifetime.
    #[must_use]
    pub fn with_token_expiry_skew_seconds(mut self, seconds: u64) -> Self {
        let max_skew = u64::try_from(self.token_ttl_seconds / 2).unwrap_or(0);
        self.token_expiry_skew_seconds = seconds.min(max_skew.max(1));
        self
    }

    #[must_use]
    pub fn with_nonce_store(mut self, kind: StoreKind) -> Self {
        self.nonce_store = kind;
        self
    }

    #[must_use]
    pub fn with_user_auth_ttl_days(mut self, days: i64) -> Self {
        self.user_auth_ttl_days = days;
        self
    }

    #[must_use]
    pub fn with_link_ttl_seconds(mut self, seconds: i64) -> Self {
        self.link_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_send_interval_seconds(mut self, seconds: u64) -> Self {
        self.email_send_interval_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_support_url(mut self, url: String) -> Self {
        self.support_url = url;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> Option<&str> {
        self.base_url.as_deref()
    }

    #[must_use]
    pub fn token_ttl_seconds(&self) -> i64 {
        self.token_ttl_seconds
    }

    #[must_use]
    pub fn token_expiry_skew_seconds(&self) -> u64 {
        self.token_expiry_skew_seconds
    }

    #[must_use]
    pub fn nonce_store(&self) -> StoreKind {
        self.nonce_store
    }

    #[must_use]
    pub fn user_auth_ttl_days(&self) -> i64 {
        self.user_auth_ttl_days
    }

    #[must_use]
    pub fn session_ttl_seconds(&self) -> i64 {
        self.user_auth_ttl_days * 24 * 60 * 60
    }

    #[must_use]
    pub fn link_ttl_seconds(&self) -> i64 {
        self.link_ttl_seconds
    }

    #[must_use]
    pub fn email_send_interval(&self) -> Duration {
        Duration::from_secs(self.email_send_interval_seconds)
    }

    #[must_use]
    pub fn support_url(&self) -> &str {
        &self.support_url
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide collaborators, built once at server start-up and handed to
/// handlers through an `Extension`. Nothing in here reaches back into the
/// HTTP layer.
pub struct ServiceState {
    config: ServiceConfig,
    tokens: TokenService,
    verify_store: Arc<dyn NonceStore>,
    entry_tokens: EntryTokenCache,
    send_cache: EmailSentCache,
    email: Arc<dyn EmailSender>,
    access: Arc<dyn AccessList>,
    rbac: Arc<dyn Rbac>,
}

impl ServiceState {
    #[must_use]
    pub fn new(
        config: ServiceConfig,
        tokens: TokenService,
        verify_store: Arc<dyn NonceStore>,
        email: Arc<dyn EmailSender>,
        access: Arc<dyn AccessList>,
        rbac: Arc<dyn Rbac>,
    ) -> Self {
        let send_cache = EmailSentCache::new(config.email_send_interval());
        Self {
            config,
            tokens,
            verify_store,
            entry_tokens: EntryTokenCache::new(),
            send_cache,
            email,
            access,
            rbac,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    /// Second nonce-store namespace signalling "link was clicked" to the
    /// SSE notifier without consuming the primary `jti`.
    #[must_use]
    pub fn verify_store(&self) -> &Arc<dyn NonceStore> {
        &self.verify_store
    }

    #[must_use]
    pub fn entry_tokens(&self) -> &EntryTokenCache {
        &self.entry_tokens
    }

    #[must_use]
    pub fn send_cache(&self) -> &EmailSentCache {
        &self.send_cache
    }

    #[must_use]
    pub fn email(&self) -> &Arc<dyn EmailSender> {
        &self.email
    }

    #[must_use]
    pub fn access(&self) -> &Arc<dyn AccessList> {
        &self.access
    }

    #[must_use]
    pub fn rbac(&self) -> &Arc<dyn Rbac> {
        &self.rbac
    }

    /// Stop background sweepers; called on shutdown.
    pub fn close(&self) {
        self.tokens.store().close();
        self.verify_store.close();
    }
}
