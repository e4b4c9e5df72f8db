//! Shared scaffolding for handler-level integration tests: an in-memory
//! service context plus a recording email sender the tests read the OTP
//! and link back out of.
#![allow(dead_code)]

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::Response;
use http_body_util::BodyExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use eniro::access::{AccessList, AllowAllRbac, Rbac, StaticAccessList};
use eniro::api::email::{EmailMessage, EmailSender};
use eniro::api::state::{ServiceConfig, ServiceState};
use eniro::nonce::MemoryStore;
use eniro::storage::Provider;
use eniro::tokens::TokenService;

pub const SECRET: &str = "integration-test-secret";
pub const ENTRY_NAME: &str = "Ag C331";

/// Captures outbound email instead of delivering it.
#[derive(Default)]
pub struct RecordingSender {
    messages: Mutex<Vec<EmailMessage>>,
}

impl RecordingSender {
    pub async fn last_message(&self) -> Option<EmailMessage> {
        self.messages.lock().await.last().cloned()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        self.messages.lock().await.push(message.clone());
        Ok(())
    }
}

pub struct TestContext {
    pub state: Arc<ServiceState>,
    pub provider: Arc<Provider>,
    pub entry_id: i64,
    pub sender: Arc<RecordingSender>,
}

pub async fn context() -> Result<TestContext> {
    context_with(
        Arc::new(StaticAccessList::from_csv(
            "alice@example.com,bob@example.com",
        )),
        Arc::new(AllowAllRbac),
    )
    .await
}

pub async fn context_with(
    access: Arc<dyn AccessList>,
    rbac: Arc<dyn Rbac>,
) -> Result<TestContext> {
    let provider = Arc::new(Provider::connect(":memory:").await?);
    provider.migrate().await?;
    let entry_id = provider.create_entry(ENTRY_NAME, None).await?;

    let nonce_store = MemoryStore::spawn(Duration::from_secs(60));
    let verify_store = MemoryStore::spawn(Duration::from_secs(60));
    let tokens = TokenService::new(SECRET, nonce_store)?;

    let sender = Arc::new(RecordingSender::default());
    let config = ServiceConfig::new().with_token_ttl_seconds(60);
    let state = Arc::new(ServiceState::new(
        config,
        tokens,
        verify_store,
        Arc::clone(&sender) as Arc<dyn EmailSender>,
        access,
        rbac,
    ));

    Ok(TestContext {
        state,
        provider,
        entry_id,
        sender,
    })
}

pub fn peer(ip: &str) -> SocketAddr {
    format!("{ip}:40000").parse().expect("socket address")
}

pub fn request_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("host", HeaderValue::from_static("door.example.test"));
    headers
}

pub fn headers_with_cookie(cookie: &str) -> HeaderMap {
    let mut headers = request_headers();
    headers.insert(
        header::COOKIE,
        HeaderValue::from_str(cookie).expect("cookie header"),
    );
    headers
}

/// Pull the `auth_token=` cookie pair out of a response's `Set-Cookie`.
pub fn session_cookie(response: &Response) -> Option<String> {
    let value = response.headers().get(header::SET_COOKIE)?.to_str().ok()?;
    let pair = value.split(';').next()?.trim();
    pair.starts_with("auth_token=").then(|| pair.to_string())
}

pub async fn body_json(response: Response) -> Result<serde_json::Value> {
    let bytes = response
        .into_body()
        .collect()
        .await
        .context("failed to collect response body")?
        .to_bytes();
    serde_json::from_slice(&bytes).context("response body is not json")
}

pub async fn body_text(response: Response) -> Result<String> {
    let bytes = response
        .into_body()
        .collect()
        .await
        .context("failed to collect response body")?
        .to_bytes();
    Ok(String::from_utf8_lossy(&bytes).to_string())
}

/// The 6-digit code embedded in the rendered login email.
pub fn extract_otp(html: &str) -> Option<String> {
    let start = html.find("<strong>")? + "<strong>".len();
    let end = html[start..].find("</strong>")? + start;
    Some(html[start..end].to_string())
}

/// The login link URL embedded in the rendered login email.
pub fn extract_link(html: &str) -> Option<String> {
    let start = html.find("href=\"")? + "href=\"".len();
    let end = html[start..].find('"')? + start;
    Some(html[start..end].to_string())
}

/// Mint a session cookie for an arbitrary uid, bypassing the login flow.
/// Shares the context's nonce store so the session validates.
pub async fn forged_session_cookie(context: &TestContext, uid: &str) -> Result<String> {
    let tokens = TokenService::new(SECRET, Arc::clone(context.state.tokens().store()))?;
    let (token, _claims) = tokens.issue_session(uid, 86_400).await?;
    Ok(format!("auth_token={token}"))
}
