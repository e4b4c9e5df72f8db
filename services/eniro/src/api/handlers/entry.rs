//! Entry QR rotation and the access decision for scanned tokens.

use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use entry_token::EntryClaims;

use crate::api::errors::{ApiError, ErrorKind};
use crate::api::handlers::auth::session::{logout_session, verify_session};
use crate::api::handlers::provision::{check_provisioning, presented_device_id};
use crate::api::handlers::url_for;
use crate::api::state::ServiceState;
use crate::storage::Provider;
use crate::tokens::{TokenError, TokenService};

/// Per-entryway cache of the currently displayed token.
///
/// All scanner polls share this map; the lock is held across lookup and
/// re-issue so concurrent polls cannot race two fresh tokens for the same
/// entryway. Issuing under the lock is fine, signing is a bounded
/// cryptographic operation.
pub struct EntryTokenCache {
    tokens: Mutex<HashMap<i64, String>>,
}

impl EntryTokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Current token for `entry_id`, rotated when absent, malformed, or
    /// past its expiry. Returns the token and its expiry timestamp.
    ///
    /// # Errors
    ///
    /// Fails when a replacement token cannot be issued.
    pub async fn get_or_rotate(
        &self,
        tokens: &TokenService,
        entry_id: i64,
        ttl_seconds: i64,
    ) -> Result<(String, i64), TokenError> {
        let mut cache = self.tokens.lock().await;

        if let Some(cached) = cache.get(&entry_id) {
            // Sanity-check the shape before trusting the cached value.
            if cached.split('.').count() == 3 {
                if let Ok(claims) = tokens.verify::<EntryClaims>(cached, &[]) {
                    return Ok((cached.clone(), claims.registered.exp));
                }
            }
            debug!(entry_id, "cached entry token is stale, rotating");
        }

        let (token, claims) = tokens.issue_entry(entry_id, ttl_seconds).await?;
        cache.insert(entry_id, token.clone());
        debug!(entry_id, "issued new entry token");
        Ok((token, claims.registered.exp))
    }
}

impl Default for EntryTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
pub struct EntryQrQuery {
    pub device_id: Option<String>,
    #[serde(rename = "cb")]
    pub _cb: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EntryQrResponse {
    /// URL to encode as the QR image; clients schedule their refresh at
    /// roughly half the remaining lifetime.
    pub url: String,
    pub expires_at: String,
}

#[utoipa::path(
    get,
    path = "/entry/qr.json",
    params(
        ("device_id" = Option<String>, Query, description = "Scanning device identity"),
        ("cb" = Option<String>, Query, description = "Cache buster")
    ),
    responses(
        (status = 200, description = "Current entry QR payload", body = EntryQrResponse),
        (status = 403, description = "Provisioning check failed")
    ),
    tag = "entry"
)]
pub async fn qr_json(
    headers: HeaderMap,
    Query(query): Query<EntryQrQuery>,
    state: Extension<Arc<ServiceState>>,
    provider: Extension<Arc<Provider>>,
) -> Result<Response, ApiError> {
    let device_id = presented_device_id(&headers, query.device_id.as_deref())
        .ok_or_else(|| ApiError::new(ErrorKind::DeviceIdRequired))?;
    check_provisioning(&provider, Some(&device_id), None).await?;

    // The entryway to display comes from the device's newest approval.
    let approvals = provider
        .list_approved_by_device(&device_id)
        .await
        .map_err(|err| ApiError::new(ErrorKind::Database).with_source(err))?;
    let Some(approval) = approvals.first() else {
        warn!(device_id, "approved device has no entryway association");
        return Err(ApiError::new(ErrorKind::Forbidden));
    };

    let ttl = state.config().token_ttl_seconds();
    let (token, expires_at) = state
        .entry_tokens()
        .get_or_rotate(state.tokens(), approval.entry_id, ttl)
        .await?;

    let url = url_for(state.config(), &headers, &format!("/entry/{token}"));
    let expires_at = chrono::DateTime::from_timestamp(expires_at, 0)
        .map(|at| at.to_rfc3339())
        .unwrap_or_default();

    let cache_control = format!("max-age={ttl}");
    Ok((
        [(header::CACHE_CONTROL, cache_control)],
        Json(EntryQrResponse { url, expires_at }),
    )
        .into_response())
}

#[derive(Debug, Serialize, ToSchema)]
pub struct EntryGrantedResponse {
    pub status: &'static str,
    pub entry_id: i64,
    pub entry_name: String,
    pub message: &'static str,
}

#[utoipa::path(
    get,
    path = "/entry/{token}",
    params(("token" = String, Path, description = "Scanned entry token")),
    responses(
        (status = 200, description = "Entry granted", body = EntryGrantedResponse),
        (status = 302, description = "Redirect to login"),
        (status = 401, description = "Invalid, expired, or replayed token"),
        (status = 403, description = "Provisioning or permission failure")
    ),
    tag = "entry"
)]
pub async fn resolve(
    headers: HeaderMap,
    Path(token): Path<String>,
    state: Extension<Arc<ServiceState>>,
    provider: Extension<Arc<Provider>>,
) -> Result<Response, ApiError> {
    // Policy hook: a scanning user carries no device identity and passes;
    // a device that does identify itself must be in good standing.
    let device_id = presented_device_id(&headers, None);
    check_provisioning(&provider, device_id.as_deref(), None).await?;

    let claims: EntryClaims = state.tokens().verify(&token, &[])?;

    // Unauthenticated scanners bounce to the login dialog and come back to
    // this same URL; the nonce must therefore survive until the grant.
    let Ok(session) = verify_session(&state, &headers).await else {
        let next = format!("/entry/{token}");
        let login = url_for(
            state.config(),
            &headers,
            &format!("/auth/login?next={}", urlencode(&next)),
        );
        return Ok((
            StatusCode::FOUND,
            [(header::LOCATION, login)],
        )
            .into_response());
    };

    let Some(user_id) = state.access().lookup(&session.uid) else {
        // Membership was revoked after the session was minted; drop the
        // session along with the rejection.
        warn!(uid = %session.uid, "authenticated user absent from access list");
        let cookie = logout_session(&state, &headers).await;
        let mut response_headers = HeaderMap::new();
        response_headers.insert(header::SET_COOKIE, cookie);
        return Ok((
            response_headers,
            ApiError::new(ErrorKind::AuthRequired),
        )
            .into_response());
    };

    if !state.rbac().can(&user_id, "entry", "open") {
        warn!(uid = %user_id, entry_id = claims.entry_id, "entry open denied by policy");
        return Err(ApiError::new(ErrorKind::InsufficientPermissions));
    }

    let entry = provider
        .get_entry(claims.entry_id)
        .await
        .map_err(|err| ApiError::new(ErrorKind::Database).with_source(err))?
        .ok_or_else(|| ApiError::new(ErrorKind::InvalidToken))?;

    // The grant is the linearization point: first consumer wins, replays
    // and the losing side of a race get the nonce failure.
    state.tokens().consume_nonce(&claims.registered).await?;

    info!(uid = %user_id, entry_id = entry.id, entry_name = %entry.name, "entry granted");
    Ok((
        StatusCode::OK,
        Json(EntryGrantedResponse {
            status: "success",
            entry_id: entry.id,
            entry_name: entry.name,
            message: "Entry granted",
        }),
    )
        .into_response())
}

/// Minimal percent-encoding for the `next` query value.
fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::unix_now;
    use crate::nonce::MemoryStore;
    use anyhow::Result;
    use std::time::Duration;

    fn token_service() -> Result<TokenService> {
        let store = MemoryStore::spawn(Duration::from_secs(60));
        Ok(TokenService::new("test-secret", store)?)
    }

    #[tokio::test]
    async fn cache_returns_the_same_token_while_valid() -> Result<()> {
        let tokens = token_service()?;
        let cache = EntryTokenCache::new();

        let (first, first_exp) = cache.get_or_rotate(&tokens, 1, 60).await?;
        let (second, second_exp) = cache.get_or_rotate(&tokens, 1, 60).await?;
        assert_eq!(first, second);
        assert_eq!(first_exp, second_exp);
        Ok(())
    }

    #[tokio::test]
    async fn cache_rotates_expired_tokens() -> Result<()> {
        let tokens = token_service()?;
        let cache = EntryTokenCache::new();

        // A negative TTL yields a token that is already past its expiry
        // while its nonce row (TTL plus skew margin) is still storable.
        let (stale, _) = tokens.issue_entry(1, -1).await?;
        cache.tokens.lock().await.insert(1, stale.clone());

        let (fresh, exp) = cache.get_or_rotate(&tokens, 1, 60).await?;
        assert_ne!(fresh, stale);
        assert!(exp > unix_now());
        Ok(())
    }

    #[tokio::test]
    async fn cache_rotates_malformed_tokens() -> Result<()> {
        let tokens = token_service()?;
        let cache = EntryTokenCache::new();
        cache
            .tokens
            .lock()
            .await
            .insert(1, "not-a-token".to_string());

        let (fresh, _) = cache.get_or_rotate(&tokens, 1, 60).await?;
        assert_eq!(fresh.split('.').count(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn cache_is_keyed_per_entry() -> Result<()> {
        let tokens = token_service()?;
        let cache = EntryTokenCache::new();

        let (door_a, _) = cache.get_or_rotate(&tokens, 1, 60).await?;
        let (door_b, _) = cache.get_or_rotate(&tokens, 2, 60).await?;
        assert_ne!(door_a, door_b);
        Ok(())
    }

    #[test]
    fn urlencode_escapes_reserved_characters() {
        assert_eq!(urlencode("/entry/a.b"), "%2Fentry%2Fa.b");
        assert_eq!(urlencode("plain"), "plain");
    }
}
