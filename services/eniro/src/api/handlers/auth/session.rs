//! Cookie-bound session management: verification, renewal, logout.
//!
//! Sessions are long-lived claims in the `auth_token` cookie. Verification
//! never consumes the session nonce (sessions are reusable); renewal and
//! logout do, which is what makes invalidation effective across the
//! process fleet when the SQL nonce store is in use.

use axum::extract::{Extension, Query};
use axum::http::header::{InvalidHeaderValue, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use entry_token::SessionClaims;

use crate::api::errors::{ApiError, ErrorKind};
use crate::api::handlers::request_is_secure;
use crate::api::state::ServiceState;
use crate::clock::unix_now;

pub const AUTH_COOKIE_NAME: &str = "auth_token";

/// Friendly messages for error codes carried back to the login page.
const LOGIN_ERROR_CODES: &[(&str, &str)] = &[
    (
        "VERIFY_TOKEN_USED",
        "This login link has already been used. Please request a new link.",
    ),
    (
        "VERIFY_TOKEN_EXPIRED",
        "This login link has expired or is invalid. Please request a new login link.",
    ),
    (
        "EMAIL_TOKEN_MISSING",
        "The email verification token is missing. Please request a new login link.",
    ),
];

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == AUTH_COOKIE_NAME && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

/// Build the session cookie. `Secure` is set only when the request itself
/// arrived over TLS, so local development keeps working.
pub(crate) fn session_cookie(
    state: &ServiceState,
    headers: &HeaderMap,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let max_age = state.config().session_ttl_seconds();
    let mut cookie = format!(
        "{AUTH_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age}"
    );
    if request_is_secure(headers) {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(headers: &HeaderMap) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{AUTH_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if request_is_secure(headers) {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Resolve the session cookie into validated claims.
///
/// A claim is only honored while its nonce is still present: a logout or
/// rotation elsewhere kills the cookie even before its `exp`.
///
/// # Errors
///
/// [`ErrorKind::AuthRequired`] when no cookie is present, token errors
/// otherwise.
pub(crate) async fn verify_session(
    state: &ServiceState,
    headers: &HeaderMap,
) -> Result<SessionClaims, ApiError> {
    let token =
        extract_session_token(headers).ok_or_else(|| ApiError::new(ErrorKind::AuthRequired))?;
    let claims: SessionClaims = state.tokens().verify(&token, &[])?;
    if !state.tokens().nonce_active(&claims.registered).await {
        return Err(ApiError::new(ErrorKind::InvalidNonce));
    }
    Ok(claims)
}

/// Mint a fresh session for `uid` and return its `Set-Cookie` value.
pub(crate) async fn new_session(
    state: &ServiceState,
    headers: &HeaderMap,
    uid: &str,
) -> Result<HeaderValue, ApiError> {
    let (token, _claims) = state
        .tokens()
        .issue_session(uid, state.config().session_ttl_seconds())
        .await?;
    session_cookie(state, headers, &token)
        .map_err(|err| ApiError::new(ErrorKind::Internal).with_source(err.into()))
}

/// Rotate the session when forced, marked for renewal, or inside the final
/// half of its lifetime. The old nonce is consumed before the new cookie
/// is issued, so the prior token cannot be replayed.
///
/// Returns the new cookie, or `None` when no rotation was needed (also the
/// no-op taken when the presented cookie belongs to a different user).
pub(crate) async fn renew_session(
    state: &ServiceState,
    headers: &HeaderMap,
    uid: &str,
    mut force: bool,
) -> Result<Option<HeaderValue>, ApiError> {
    if let Some(old_token) = extract_session_token(headers) {
        if let Ok(old_claims) = state.tokens().verify::<SessionClaims>(&old_token, &[]) {
            if old_claims.uid != uid {
                // Could be tampering, could be a stale cookie after an
                // account change. Either way, leave it alone.
                warn!(
                    token_uid = %old_claims.uid,
                    expected_uid = %uid,
                    "session renewal uid mismatch"
                );
                return Ok(None);
            }

            if old_claims.renew {
                debug!(uid, "session marked for mandatory renewal");
                force = true;
            }

            let renew_age = state.config().session_ttl_seconds() / 2;
            if force || old_claims.registered.remaining(unix_now()) < renew_age {
                if let Err(err) = state.tokens().consume_nonce(&old_claims.registered).await {
                    debug!("previous session nonce was already gone: {err}");
                }
                force = true;
            }
        } else {
            // Undecodable cookie: replace it outright.
            force = true;
        }
    } else if !force {
        warn!(uid, "session renewal without an existing session");
        return Err(ApiError::new(ErrorKind::AuthRequired));
    }

    if !force {
        debug!(uid, "session renewal not needed");
        return Ok(None);
    }

    new_session(state, headers, uid).await.map(Some)
}

/// Best-effort logout: consume the session nonce when the cookie decodes,
/// always clear the client.
pub(crate) async fn logout_session(state: &ServiceState, headers: &HeaderMap) -> HeaderValue {
    if let Some(token) = extract_session_token(headers) {
        if let Ok(claims) = state.tokens().verify::<SessionClaims>(&token, &[]) {
            if let Err(err) = state.tokens().consume_nonce(&claims.registered).await {
                debug!("logout nonce consume failed: {err}");
            }
            info!(uid = %claims.uid, "user logged out");
        }
    }

    clear_session_cookie(headers)
        .unwrap_or_else(|_| HeaderValue::from_static("auth_token=; Path=/; Max-Age=0"))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthStatusResponse {
    pub status: &'static str,
    #[serde(rename = "userID")]
    pub user_id: String,
}

#[utoipa::path(
    get,
    path = "/auth/status",
    responses(
        (status = 200, description = "Session is active", body = AuthStatusResponse),
        (status = 401, description = "No valid session")
    ),
    tag = "auth"
)]
pub async fn status(
    headers: HeaderMap,
    state: Extension<Arc<ServiceState>>,
) -> Result<Json<AuthStatusResponse>, ApiError> {
    let claims = verify_session(&state, &headers).await?;
    Ok(Json(AuthStatusResponse {
        status: "authenticated",
        user_id: claims.uid,
    }))
}

#[utoipa::path(
    get,
    path = "/auth/renew",
    responses(
        (status = 200, description = "Session rotated"),
        (status = 401, description = "No valid session")
    ),
    tag = "auth"
)]
pub async fn renew(
    headers: HeaderMap,
    state: Extension<Arc<ServiceState>>,
) -> Result<Response, ApiError> {
    let claims = verify_session(&state, &headers).await?;
    let cookie = renew_session(&state, &headers, &claims.uid, true).await?;

    let mut response_headers = HeaderMap::new();
    if let Some(cookie) = cookie {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((StatusCode::OK, response_headers).into_response())
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 303, description = "Session cleared, redirect to /")
    ),
    tag = "auth"
)]
pub async fn logout(headers: HeaderMap, state: Extension<Arc<ServiceState>>) -> Response {
    let cookie = logout_session(&state, &headers).await;

    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);
    (response_headers, Redirect::to("/")).into_response()
}

#[derive(Debug, Deserialize)]
pub struct LoginPageQuery {
    pub error: Option<String>,
    pub next: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginPageResponse {
    pub link_ttl_minutes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[utoipa::path(
    get,
    path = "/auth/login",
    responses(
        (status = 200, description = "Login dialog data", body = LoginPageResponse)
    ),
    tag = "auth"
)]
pub async fn login_page(
    Query(query): Query<LoginPageQuery>,
    state: Extension<Arc<ServiceState>>,
) -> Json<LoginPageResponse> {
    let error = query.error.map(|code| {
        LOGIN_ERROR_CODES
            .iter()
            .find(|(known, _)| *known == code)
            .map_or_else(
                || {
                    warn!(code, "unknown error code on login page");
                    "An unknown error occurred. Please try again.".to_string()
                },
                |(_, message)| (*message).to_string(),
            )
    });

    Json(LoginPageResponse {
        link_ttl_minutes: state.config().link_ttl_seconds() / 60,
        error,
        next: query.next,
    })
}
