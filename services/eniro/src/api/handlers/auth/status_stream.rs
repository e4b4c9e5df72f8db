//! Server-push status stream for an in-flight email login.
//!
//! The scanner opens this stream with its `email_otp` token and waits.
//! Each second the loop probes the verify-store for the shared `jti`; a
//! link click elsewhere puts it there, at which point the stream hands the
//! scanner a redirect to the derived `email_login` token and closes. The
//! primary nonce is never touched here, only the verify-store marker is
//! consumed.
//!
//! Cancellation is cooperative: dropping the response body (client
//! disconnect) drops the stream at its next await point.

use axum::extract::{Extension, Query};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use entry_token::{AUD_EMAIL_OTP, AccessCodeClaims};

use crate::api::errors::{ApiError, ErrorKind};
use crate::api::handlers::url_for;
use crate::api::state::ServiceState;
use crate::clock::unix_now;
use crate::nonce::NonceError;

const STATUS_PENDING: &str = "pending";
const STATUS_CONFIRMED: &str = "confirmed";
const STATUS_EXPIRED: &str = "expired";
const STATUS_ERROR: &str = "error";

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub token: Option<String>,
}

fn frame(value: &serde_json::Value) -> Event {
    Event::default().data(value.to_string())
}

fn status_events(
    state: Arc<ServiceState>,
    token: String,
    verify_base: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    async_stream::stream! {
        let claims: AccessCodeClaims = match state.tokens().verify(&token, &[AUD_EMAIL_OTP]) {
            Ok(claims) => claims,
            Err(err) => {
                warn!("failed to decode email status token: {err}");
                yield Ok(frame(&json!({
                    "status": STATUS_ERROR,
                    "error": "Failed to decode token. Please request a new login link.",
                })));
                return;
            }
        };

        // Pre-sign the login token handed over on confirmation. It shares
        // the base claim's nonce, so consuming it later finishes the pair.
        let login_url = match state.tokens().derive_login_token(&claims) {
            Ok(login_token) => format!("{verify_base}{login_token}"),
            Err(err) => {
                warn!("failed to derive login token: {err}");
                yield Ok(frame(&json!({
                    "status": STATUS_ERROR,
                    "error": "Internal server error. Please try again later.",
                })));
                return;
            }
        };

        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;

            match state.verify_store().consume(&claims.registered.jti).await {
                Ok(()) => {
                    debug!(email = %claims.email, "email login confirmed by link click");
                    yield Ok(frame(&json!({
                        "status": STATUS_CONFIRMED,
                        "redirect": login_url,
                    })));
                    return;
                }
                Err(NonceError::Missing) => {
                    if unix_now() >= claims.registered.exp {
                        yield Ok(frame(&json!({
                            "status": STATUS_EXPIRED,
                            "error": "Login link has expired. Please request a new login link.",
                        })));
                        return;
                    }
                    yield Ok(frame(&json!({ "status": STATUS_PENDING })));
                }
                Err(NonceError::Expired { .. }) => {
                    yield Ok(frame(&json!({
                        "status": STATUS_EXPIRED,
                        "error": "Login link has expired. Please request a new login link.",
                    })));
                    return;
                }
                Err(err) => {
                    // Transient store trouble reads as "not confirmed yet".
                    warn!("verify store probe failed: {err}");
                    yield Ok(frame(&json!({ "status": STATUS_PENDING })));
                }
            }
        }
    }
}

#[utoipa::path(
    get,
    path = "/auth/email/status",
    params(("token" = String, Query, description = "The scanner's email_otp token")),
    responses(
        (status = 200, description = "SSE stream of login status frames"),
        (status = 400, description = "Missing token")
    ),
    tag = "auth"
)]
pub async fn status_stream(
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
    state: Extension<Arc<ServiceState>>,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| {
            warn!("email status check token is missing");
            ApiError::new(ErrorKind::MissingParameter).with_message("Token is required")
        })?;

    let verify_base = url_for(state.config(), &headers, "/auth/email/verify/");
    let stream = status_events(Arc::clone(&state.0), token, verify_base);

    Ok((
        [
            ("Cache-Control", "no-cache"),
            ("X-Accel-Buffering", "no"),
        ],
        Sse::new(stream),
    )
        .into_response())
}
