//! Device provisioning: first-contact registration, IP binding, and the
//! provisioning predicate consulted before any entry QR is produced.

pub mod device_id;

use axum::extract::{ConnectInfo, Extension, Query};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::api::errors::{ApiError, ErrorKind};
use crate::api::handlers::auth::session::verify_session;
use crate::api::handlers::{client_ip, url_for};
use crate::api::state::ServiceState;
use crate::clock::unix_now;
use crate::storage::{Device, DeviceStatus, Provider};
use crate::tokens::DEVICE_PROVISION_TTL_SECONDS;

use device_id::{generate_device_id, verify_device_id};

/// Identify the calling device from the query string or `X-Device-ID`.
pub(crate) fn presented_device_id(
    headers: &HeaderMap,
    device_id_param: Option<&str>,
) -> Option<String> {
    device_id_param
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-device-id")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        })
}

/// Provisioning predicate.
///
/// With a device id: the device must exist, be approved, and when an
/// entryway is in question hold an unrevoked approval for it. Without one
/// the caller is a scanning user rather than a display device and passes.
pub(crate) async fn check_provisioning(
    provider: &Provider,
    device_id: Option<&str>,
    entry_id: Option<i64>,
) -> Result<Option<Device>, ApiError> {
    let Some(device_id) = device_id else {
        return Ok(None);
    };

    let device = provider
        .get_device(device_id)
        .await
        .map_err(|err| ApiError::new(ErrorKind::Database).with_source(err))?
        .ok_or_else(|| ApiError::new(ErrorKind::DeviceNotFound))?;

    match device.status {
        DeviceStatus::Approved => {}
        DeviceStatus::Pending => return Err(ApiError::new(ErrorKind::DevicePending)),
        DeviceStatus::Rejected => return Err(ApiError::new(ErrorKind::DeviceRejected)),
    }

    if let Some(entry_id) = entry_id {
        let approval = provider
            .get_approved_device(device_id, entry_id)
            .await
            .map_err(|err| ApiError::new(ErrorKind::Database).with_source(err))?;
        if approval.is_none() {
            warn!(device_id, entry_id, "device holds no approval for entry");
            return Err(ApiError::new(ErrorKind::Forbidden));
        }
    }

    Ok(Some(device))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegistrationRequest {
    pub device_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegistrationResponse {
    pub status: &'static str,
    pub device_id: String,
    pub message: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub authenticated: bool,
}

#[utoipa::path(
    post,
    path = "/api/provision/register",
    request_body = RegistrationRequest,
    responses(
        (status = 200, description = "Device is approved", body = RegistrationResponse),
        (status = 202, description = "Device is pending approval", body = RegistrationResponse),
        (status = 400, description = "Device id failed verification"),
        (status = 403, description = "Device rejected or IP mismatch")
    ),
    tag = "provision"
)]
pub async fn register(
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    state: Extension<Arc<ServiceState>>,
    provider: Extension<Arc<Provider>>,
    payload: Option<Json<RegistrationRequest>>,
) -> Result<Response, ApiError> {
    let requested = payload.and_then(|Json(request)| request.device_id);
    let device_id = match requested {
        Some(device_id) if !device_id.trim().is_empty() => {
            let device_id = device_id.trim().to_string();
            if !verify_device_id(&device_id, state.tokens().secret()) {
                warn!(device_id, "device id failed verification on registration");
                return Err(ApiError::new(ErrorKind::InvalidParameter)
                    .with_message("Device ID verification failed"));
            }
            device_id
        }
        _ => generate_device_id(state.tokens().secret()),
    };

    let client_ip = client_ip(&headers, Some(peer))
        .ok_or_else(|| ApiError::new(ErrorKind::InvalidRequest))?;

    let device = match provider
        .get_device(&device_id)
        .await
        .map_err(|err| ApiError::new(ErrorKind::Database).with_source(err))?
    {
        Some(device) => device,
        None => {
            info!(device_id, client_ip, "new device, adding to pending pool");
            provider
                .create_device(&device_id, &client_ip)
                .await
                .map_err(|err| ApiError::new(ErrorKind::Database).with_source(err))?
        }
    };

    // Re-registration must come from the IP the device bound at first
    // contact; the stored record is left untouched on mismatch.
    if device.client_ip != client_ip {
        warn!(
            device_id,
            expected_ip = %device.client_ip,
            actual_ip = %client_ip,
            "client IP mismatch during device registration"
        );
        return Err(ApiError::new(ErrorKind::IpMismatch));
    }

    match device.status {
        DeviceStatus::Approved => {
            let authenticated = verify_session(&state, &headers).await.is_ok();
            Ok((
                StatusCode::OK,
                Json(RegistrationResponse {
                    status: "approved",
                    device_id,
                    message: "Device is approved",
                    authenticated,
                }),
            )
                .into_response())
        }
        DeviceStatus::Pending => {
            debug!(device_id, "device registration pending approval");
            Ok((
                StatusCode::ACCEPTED,
                Json(RegistrationResponse {
                    status: "pending",
                    device_id,
                    message: "Device registration is pending approval",
                    authenticated: false,
                }),
            )
                .into_response())
        }
        DeviceStatus::Rejected => {
            warn!(device_id, "registration attempt for rejected device");
            Err(ApiError::new(ErrorKind::DeviceRejected))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProvisionQrQuery {
    pub device_id: Option<String>,
    /// Cache buster; unused server-side.
    #[serde(rename = "cb")]
    pub _cb: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProvisionQrResponse {
    pub url: String,
    pub expires_at: String,
}

#[utoipa::path(
    get,
    path = "/api/provision/qr.json",
    params(
        ("device_id" = String, Query, description = "Device requesting provisioning"),
        ("cb" = Option<String>, Query, description = "Cache buster")
    ),
    responses(
        (status = 200, description = "Provisioning QR payload", body = ProvisionQrResponse),
        (status = 400, description = "Missing device id or client IP")
    ),
    tag = "provision"
)]
pub async fn qr_json(
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Query(query): Query<ProvisionQrQuery>,
    state: Extension<Arc<ServiceState>>,
) -> Result<Response, ApiError> {
    let device_id = query
        .device_id
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::new(ErrorKind::DeviceIdRequired))?;
    let client_ip = client_ip(&headers, Some(peer))
        .ok_or_else(|| ApiError::new(ErrorKind::MissingParameter))?;

    let token = state
        .tokens()
        .issue_device_provision(device_id, &client_ip)
        .await?;
    let provisioning_url = url_for(
        state.config(),
        &headers,
        &format!("/api/provision/authorize?{token}"),
    );
    let expires_at = chrono::DateTime::from_timestamp(
        unix_now() + DEVICE_PROVISION_TTL_SECONDS,
        0,
    )
    .map(|at| at.to_rfc3339())
    .unwrap_or_default();

    // Clients may cache the payload for the token lifetime.
    let cache_control = format!("max-age={DEVICE_PROVISION_TTL_SECONDS}");
    Ok((
        [(header::CACHE_CONTROL, cache_control)],
        Json(ProvisionQrResponse {
            url: provisioning_url,
            expires_at,
        }),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn presented_device_id_prefers_query_param() {
        let mut headers = HeaderMap::new();
        headers.insert("x-device-id", HeaderValue::from_static("from-header"));
        assert_eq!(
            presented_device_id(&headers, Some("from-query")),
            Some("from-query".to_string())
        );
        assert_eq!(
            presented_device_id(&headers, None),
            Some("from-header".to_string())
        );
        assert_eq!(presented_device_id(&HeaderMap::new(), None), None);
        assert_eq!(presented_device_id(&HeaderMap::new(), Some("  ")), None);
    }
}
