//! Device lifecycle at the handler level: registration, IP binding,
//! approval, QR issuance, revocation, and rejection.

mod common;

use anyhow::Result;
use axum::Json;
use axum::extract::{ConnectInfo, Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::sync::Arc;

use eniro::api::handlers::entry::{self, EntryQrQuery};
use eniro::api::handlers::provision::device_id::verify_device_id;
use eniro::api::handlers::provision::{self, ProvisionQrQuery, RegistrationRequest};
use eniro::storage::DeviceStatus;

use common::{SECRET, TestContext, body_json, context, peer, request_headers};

async fn register(
    context: &TestContext,
    device_id: Option<&str>,
    ip: &str,
) -> axum::response::Response {
    provision::register(
        request_headers(),
        ConnectInfo(peer(ip)),
        Extension(Arc::clone(&context.state)),
        Extension(Arc::clone(&context.provider)),
        Some(Json(RegistrationRequest {
            device_id: device_id.map(str::to_string),
        })),
    )
    .await
    .into_response()
}

async fn entry_qr(context: &TestContext, device_id: &str) -> axum::response::Response {
    entry::qr_json(
        request_headers(),
        Query(EntryQrQuery {
            device_id: Some(device_id.to_string()),
            _cb: None,
        }),
        Extension(Arc::clone(&context.state)),
        Extension(Arc::clone(&context.provider)),
    )
    .await
    .into_response()
}

#[tokio::test]
async fn device_lifecycle() -> Result<()> {
    let context = context().await?;

    // First contact: a fresh id is minted and the device parks as pending.
    let response = register(&context, None, "192.0.2.1").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "pending");
    let device_id = body["device_id"].as_str().expect("device id").to_string();
    assert!(verify_device_id(&device_id, SECRET.as_bytes()));

    // Still pending before any admin action.
    let response = register(&context, Some(&device_id), "192.0.2.1").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // Approve for the entryway.
    context
        .provider
        .update_device_status(&device_id, DeviceStatus::Approved, Some("admin@host"))
        .await?;
    context
        .provider
        .create_approved_device(&device_id, context.entry_id, "admin@host")
        .await?;

    let response = register(&context, Some(&device_id), "192.0.2.1").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["status"], "approved");

    // The approved device gets an entry QR payload.
    let response = entry_qr(&context, &device_id).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    let url = body["url"].as_str().expect("qr url");
    assert!(url.contains("/entry/"), "url: {url}");
    assert!(!body["expires_at"].as_str().expect("expires_at").is_empty());

    let token = url.rsplit('/').next().expect("token");
    let claims: entry_token::EntryClaims = context.state.tokens().verify(token, &[])?;
    assert_eq!(claims.entry_id, context.entry_id);

    // Revocation takes the QR away again.
    context
        .provider
        .revoke_approved_device(&device_id, context.entry_id)
        .await?;
    let response = entry_qr(&context, &device_id).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn ip_binding_rejects_other_addresses() -> Result<()> {
    let context = context().await?;

    let response = register(&context, None, "192.0.2.1").await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await?;
    let device_id = body["device_id"].as_str().expect("device id").to_string();

    let response = register(&context, Some(&device_id), "192.0.2.99").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await?;
    assert!(
        body["code"]
            .as_array()
            .is_some_and(|codes| codes.iter().any(|code| code == "IP_MISMATCH")),
        "body: {body}"
    );

    // The stored record is unchanged by the failed attempt.
    let device = context
        .provider
        .get_device(&device_id)
        .await?
        .expect("device exists");
    assert_eq!(device.client_ip, "192.0.2.1");
    assert_eq!(device.status, DeviceStatus::Pending);
    Ok(())
}

#[tokio::test]
async fn fabricated_device_id_is_rejected() -> Result<()> {
    let context = context().await?;

    let response = register(
        &context,
        Some("0a6ee535-3a66-4e93-b800-f0be52a5ee13"),
        "192.0.2.1",
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn rejected_device_gets_403() -> Result<()> {
    let context = context().await?;

    let response = register(&context, None, "192.0.2.1").await;
    let body = body_json(response).await?;
    let device_id = body["device_id"].as_str().expect("device id").to_string();

    context
        .provider
        .update_device_status(&device_id, DeviceStatus::Rejected, Some("admin@host"))
        .await?;

    let response = register(&context, Some(&device_id), "192.0.2.1").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await?;
    assert!(
        body["code"]
            .as_array()
            .is_some_and(|codes| codes.iter().any(|code| code == "DEVICE_REJECTED")),
        "body: {body}"
    );
    Ok(())
}

#[tokio::test]
async fn unknown_device_cannot_fetch_entry_qr() -> Result<()> {
    let context = context().await?;
    let response = entry_qr(&context, "0a6ee535-3a66-4e93-b800-f0be52a5ee13").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn provisioning_qr_binds_device_and_ip() -> Result<()> {
    let context = context().await?;

    let response = provision::qr_json(
        request_headers(),
        ConnectInfo(peer("192.0.2.7")),
        Query(ProvisionQrQuery {
            device_id: Some("0a6ee535-3a66-4e93-b800-f0be52a5ee13".to_string()),
            _cb: None,
        }),
        Extension(Arc::clone(&context.state)),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    let url = body["url"].as_str().expect("url");
    let token = url.rsplit('?').next().expect("token in url");
    let claims: entry_token::DeviceProvisionClaims =
        context.state.tokens().verify(token, &[])?;
    assert_eq!(claims.device_id, "0a6ee535-3a66-4e93-b800-f0be52a5ee13");
    assert_eq!(claims.client_ip, "192.0.2.7");
    Ok(())
}

#[tokio::test]
async fn provisioning_qr_requires_device_id() -> Result<()> {
    let context = context().await?;

    let response = provision::qr_json(
        request_headers(),
        ConnectInfo(peer("192.0.2.7")),
        Query(ProvisionQrQuery {
            device_id: None,
            _cb: None,
        }),
        Extension(Arc::clone(&context.state)),
    )
    .await
    .into_response();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}
