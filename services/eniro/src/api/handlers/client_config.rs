use axum::extract::Extension;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::handlers::base_url;
use crate::api::state::ServiceState;

/// Initial configuration snapshot for browser clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClientConfig {
    pub token_ttl: i64,
    pub token_expiry_skew: u64,
    pub base_url: String,
    pub support_url: String,
}

#[utoipa::path(
    get,
    path = "/config.json",
    responses(
        (status = 200, description = "Client configuration snapshot", body = ClientConfig)
    ),
    tag = "config"
)]
pub async fn client_config(
    headers: HeaderMap,
    state: Extension<Arc<ServiceState>>,
) -> Json<ClientConfig> {
    Json(ClientConfig {
        token_ttl: state.config().token_ttl_seconds(),
        token_expiry_skew: state.config().token_expiry_skew_seconds(),
        base_url: base_url(state.config(), &headers),
        support_url: state.config().support_url().to_string(),
    })
}
