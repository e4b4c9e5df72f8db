use axum::extract::{Extension, Query};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::api::handlers::auth::session::verify_session;
use crate::api::state::ServiceState;

#[derive(Debug, Deserialize)]
pub struct HealthQuery {
    pub ping: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct Health {
    pub message: String,
    pub authenticated: bool,
}

#[utoipa::path(
    get,
    path = "/api/v1/health",
    params(("ping" = Option<String>, Query, description = "Echoed back in the response")),
    responses(
        (status = 200, description = "Service is alive", body = Health)
    ),
    tag = "health"
)]
pub async fn health(
    headers: axum::http::HeaderMap,
    Query(query): Query<HealthQuery>,
    state: Extension<Arc<ServiceState>>,
) -> Json<Health> {
    let message = query
        .ping
        .filter(|ping| !ping.is_empty())
        .unwrap_or_else(|| "pong".to_string());
    let authenticated = verify_session(&state, &headers).await.is_ok();

    Json(Health {
        message,
        authenticated,
    })
}
