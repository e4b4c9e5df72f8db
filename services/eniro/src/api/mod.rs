//! HTTP server assembly: router, middleware stack, and startup wiring.

pub mod email;
pub mod errors;
pub mod handlers;
pub mod state;

mod openapi;

pub use openapi::openapi;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{HeaderName, HeaderValue, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use ipnet::IpNet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::request_id::PropagateRequestIdLayer;
use tower_http::set_header::{SetRequestHeaderLayer, SetResponseHeaderLayer};
use tower_http::trace::TraceLayer;
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;

use crate::access::{AccessList, Rbac};
use crate::api::errors::{ApiError, ErrorKind};
use crate::api::state::{ServiceConfig, ServiceState};
use crate::nonce::build_store;
use crate::storage::Provider;
use crate::tokens::TokenService;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> utoipa_axum::router::OpenApiRouter {
    openapi::api_router()
}

/// Networks allowed to reach the service. An empty list allows everyone;
/// debug builds additionally always admit loopback.
pub struct AllowedNetworks {
    networks: Vec<IpNet>,
}

impl AllowedNetworks {
    #[must_use]
    pub fn parse(csv: &str) -> Self {
        let mut networks = Vec::new();
        for candidate in csv.split(',') {
            let candidate = candidate.trim();
            if candidate.is_empty() {
                continue;
            }
            match candidate.parse::<IpNet>() {
                Ok(network) => networks.push(network),
                Err(_) => warn!(cidr = candidate, "ignoring invalid CIDR"),
            }
        }
        Self { networks }
    }

    #[must_use]
    pub fn allows(&self, ip: IpAddr) -> bool {
        if self.networks.is_empty() {
            return true;
        }
        if cfg!(debug_assertions) && ip.is_loopback() {
            return true;
        }
        self.networks.iter().any(|network| network.contains(&ip))
    }
}

async fn enforce_allowed_networks(
    State(allowed): State<Arc<AllowedNetworks>>,
    request: Request,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = handlers::client_ip(request.headers(), peer)
        .and_then(|ip| ip.parse::<IpAddr>().ok());

    match client {
        Some(ip) if allowed.allows(ip) => next.run(request).await,
        Some(ip) => {
            warn!(%ip, "request from disallowed network");
            ApiError::new(ErrorKind::Forbidden).into_response()
        }
        None => {
            warn!("request without a resolvable client IP");
            ApiError::new(ErrorKind::Forbidden).into_response()
        }
    }
}

fn make_span(request: &axum::http::Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Everything `serve` needs besides the listener.
pub struct ServerContext {
    pub config: ServiceConfig,
    pub secret: String,
    pub provider: Arc<Provider>,
    pub email: Arc<dyn email::EmailSender>,
    pub access: Arc<dyn AccessList>,
    pub rbac: Arc<dyn Rbac>,
    pub allowed_networks: AllowedNetworks,
}

/// Start the server.
///
/// # Errors
///
/// Returns an error if the secret is rejected, migrations fail, or the
/// listener cannot be bound.
pub async fn serve(port: u16, context: ServerContext) -> Result<()> {
    let ServerContext {
        config,
        secret,
        provider,
        email,
        access,
        rbac,
        allowed_networks,
    } = context;

    provider.migrate().await.context("failed to run migrations")?;

    let skew = config.token_expiry_skew_seconds();
    let nonce_store = build_store(config.nonce_store(), skew, Arc::clone(&provider));
    let verify_store = build_store(config.nonce_store(), skew, Arc::clone(&provider));

    let tokens = TokenService::new(&secret, nonce_store)
        .context("failed to initialize token service")?;
    let state = Arc::new(ServiceState::new(
        config,
        tokens,
        verify_store,
        email,
        access,
        rbac,
    ));

    let no_store = HeaderValue::from_static("no-store, no-cache, must-revalidate");

    let (router, _openapi) = router().split_for_parts();
    let app = router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &Request<Body>| {
                        HeaderValue::from_str(Ulid::new().to_string().as_str()).ok()
                    },
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    header::CACHE_CONTROL,
                    no_store,
                ))
                .layer(middleware::from_fn_with_state(
                    Arc::new(allowed_networks),
                    enforce_allowed_networks,
                ))
                .layer(axum::Extension(Arc::clone(&state)))
                .layer(axum::Extension(Arc::clone(&provider))),
        );

    let listener = TcpListener::bind(format!("[::]:{port}"))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    info!("listening on [::]:{port}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("gracefully shutting down");
    })
    .await?;

    state.close();
    provider.close().await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_networks_parses_and_matches() {
        let allowed = AllowedNetworks::parse("10.0.0.0/8, not-a-cidr, 192.0.2.0/24");
        assert!(allowed.allows("10.1.2.3".parse().expect("ip")));
        assert!(allowed.allows("192.0.2.99".parse().expect("ip")));
        assert!(!allowed.allows("203.0.113.5".parse().expect("ip")));
    }

    #[test]
    fn empty_allow_list_admits_everyone() {
        let allowed = AllowedNetworks::parse("");
        assert!(allowed.allows("203.0.113.5".parse().expect("ip")));
    }

    #[cfg(debug_assertions)]
    #[test]
    fn loopback_is_admitted_in_debug_builds() {
        let allowed = AllowedNetworks::parse("10.0.0.0/8");
        assert!(allowed.allows("127.0.0.1".parse().expect("ip")));
    }
}
