use utoipa::openapi::{InfoBuilder, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::handlers::{auth, client_config, entry, health, provision};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both
/// served and documented.
pub(crate) fn api_router() -> OpenApiRouter {
    // `routes!` reads #[utoipa::path] to bind HTTP method + path.
    let mut router = OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(client_config::client_config))
        .routes(routes!(entry::qr_json))
        .routes(routes!(entry::resolve))
        .routes(routes!(provision::register))
        .routes(routes!(provision::qr_json))
        .routes(routes!(auth::session::login_page))
        .routes(routes!(auth::session::status))
        .routes(routes!(auth::session::renew))
        .routes(routes!(auth::session::logout))
        .routes(routes!(auth::email_login::login))
        .routes(routes!(auth::email_login::verify_otp))
        .routes(routes!(auth::email_login::verify_link))
        .routes(routes!(auth::status_stream::status_stream));

    let mut eniro_tag = Tag::new("eniro");
    eniro_tag.description = Some("QR entry-access control API".to_string());

    let mut auth_tag = Tag::new("auth");
    auth_tag.description = Some("Sessions and email login".to_string());

    let mut entry_tag = Tag::new("entry");
    entry_tag.description = Some("Entry QR rotation and access decisions".to_string());

    let mut provision_tag = Tag::new("provision");
    provision_tag.description = Some("Device provisioning".to_string());

    router.get_openapi_mut().tags =
        Some(vec![eniro_tag, auth_tag, entry_tag, provision_tag]);

    router
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum defaults.
    let info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(Some(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    OpenApiBuilder::new().info(info).build()
}
