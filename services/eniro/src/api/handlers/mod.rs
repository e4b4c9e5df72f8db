//! Route handlers and shared request utilities.

pub mod auth;
pub mod client_config;
pub mod entry;
pub mod health;
pub mod provision;

use axum::http::HeaderMap;
use std::net::SocketAddr;

use crate::api::state::ServiceConfig;

/// Client IP as reported by common proxy headers.
pub(crate) fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Client IP for binding and allow-list checks: proxy headers win, the
/// peer address is the fallback.
pub(crate) fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    forwarded_ip(headers).or_else(|| peer.map(|addr| addr.ip().to_string()))
}

/// Whether the request arrived over TLS, as seen through the proxy.
pub(crate) fn request_is_secure(headers: &HeaderMap) -> bool {
    headers
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|proto| proto.eq_ignore_ascii_case("https"))
}

/// Resolve the externally visible base URL: explicit configuration wins,
/// otherwise it is derived from the request.
pub(crate) fn base_url(config: &ServiceConfig, headers: &HeaderMap) -> String {
    if let Some(configured) = config.base_url() {
        return configured.trim_end_matches('/').to_string();
    }

    let scheme = if request_is_secure(headers) { "https" } else { "http" };
    let host = headers
        .get("host")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    format!("{scheme}://{host}")
}

/// Absolute URL for a service path.
pub(crate) fn url_for(config: &ServiceConfig, headers: &HeaderMap, path: &str) -> String {
    let base = base_url(config, headers);
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn forwarded_ip_prefers_first_forwarded_hop() {
        let headers = headers(&[
            ("x-forwarded-for", "1.2.3.4, 5.6.7.8"),
            ("x-real-ip", "9.9.9.9"),
        ]);
        assert_eq!(forwarded_ip(&headers), Some("1.2.3.4".to_string()));
    }

    #[test]
    fn client_ip_falls_back_to_peer() {
        let peer: SocketAddr = "192.0.2.1:4711".parse().expect("socket addr");
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer)),
            Some("192.0.2.1".to_string())
        );
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }

    #[test]
    fn base_url_prefers_configuration() {
        let config = ServiceConfig::new()
            .with_base_url(Some("https://door.example.com/".to_string()));
        assert_eq!(
            base_url(&config, &headers(&[("host", "internal:8080")])),
            "https://door.example.com"
        );
    }

    #[test]
    fn base_url_derives_scheme_from_proxy_header() {
        let config = ServiceConfig::new();
        assert_eq!(
            base_url(
                &config,
                &headers(&[("host", "door.example.com"), ("x-forwarded-proto", "https")])
            ),
            "https://door.example.com"
        );
        assert_eq!(
            base_url(&config, &headers(&[("host", "door.example.com")])),
            "http://door.example.com"
        );
    }

    #[test]
    fn url_for_joins_paths() {
        let config = ServiceConfig::new();
        let request = headers(&[("host", "door.example.com")]);
        assert_eq!(
            url_for(&config, &request, "/entry/abc"),
            "http://door.example.com/entry/abc"
        );
        assert_eq!(
            url_for(&config, &request, "entry/abc"),
            "http://door.example.com/entry/abc"
        );
    }
}
