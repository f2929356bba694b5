// Request metadata captured server-side for click attribution

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use crate::app::AppState;

const MAX_USER_AGENT_LEN: usize = 512;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

/// First valid address in X-Forwarded-For, then X-Real-IP
pub fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let from_forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse::<IpAddr>().ok());

    from_forwarded.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok())
    })
}

/// Client address for a request. Forwarding headers are client-controlled
/// unless a proxy rewrites them, so they only count when trusted.
pub fn resolve_client_ip(
    headers: &HeaderMap,
    peer: Option<IpAddr>,
    trust_proxy_headers: bool,
) -> Option<IpAddr> {
    if trust_proxy_headers {
        forwarded_ip(headers).or(peer)
    } else {
        peer
    }
}

fn header_string(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl FromRequestParts<AppState> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let ip = resolve_client_ip(
            &parts.headers,
            peer,
            state.config.server.trust_proxy_headers,
        )
        .map(|ip| ip.to_string());

        let user_agent = header_string(&parts.headers, header::USER_AGENT).map(|ua| {
            ua.chars().take(MAX_USER_AGENT_LEN).collect::<String>()
        });

        Ok(ClientMeta {
            ip,
            user_agent,
            referer: header_string(&parts.headers, header::REFERER),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(
            forwarded_ip(&headers),
            Some("203.0.113.7".parse().unwrap())
        );
    }

    #[test]
    fn test_real_ip_fallback_and_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("unknown"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(
            forwarded_ip(&headers),
            Some("198.51.100.2".parse().unwrap())
        );

        assert_eq!(forwarded_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_forwarding_headers_ignored_unless_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        let peer: Option<IpAddr> = Some("192.0.2.10".parse().unwrap());

        assert_eq!(resolve_client_ip(&headers, peer, false), peer);
        assert_eq!(
            resolve_client_ip(&headers, peer, true),
            Some("203.0.113.7".parse().unwrap())
        );
        // Trusted proxy without the header still falls back to the peer
        assert_eq!(resolve_client_ip(&HeaderMap::new(), peer, true), peer);
    }
}
