//! Request-derived identity for staff endpoints and the caller's address.

use crate::errors::CountersignError;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Header set by the authenticating proxy in front of the staff API.
pub const AUTHENTICATED_USER_HEADER: &str = "x-authenticated-user";

/// The staff member making the request, as asserted by the auth proxy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StaffIdentity {
    pub user: String,
}

impl StaffIdentity {
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let user = headers.get(AUTHENTICATED_USER_HEADER)?.to_str().ok()?.trim();
        if user.is_empty() {
            return None;
        }
        Some(Self {
            user: user.to_string(),
        })
    }
}

impl<S: Send + Sync> FromRequestParts<S> for StaffIdentity {
    type Rejection = CountersignError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Self::from_headers(&parts.headers)
            .ok_or_else(|| CountersignError::Unauthorized("Authentication required".to_string()))
    }
}

/// Best-effort client address: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the socket peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIp(pub Option<String>);

impl ClientIp {
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        let ip = forwarded
            .or(real_ip)
            .map(str::to_string)
            .or_else(|| peer.map(|addr| addr.ip().to_string()));
        Self(ip)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::from_parts(&parts.headers, peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_staff_identity_requires_non_empty_header() {
        let mut headers = HeaderMap::new();
        assert!(StaffIdentity::from_headers(&headers).is_none());

        headers.insert(AUTHENTICATED_USER_HEADER, HeaderValue::from_static("  "));
        assert!(StaffIdentity::from_headers(&headers).is_none());

        headers.insert(AUTHENTICATED_USER_HEADER, HeaderValue::from_static("hr@example.com"));
        assert_eq!(
            StaffIdentity::from_headers(&headers).unwrap().user,
            "hr@example.com"
        );
    }

    #[test]
    fn test_client_ip_precedence() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(
            ClientIp::from_parts(&headers, Some(peer)).0.as_deref(),
            Some("10.0.0.9")
        );

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(
            ClientIp::from_parts(&headers, Some(peer)).0.as_deref(),
            Some("198.51.100.4")
        );

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(
            ClientIp::from_parts(&headers, Some(peer)).0.as_deref(),
            Some("203.0.113.7")
        );
    }

    #[test]
    fn test_client_ip_absent() {
        assert_eq!(ClientIp::from_parts(&HeaderMap::new(), None).0, None);
    }
}
