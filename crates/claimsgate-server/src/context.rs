//! Caller identity extracted from request headers.
//!
//! Handlers receive a [`RequestContext`] and pass its fields on explicitly;
//! nothing downstream reads request-scoped state on its own.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, request::Parts},
};
use claimsgate_api::ApiError;
use uuid::Uuid;

pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const PROVIDER_HEADER: &str = "x-provider-id";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub organization_id: Uuid,
    pub provider_id: Option<String>,
    pub request_ip: Option<String>,
}

impl RequestContext {
    /// The provider id, for operations that act on behalf of one provider.
    pub fn require_provider(&self) -> Result<&str, ApiError> {
        self.provider_id
            .as_deref()
            .ok_or_else(|| ApiError::bad_request("The 'X-Provider-Id' header is required"))
    }

    fn from_headers(headers: &HeaderMap, peer: Option<SocketAddr>) -> Result<Self, ApiError> {
        let raw_org = headers
            .get(ORGANIZATION_HEADER)
            .ok_or_else(|| ApiError::unauthorized("The 'X-Organization-Id' header is required"))?
            .to_str()
            .map_err(|_| ApiError::bad_request("X-Organization-Id is not valid text"))?;
        let organization_id = Uuid::parse_str(raw_org.trim())
            .map_err(|_| ApiError::bad_request("X-Organization-Id must be a UUID"))?;

        let provider_id = headers
            .get(PROVIDER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        // First hop of X-Forwarded-For wins over the socket peer.
        let request_ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .or_else(|| peer.map(|p| p.ip().to_string()));

        Ok(Self {
            organization_id,
            provider_id,
            request_ip,
        })
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::from_headers(&parts.headers, peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn extracts_organization_provider_and_forwarded_ip() {
        let org = Uuid::new_v4();
        let ctx = RequestContext::from_headers(
            &headers(&[
                (ORGANIZATION_HEADER, &org.to_string()),
                (PROVIDER_HEADER, "prov-1"),
                ("x-forwarded-for", "10.1.2.3, 172.16.0.1"),
            ]),
            Some("127.0.0.1:9000".parse().unwrap()),
        )
        .unwrap();
        assert_eq!(ctx.organization_id, org);
        assert_eq!(ctx.require_provider().unwrap(), "prov-1");
        assert_eq!(ctx.request_ip.as_deref(), Some("10.1.2.3"));
    }

    #[test]
    fn falls_back_to_peer_address() {
        let org = Uuid::new_v4().to_string();
        let ctx = RequestContext::from_headers(
            &headers(&[(ORGANIZATION_HEADER, &org)]),
            Some("192.168.0.9:4000".parse().unwrap()),
        )
        .unwrap();
        assert_eq!(ctx.request_ip.as_deref(), Some("192.168.0.9"));
        assert!(ctx.require_provider().is_err());
    }

    #[test]
    fn missing_or_malformed_organization_is_rejected() {
        let err = RequestContext::from_headers(&HeaderMap::new(), None).unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);

        let err = RequestContext::from_headers(&headers(&[(ORGANIZATION_HEADER, "acme")]), None)
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
    }
}
