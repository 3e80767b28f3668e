//! Building a `RequestIdentityContext` from an HTTP request.

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request};
use axum::http::{HeaderMap, HeaderName};

use crate::error::{Result, TurnstileError};
use crate::ratelimit::RequestIdentityContext;

/// Authenticated user attached to the request by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Tenant attached to the request by the tenant resolution layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext(pub String);

/// Reads the identity sources a request carries.
///
/// If an upstream layer already inserted a `RequestIdentityContext` it wins.
/// Otherwise one is assembled from the connection address, the
/// `AuthenticatedUser` and `TenantContext` extensions, and the tenant header.
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    trust_proxy: bool,
    tenant_header: HeaderName,
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self {
            trust_proxy: false,
            tenant_header: HeaderName::from_static("x-tenant-id"),
        }
    }
}

impl IdentityExtractor {
    pub fn new(trust_proxy: bool, tenant_header: &str) -> Result<Self> {
        let tenant_header = HeaderName::from_bytes(tenant_header.to_ascii_lowercase().as_bytes())
            .map_err(|e| {
                TurnstileError::Config(format!("invalid tenant header '{}': {}", tenant_header, e))
            })?;

        Ok(Self {
            trust_proxy,
            tenant_header,
        })
    }

    pub fn extract(&self, request: &Request) -> RequestIdentityContext {
        let extensions = request.extensions();

        if let Some(ctx) = extensions.get::<RequestIdentityContext>() {
            return ctx.clone();
        }

        let headers = request.headers();
        let forwarded = if self.trust_proxy {
            forwarded_ip(headers)
        } else {
            None
        };
        let ip = forwarded.or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|info| info.0.ip())
        });

        RequestIdentityContext {
            ip,
            user_id: extensions.get::<AuthenticatedUser>().map(|u| u.0.clone()),
            tenant_id: extensions.get::<TenantContext>().map(|t| t.0.clone()),
            tenant_header: headers
                .get(&self.tenant_header)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        }
    }
}

/// First hop of `X-Forwarded-For`, if it parses as an address.
fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|hop| hop.trim().parse().ok())
}
