//! Request identity and key resolution.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// Identity used when a request carries no client address at all.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// The subjects a request can be throttled as, built once per request.
///
/// The web layer fills in whatever it knows. Every field is optional and
/// resolution always falls back to the network address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentityContext {
    /// Client network address
    pub ip: Option<IpAddr>,
    /// Authenticated user identifier, if the request has a valid session
    pub user_id: Option<String>,
    /// Tenant attached to the request context by upstream middleware
    pub tenant_id: Option<String>,
    /// Tenant taken from the tenant header
    pub tenant_header: Option<String>,
}

impl RequestIdentityContext {
    /// Context for an anonymous client.
    pub fn anonymous(ip: IpAddr) -> Self {
        Self {
            ip: Some(ip),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    pub fn with_tenant_header(mut self, tenant: impl Into<String>) -> Self {
        self.tenant_header = Some(tenant.into());
        self
    }

    /// The network address as a key, or [`UNKNOWN_IDENTITY`].
    pub fn ip_key(&self) -> String {
        self.ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| UNKNOWN_IDENTITY.to_string())
    }
}

/// How a policy turns a request into a counter identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyResolver {
    /// Client network address
    #[default]
    Ip,
    /// Authenticated user, else network address
    User,
    /// Tenant from context, else tenant header, else network address
    Tenant,
}

impl KeyResolver {
    /// Resolve the identity key for a request. Never fails.
    pub fn resolve(&self, ctx: &RequestIdentityContext) -> String {
        match self {
            KeyResolver::Ip => ctx.ip_key(),
            KeyResolver::User => non_empty(&ctx.user_id).unwrap_or_else(|| ctx.ip_key()),
            KeyResolver::Tenant => non_empty(&ctx.tenant_id)
                .or_else(|| non_empty(&ctx.tenant_header))
                .unwrap_or_else(|| ctx.ip_key()),
        }
    }
}

impl fmt::Display for KeyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyResolver::Ip => write!(f, "ip"),
            KeyResolver::User => write!(f, "user"),
            KeyResolver::Tenant => write!(f, "tenant"),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_ip_resolution() {
        let ctx = RequestIdentityContext::anonymous(ip("10.0.0.1")).with_user("alice");
        assert_eq!(KeyResolver::Ip.resolve(&ctx), "10.0.0.1");
    }

    #[test]
    fn test_user_resolution_prefers_user() {
        let ctx = RequestIdentityContext::anonymous(ip("10.0.0.1")).with_user("alice");
        assert_eq!(KeyResolver::User.resolve(&ctx), "alice");
    }

    #[test]
    fn test_user_resolution_falls_back_to_ip() {
        let ctx = RequestIdentityContext::anonymous(ip("10.0.0.1"));
        assert_eq!(KeyResolver::User.resolve(&ctx), "10.0.0.1");

        let blank = RequestIdentityContext::anonymous(ip("10.0.0.1")).with_user("  ");
        assert_eq!(KeyResolver::User.resolve(&blank), "10.0.0.1");
    }

    #[test]
    fn test_tenant_resolution_precedence() {
        let base = RequestIdentityContext::anonymous(ip("2001:db8::1"));

        let full = base
            .clone()
            .with_tenant("acme")
            .with_tenant_header("globex");
        assert_eq!(KeyResolver::Tenant.resolve(&full), "acme");

        let header_only = base.clone().with_tenant_header("globex");
        assert_eq!(KeyResolver::Tenant.resolve(&header_only), "globex");

        assert_eq!(KeyResolver::Tenant.resolve(&base), "2001:db8::1");
    }

    #[test]
    fn test_missing_everything_resolves_to_unknown() {
        let ctx = RequestIdentityContext::default();
        for resolver in [KeyResolver::Ip, KeyResolver::User, KeyResolver::Tenant] {
            assert_eq!(resolver.resolve(&ctx), UNKNOWN_IDENTITY);
        }
    }
}
