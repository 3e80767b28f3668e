//! HTTP admission layer and server.

mod identity;
mod middleware;
mod routes;
mod server;

pub use identity::{AuthenticatedUser, IdentityExtractor, TenantContext};
pub use middleware::{
    apply_quota_headers, denial_response, enforce, Admission, DenialBody, RATELIMIT_LIMIT,
    RATELIMIT_REMAINING, RATELIMIT_RESET,
};
pub use routes::router;
pub use server::HttpServer;
