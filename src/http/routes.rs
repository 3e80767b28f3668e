//! Route table with per-route policy chains.
//!
//! The handlers here are stand-ins for the application's real endpoints;
//! what matters is which policies guard which route.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use super::identity::IdentityExtractor;
use super::middleware::{enforce, Admission};
use crate::ratelimit::{PolicyChain, PolicyRegistry};

/// Build the application router.
pub fn router(registry: &PolicyRegistry, identity: IdentityExtractor) -> Router {
    let admission =
        |chain: PolicyChain| -> Arc<Admission> { Admission::new(chain, identity.clone()) };

    let auth = Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route_layer(middleware::from_fn_with_state(
            admission(registry.auth_chain()),
            enforce,
        ));

    let orders = Router::new().route(
        "/api/orders",
        get(list_orders)
            .route_layer(middleware::from_fn_with_state(
                admission(registry.user_chain()),
                enforce,
            ))
            .merge(post(create_order).route_layer(middleware::from_fn_with_state(
                admission(registry.order_chain()),
                enforce,
            ))),
    );

    let tenant = Router::new()
        .route("/api/tenant/dashboard", get(tenant_dashboard))
        .route_layer(middleware::from_fn_with_state(
            admission(registry.tenant_chain()),
            enforce,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(auth)
        .merge(orders)
        .merge(tenant)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn login() -> Json<Value> {
    Json(json!({ "success": true, "message": "Logged in" }))
}

async fn register() -> Json<Value> {
    Json(json!({ "success": true, "message": "Registered" }))
}

async fn list_orders() -> Json<Value> {
    Json(json!({ "success": true, "orders": [] }))
}

async fn create_order() -> Json<Value> {
    Json(json!({ "success": true, "message": "Order created" }))
}

async fn tenant_dashboard() -> Json<Value> {
    Json(json!({ "success": true, "widgets": [] }))
}
