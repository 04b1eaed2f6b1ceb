//! API Router configuration

use super::handlers;
use super::middleware::{panic_response, request_identity, require_api_version};
use super::state::AppState;
use crate::config::ServerConfig;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue},
    middleware::from_fn,
    routing::{get, put},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Create the broker router: `/v2` OSB routes plus `/health`
pub fn create_router(state: AppState, config: &ServerConfig) -> Router {
    let osb_routes = Router::new()
        .route("/catalog", get(handlers::get_catalog))
        .route(
            "/service_instances/:instance_id",
            put(handlers::provision_instance)
                .patch(handlers::update_instance)
                .delete(handlers::deprovision_instance),
        )
        .route(
            "/service_instances/:instance_id/last_operation",
            get(handlers::last_operation),
        )
        .route(
            "/service_instances/:instance_id/service_bindings/:binding_id",
            put(handlers::bind).delete(handlers::unbind),
        )
        .route_layer(from_fn(require_api_version));

    let router = Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/v2", osb_routes)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_identity));

    let router = if config.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    };

    router.with_state(state)
}
