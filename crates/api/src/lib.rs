//! HTTP API for the bookstore order core.
//!
//! Exposes placement, cancellation, and admin order management over REST,
//! with structured logging (tracing) and Prometheus metrics.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, patch, post};
use domain::RandomTrackingIds;
use metrics_exporter_prometheus::PrometheusHandle;
use placement::{InMemoryPaymentGateway, OrderPlacementService, PaymentGateway, PlacementConfig};
use store::OrderStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::place::<S>))
        .route("/orders", get(routes::orders::list::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<S>))
        .route("/admin/orders/{id}", delete(routes::orders::delete::<S>))
        .route(
            "/admin/orders/{id}/status",
            patch(routes::orders::update_status::<S>),
        )
        .route(
            "/admin/orders/{id}/payment",
            patch(routes::orders::update_payment::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state over `store` with random tracking numbers
/// and the given payment gateway.
pub fn create_state<S: OrderStore + Clone + 'static>(
    store: S,
    payments: Arc<dyn PaymentGateway>,
    config: PlacementConfig,
) -> Arc<AppState<S>> {
    let service = OrderPlacementService::new(store, Arc::new(RandomTrackingIds), payments, config);
    Arc::new(AppState { service })
}

/// Creates the default application state with the in-memory payment gateway.
pub fn create_default_state<S: OrderStore + Clone + 'static>(
    store: S,
    config: PlacementConfig,
) -> Arc<AppState<S>> {
    create_state(store, Arc::new(InMemoryPaymentGateway::new()), config)
}
