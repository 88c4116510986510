//! API routes

pub mod analytics;
pub mod health;
pub mod orders;
pub mod payments;
pub mod products;
pub mod refunds;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the combined router
pub fn create_router(state: AppState) -> Router {
    let orders = Router::new()
        .route("/api/orders/ingest", post(orders::ingest))
        .route("/api/orders/{external_ref}", get(orders::get_order))
        .route(
            "/api/orders/{external_ref}/refunds",
            post(refunds::request_refund).get(refunds::list_refunds),
        );

    let products = Router::new()
        .route(
            "/api/products",
            post(products::create_product).get(products::list_products),
        )
        .route("/api/products/{id}", get(products::get_product));

    let payments =
        Router::new().route("/api/payments/callback", post(payments::payment_callback));

    let analytics = Router::new()
        .route("/api/analytics/daily/{date}", get(analytics::daily_kpis))
        .route("/api/analytics/leaderboard", get(analytics::leaderboard));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(orders)
        .merge(products)
        .merge(payments)
        .merge(analytics)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
