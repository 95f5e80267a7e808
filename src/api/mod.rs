// API module - HTTP endpoints

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod admin;
pub mod extract;
pub mod health;
pub mod middleware;
pub mod principals;
pub mod qrcodes;
pub mod superadmin;

use middleware::state::AppState;

/// The full application router with state attached.
pub fn app(state: AppState) -> Router {
    let scan_body_limit = state.config.scan_body_limit();

    Router::new()
        .merge(health::router())
        .merge(qrcodes::router(scan_body_limit))
        .merge(principals::router())
        .merge(admin::router())
        .merge(superadmin::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
