use axum::{extract::State, routing::get, Json, Router};

use crate::api::middleware::{
    auth::{AuthenticatedPrincipal, STAFF},
    state::AppState,
};
use crate::api::qrcodes::{views, TokenView};
use crate::error::Result;
use crate::models::{DashboardStats, Principal, Role};

/// Regular users, for the assignment picker.
async fn list_users(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<Vec<Principal>>> {
    principal.require(STAFF)?;
    Ok(Json(state.service.list_principals(Some(Role::User)).await?))
}

async fn dashboard(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<DashboardStats>> {
    principal.require(STAFF)?;
    let stats = state.service.stats().await?;
    Ok(Json(DashboardStats::from(&stats)))
}

async fn activities(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<Vec<TokenView>>> {
    principal.require(STAFF)?;
    Ok(Json(views(state.service.recent_activity().await?)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/admin/users", get(list_users))
        .route("/api/admin/dashboard", get(dashboard))
        .route("/api/admin/activities", get(activities))
}
