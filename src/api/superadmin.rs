use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api::extract::{ApiJson, ApiPath};
use crate::api::middleware::{
    auth::{AuthenticatedPrincipal, SUPERADMIN},
    state::AppState,
};
use crate::error::Result;
use crate::models::{principal::UpdatePrincipalData, Principal, SystemStats};

async fn list_users(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<Vec<Principal>>> {
    principal.require(SUPERADMIN)?;
    Ok(Json(state.service.list_principals(None).await?))
}

async fn update_user(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(patch): ApiJson<UpdatePrincipalData>,
) -> Result<Json<Principal>> {
    principal.require(SUPERADMIN)?;
    Ok(Json(state.service.update_principal(id, patch).await?))
}

#[derive(Debug, Serialize)]
struct DeleteUserResponse {
    released_tokens: u64,
}

async fn delete_user(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<DeleteUserResponse>> {
    principal.require(SUPERADMIN)?;
    let released_tokens = state.service.delete_principal(id).await?;
    Ok(Json(DeleteUserResponse { released_tokens }))
}

async fn delete_token(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<StatusCode> {
    principal.require(SUPERADMIN)?;
    state.service.delete_token(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stats(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<SystemStats>> {
    principal.require(SUPERADMIN)?;
    Ok(Json(state.service.stats().await?))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/superadmin/users", get(list_users))
        .route(
            "/api/superadmin/users/:id",
            delete(delete_user).patch(update_user),
        )
        .route("/api/superadmin/qrcodes/:id", delete(delete_token))
        .route("/api/superadmin/stats", get(stats))
}
