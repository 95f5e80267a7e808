use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;

use crate::api::extract::ApiJson;
use crate::api::middleware::{
    auth::{AuthenticatedPrincipal, USERS},
    state::AppState,
};
use crate::api::qrcodes::LocationRequest;
use crate::error::Result;
use crate::models::Principal;
use crate::services::lifecycle::LifecycleError;

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    name: String,
    email: String,
}

/// Adds the calling principal to the directory. Repeat calls return the
/// existing entry unchanged.
async fn register(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiJson(body): ApiJson<RegisterRequest>,
) -> Result<(StatusCode, Json<Principal>)> {
    let (entry, created) = state
        .service
        .register_principal(principal.id, principal.role, &body.name, &body.email)
        .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(entry)))
}

async fn me(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<Principal>> {
    let entry = state
        .service
        .store()
        .find_principal(principal.id)
        .await
        .map_err(LifecycleError::from)?
        .ok_or(LifecycleError::PrincipalNotFound)?;

    Ok(Json(entry))
}

async fn set_default_location(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiJson(body): ApiJson<LocationRequest>,
) -> Result<Json<Principal>> {
    principal.require(USERS)?;

    let entry = state
        .service
        .set_default_location(
            principal.id,
            body.latitude.as_ref(),
            body.longitude.as_ref(),
        )
        .await?;

    Ok(Json(entry))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/principals/me", get(me).post(register))
        .route(
            "/api/principals/me/default-location",
            put(set_default_location),
        )
}
