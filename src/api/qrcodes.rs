use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::extract::{ApiJson, ApiPath};
use crate::api::middleware::{
    auth::{AuthenticatedPrincipal, STAFF, USERS},
    state::AppState,
};
use crate::error::{AppError, Result};
use crate::models::{GeoPoint, HistoryEntry, TokenRecord};
use crate::services::coordinates::RawCoordinate;
use crate::services::lifecycle::{LifecycleError, ScanInput};
use crate::services::qr_generator;

/// JSON shape of a token record.
#[derive(Debug, Serialize)]
pub struct TokenView {
    pub id: Uuid,
    pub token: String,
    pub image_artifact: String,
    pub is_active: bool,
    pub owner_id: Option<Uuid>,
    pub is_tracking: bool,
    pub issuer_id: Uuid,
    pub current_location: Option<GeoPoint>,
    pub last_tracked_at: Option<DateTime<Utc>>,
    pub location_history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TokenRecord> for TokenView {
    fn from(record: TokenRecord) -> Self {
        Self {
            owner_id: record.owner(),
            is_tracking: record.is_tracking(),
            id: record.id,
            token: record.token.into(),
            image_artifact: record.image_artifact,
            is_active: record.active,
            issuer_id: record.issuer,
            current_location: record.current_location,
            last_tracked_at: record.last_tracked_at,
            location_history: record.history,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

pub(crate) fn views(records: Vec<TokenRecord>) -> Vec<TokenView> {
    records.into_iter().map(TokenView::from).collect()
}

/// A batch size as clients send it: a JSON number or a numeric string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawCount {
    Number(f64),
    Text(String),
    Other(serde_json::Value),
}

impl RawCount {
    /// `None` unless the value is a whole number.
    fn to_i64(&self) -> Option<i64> {
        match self {
            RawCount::Number(n) if n.fract() == 0.0 => Some(*n as i64),
            RawCount::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateRequest {
    count: Option<RawCount>,
}

#[derive(Debug, Serialize)]
struct GenerateResponse {
    message: String,
    qr_codes: Vec<TokenView>,
}

async fn generate(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiJson(body): ApiJson<GenerateRequest>,
) -> Result<(StatusCode, Json<GenerateResponse>)> {
    principal.require(STAFF)?;

    let count = body
        .count
        .as_ref()
        .and_then(RawCount::to_i64)
        .ok_or(LifecycleError::InvalidCount(0))?;
    let records = state.service.generate_batch(count, principal.id).await?;

    Ok((
        StatusCode::CREATED,
        Json(GenerateResponse {
            message: format!("{} QR codes generated", records.len()),
            qr_codes: views(records),
        }),
    ))
}

async fn list_all(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<Vec<TokenView>>> {
    principal.require(STAFF)?;
    Ok(Json(views(state.service.list_tokens().await?)))
}

async fn list_mine(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
) -> Result<Json<Vec<TokenView>>> {
    principal.require(USERS)?;
    Ok(Json(views(state.service.list_owned(principal.id).await?)))
}

async fn toggle_active(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<TokenView>> {
    principal.require(STAFF)?;
    Ok(Json(state.service.toggle_active(id).await?.into()))
}

#[derive(Debug, Deserialize)]
struct AssignRequest {
    user_id: Uuid,
}

async fn assign(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<AssignRequest>,
) -> Result<Json<TokenView>> {
    principal.require(STAFF)?;
    Ok(Json(state.service.assign(id, body.user_id).await?.into()))
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    code: Option<String>,
    /// Base64 image, optionally as a `data:` URL.
    image: Option<String>,
}

#[derive(Debug, Serialize)]
struct ScanResponse {
    claimed: bool,
    qr_code: TokenView,
}

fn decode_upload(image: &str) -> Result<Vec<u8>> {
    let encoded = match image.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => image,
    };

    STANDARD
        .decode(encoded.trim())
        .map_err(|_| AppError::Validation("Image must be base64 encoded".to_string()))
}

async fn scan(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiJson(body): ApiJson<ScanRequest>,
) -> Result<Json<ScanResponse>> {
    principal.require(USERS)?;

    let image = body.image.as_deref().map(decode_upload).transpose()?;
    let input = ScanInput::from_parts(body.code, image)?;
    let outcome = state.service.resolve_scan(input, principal.id).await?;

    Ok(Json(ScanResponse {
        claimed: outcome.claimed,
        qr_code: outcome.record.into(),
    }))
}

#[derive(Debug, Deserialize)]
pub(crate) struct LocationRequest {
    pub latitude: Option<RawCoordinate>,
    pub longitude: Option<RawCoordinate>,
}

async fn update_location(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<LocationRequest>,
) -> Result<Json<TokenView>> {
    principal.require(USERS)?;

    let record = state
        .service
        .update_location(
            id,
            principal.id,
            body.latitude.as_ref(),
            body.longitude.as_ref(),
        )
        .await?;

    Ok(Json(record.into()))
}

async fn toggle_tracking(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<TokenView>> {
    principal.require(USERS)?;
    Ok(Json(
        state.service.toggle_tracking(id, principal.id).await?.into(),
    ))
}

/// SVG download, for staff or the token's owner.
async fn qr_svg(
    State(state): State<AppState>,
    principal: AuthenticatedPrincipal,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Response> {
    let record = state.service.get(id).await?;

    if !principal.is_staff() && !record.is_owned_by(principal.id) {
        return Err(AppError::Forbidden);
    }

    let svg = qr_generator::generate_qr_svg(&record.token).map_err(LifecycleError::from)?;

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

pub fn router(scan_body_limit: usize) -> Router<AppState> {
    Router::new()
        .route("/api/qrcodes", get(list_all))
        .route("/api/qrcodes/generate", post(generate))
        .route("/api/qrcodes/mine", get(list_mine))
        .route(
            "/api/qrcodes/scan",
            post(scan).layer(DefaultBodyLimit::max(scan_body_limit)),
        )
        .route("/api/qrcodes/:id/toggle-active", patch(toggle_active))
        .route("/api/qrcodes/:id/assign", post(assign))
        .route("/api/qrcodes/:id/location", patch(update_location))
        .route("/api/qrcodes/:id/toggle-tracking", patch(toggle_tracking))
        .route("/api/qrcodes/:id/qr.svg", get(qr_svg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_upload_accepts_data_urls() {
        let encoded = STANDARD.encode(b"png bytes");
        assert_eq!(decode_upload(&encoded).unwrap(), b"png bytes");
        assert_eq!(
            decode_upload(&format!("data:image/png;base64,{}", encoded)).unwrap(),
            b"png bytes"
        );
        assert!(matches!(
            decode_upload("***"),
            Err(AppError::Validation(_))
        ));
    }

    fn count_of(body: &str) -> Option<i64> {
        serde_json::from_str::<GenerateRequest>(body)
            .unwrap()
            .count
            .as_ref()
            .and_then(RawCount::to_i64)
    }

    #[test]
    fn test_count_accepts_whole_numbers_and_numeric_strings() {
        assert_eq!(count_of(r#"{"count":5}"#), Some(5));
        assert_eq!(count_of(r#"{"count":5.0}"#), Some(5));
        assert_eq!(count_of(r#"{"count":" 12 "}"#), Some(12));
        assert_eq!(count_of(r#"{"count":-3}"#), Some(-3));

        assert_eq!(count_of(r#"{}"#), None);
        assert_eq!(count_of(r#"{"count":null}"#), None);
        assert_eq!(count_of(r#"{"count":2.5}"#), None);
        assert_eq!(count_of(r#"{"count":"ten"}"#), None);
        assert_eq!(count_of(r#"{"count":true}"#), None);
        assert_eq!(count_of(r#"{"count":[5]}"#), None);
    }
}
