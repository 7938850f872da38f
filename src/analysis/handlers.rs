use axum::{
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    auth::AuthUser,
    entitlement::{gate, Remaining, TierLimit},
    error::ApiFailure,
    state::AppState,
    vision::FoodAnalysisResult,
};

use super::dto::{AnalyzeRequest, EntitlementResponse};
use super::service;

// --- public routers ---

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/entitlement", get(get_entitlement))
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

// --- handlers ---

/// POST /analyze { image_b64 }
#[instrument(skip(state, body))]
pub async fn analyze(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<AnalyzeRequest>,
) -> Result<Json<FoodAnalysisResult>, ApiFailure> {
    let image = BASE64
        .decode(body.image_b64)
        .map_err(|_| ApiFailure::bad_request("image_b64 is not valid base64"))?;
    if image.is_empty() {
        return Err(ApiFailure::bad_request("image_b64 is required"));
    }

    let result = service::analyze_photo(
        &state,
        user_id,
        Bytes::from(image),
        CancellationToken::new(),
    )
    .await
    .map_err(ApiFailure::from)?;

    Ok(Json(result))
}

/// GET /entitlement
#[instrument(skip(state))]
pub async fn get_entitlement(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<EntitlementResponse>, ApiFailure> {
    let (entitlement, remaining) = service::remaining_scans(&state, user_id)
        .await
        .map_err(ApiFailure::from)?;

    let response = match remaining {
        Remaining::Unlimited => EntitlementResponse {
            remaining: None,
            limit: None,
            window_resets_at: None,
        },
        Remaining::Scans(n) => EntitlementResponse {
            remaining: Some(n),
            limit: match entitlement.tier_limit {
                TierLimit::Limited(limit) => Some(limit),
                TierLimit::Unlimited => None,
            },
            window_resets_at: Some(gate::window_resets_at(entitlement)),
        },
    };
    Ok(Json(response))
}
