use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use base64::Engine;
use bytes::Bytes;
use tracing::{error, instrument};
use uuid::Uuid;

use crate::{auth::AuthUser, meals, profile, state::AppState, storage::ext_from_mime};

use super::dto::{AnalyzeRequest, AnalyzeResponse};
use super::service::{analyze_meal, AnalysisInput};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(20 * 1024 * 1024)) // 20MB
}

/// POST /analyze: model-assisted estimate plus dose computation, persisted as
/// one meal-log entry. The analysis itself cannot fail; only storage errors
/// surface.
#[instrument(skip(state, body))]
pub async fn analyze(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<AnalyzeRequest>,
) -> Result<(StatusCode, Json<AnalyzeResponse>), (StatusCode, String)> {
    let has_text = body.text.as_deref().is_some_and(|t| !t.trim().is_empty());
    if !has_text && body.image.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            "text or image is required".into(),
        ));
    }
    if !body.glucose_mgdl.is_finite() || body.glucose_mgdl <= 0.0 {
        return Err((
            StatusCode::BAD_REQUEST,
            "glucose_mgdl must be positive".into(),
        ));
    }
    if body.meal_type.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "meal_type is required".into()));
    }

    // Upload the photo first so the log entry can reference it even when the
    // model path degrades.
    let mut photo_key = None;
    let mut image_data_url = None;
    if let Some(image) = &body.image {
        let ct = body.content_type.as_deref().unwrap_or("image/jpeg");
        let ext = ext_from_mime(ct).unwrap_or("bin");
        let key = format!("meals/{}/{}.{}", user_id, Uuid::new_v4(), ext);
        state
            .storage
            .put_object(&key, Bytes::from(image.clone().into_vec()), ct)
            .await
            .map_err(internal)?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(image.as_ref());
        image_data_url = Some(format!("data:{ct};base64,{encoded}"));
        photo_key = Some(key);
    }

    let patient = profile::repo::get_or_default(&state.db, user_id)
        .await
        .map_err(internal)?;

    let input = AnalysisInput {
        text: body.text.clone(),
        image_data_url,
        glucose_mgdl: body.glucose_mgdl,
        meal_type: body.meal_type.trim().to_string(),
        strategy_override: body.strategy,
    };
    let outcome = analyze_meal(&input, &patient, state.model.as_ref(), &state.config.model).await;

    let entry = meals::repo::NewLogEntry {
        user_id,
        meal_type: input.meal_type.clone(),
        description: outcome.summary.clone(),
        glucose_mgdl: body.glucose_mgdl,
        carbs_g: outcome.macros.carbs_g,
        protein_fat_equivalent_g: outcome.doses.protein_fat_equivalent_g,
        fast_total_units: outcome.doses.fast_total_units,
        regular_units: outcome.doses.deferred_or_regular_units,
        narrative: Some(outcome.narrative.clone()),
        photo_key,
    };
    let saved = meals::repo::append(&state.db, &entry).await.map_err(|e| {
        error!(error = %e, %user_id, "meal_log append failed");
        internal_msg("could not save the meal log entry")
    })?;

    Ok((
        StatusCode::CREATED,
        Json(AnalyzeResponse {
            id: saved.id,
            created_at: saved.logged_at,
            doses: outcome.doses,
            macros: outcome.macros,
            summary: outcome.summary,
            narrative: outcome.narrative,
            degraded: outcome.degraded,
        }),
    ))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn internal_msg(msg: &str) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, msg.to_string())
}
