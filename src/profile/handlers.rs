use axum::{
    extract::State,
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::analysis::dosing::{PatientProfile, PfStrategy};
use crate::{auth::AuthUser, state::AppState};

use super::repo;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/settings", get(get_settings).put(put_settings))
}

/// Partial update: absent fields keep their current (or default) values.
#[derive(Debug, Deserialize)]
pub struct SettingsPayload {
    pub icr_g_per_unit: Option<f64>,
    pub isf_mgdl_per_unit: Option<f64>,
    pub target_mgdl: Option<f64>,
    pub insulin_product: Option<String>,
    pub pf_strategy: Option<PfStrategy>,
    pub protein_pct: Option<f64>,
}

#[instrument(skip(state))]
pub async fn get_settings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<PatientProfile>, (StatusCode, String)> {
    let profile = repo::get_or_default(&state.db, user_id)
        .await
        .map_err(internal)?;
    Ok(Json(profile))
}

#[instrument(skip(state, payload))]
pub async fn put_settings(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<SettingsPayload>,
) -> Result<Json<PatientProfile>, (StatusCode, String)> {
    let current = repo::get_or_default(&state.db, user_id)
        .await
        .map_err(internal)?;

    let merged = PatientProfile {
        icr_g_per_unit: payload.icr_g_per_unit.unwrap_or(current.icr_g_per_unit),
        isf_mgdl_per_unit: payload
            .isf_mgdl_per_unit
            .unwrap_or(current.isf_mgdl_per_unit),
        target_mgdl: payload.target_mgdl.unwrap_or(current.target_mgdl),
        insulin_product: payload.insulin_product.unwrap_or(current.insulin_product),
        pf_strategy: payload.pf_strategy.unwrap_or(current.pf_strategy),
        protein_pct: payload.protein_pct.unwrap_or(current.protein_pct),
    }
    .sanitized();

    repo::upsert(&state.db, user_id, &merged)
        .await
        .map_err(internal)?;
    info!(%user_id, "patient settings updated");
    Ok(Json(merged))
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
