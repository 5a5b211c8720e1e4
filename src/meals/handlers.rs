use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect},
    routing::get,
    Json, Router,
};
use tracing::{error, instrument, warn};
use uuid::Uuid;

use crate::{auth::AuthUser, state::AppState};

use super::dto::{MealDetails, MealListItem, Pagination};
use super::repo;

const PHOTO_URL_TTL_SECS: u64 = 600;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/meals", get(list_meals))
        .route("/meals/:id", get(get_meal).delete(delete_meal))
        .route("/meals/:id/photo", get(get_photo))
}

#[instrument(skip(state))]
pub async fn list_meals(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<MealListItem>>, (StatusCode, String)> {
    let entries = repo::list_by_user(&state.db, user_id, p.limit.clamp(1, 100), p.offset.max(0))
        .await
        .map_err(internal)?;
    let items = entries
        .into_iter()
        .map(|e| MealListItem {
            id: e.id,
            logged_at: e.logged_at,
            meal_type: e.meal_type,
            description: e.description,
            glucose_mgdl: e.glucose_mgdl,
            carbs_g: e.carbs_g,
            fast_total_units: e.fast_total_units,
            regular_units: e.regular_units,
            has_photo: e.photo_key.is_some(),
        })
        .collect();
    Ok(Json(items))
}

#[instrument(skip(state))]
pub async fn get_meal(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<MealDetails>, (StatusCode, String)> {
    let entry = repo::get_owned(&state.db, user_id, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Meal not found".to_string()))?;

    let photo_url = match &entry.photo_key {
        Some(key) => match state.storage.presign_get(key, PHOTO_URL_TTL_SECS).await {
            Ok(url) => Some(url),
            Err(e) => {
                // Entry is still useful without the photo link.
                warn!(error = %e, %id, "presign failed");
                None
            }
        },
        None => None,
    };

    Ok(Json(MealDetails {
        id: entry.id,
        logged_at: entry.logged_at,
        meal_type: entry.meal_type,
        description: entry.description,
        glucose_mgdl: entry.glucose_mgdl,
        carbs_g: entry.carbs_g,
        protein_fat_equivalent_g: entry.protein_fat_equivalent_g,
        fast_total_units: entry.fast_total_units,
        regular_units: entry.regular_units,
        narrative: entry.narrative,
        photo_url,
    }))
}

#[instrument(skip(state))]
pub async fn delete_meal(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let entry = repo::get_owned(&state.db, user_id, id)
        .await
        .map_err(internal)?
        .ok_or((StatusCode::NOT_FOUND, "Meal not found".to_string()))?;

    let deleted = repo::delete_owned(&state.db, user_id, id)
        .await
        .map_err(internal)?;
    if !deleted {
        return Err((StatusCode::NOT_FOUND, "Meal not found".into()));
    }

    // Photo cleanup is best effort.
    if let Some(key) = &entry.photo_key {
        if let Err(e) = state.storage.delete_object(key).await {
            warn!(error = %e, %id, "photo cleanup failed");
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

/// 302 to a presigned URL for the entry's photo.
#[instrument(skip(state))]
pub async fn get_photo(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let entry = match repo::get_owned(&state.db, user_id, id).await {
        Ok(Some(e)) => e,
        Ok(None) => return (StatusCode::NOT_FOUND, "Meal not found").into_response(),
        Err(e) => {
            error!(error = %e, %id, "get_photo lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    };

    let Some(key) = entry.photo_key else {
        return (StatusCode::NOT_FOUND, "No photo for this meal").into_response();
    };

    match state.storage.presign_get(&key, PHOTO_URL_TTL_SECS).await {
        Ok(url) => Redirect::temporary(&url).into_response(),
        Err(e) => {
            error!(error = %e, %id, "presign failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "presign failed").into_response()
        }
    }
}

fn internal<E: std::fmt::Display>(e: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
