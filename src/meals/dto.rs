use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

#[derive(Debug, Serialize)]
pub struct MealListItem {
    pub id: Uuid,
    pub logged_at: OffsetDateTime,
    pub meal_type: String,
    pub description: String,
    pub glucose_mgdl: f64,
    pub carbs_g: f64,
    pub fast_total_units: i64,
    pub regular_units: i64,
    pub has_photo: bool,
}

#[derive(Debug, Serialize)]
pub struct MealDetails {
    pub id: Uuid,
    pub logged_at: OffsetDateTime,
    pub meal_type: String,
    pub description: String,
    pub glucose_mgdl: f64,
    pub carbs_g: f64,
    pub protein_fat_equivalent_g: f64,
    pub fast_total_units: i64,
    pub regular_units: i64,
    pub narrative: Option<String>,
    pub photo_url: Option<String>,
}
