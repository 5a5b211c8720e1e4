use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::dosing::{DoseBreakdown, PfStrategy};
use super::extract::MealExtraction;

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    pub text: Option<String>,
    /// Raw photo bytes; mutually optional with `text`, at least one required.
    pub image: Option<serde_bytes::ByteBuf>,
    pub content_type: Option<String>,
    pub glucose_mgdl: f64,
    pub meal_type: String,
    #[serde(default)]
    pub strategy: Option<PfStrategy>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub id: Uuid,
    pub created_at: OffsetDateTime,
    pub doses: DoseBreakdown,
    pub macros: MealExtraction,
    pub summary: String,
    pub narrative: String,
    pub degraded: bool,
}
