use std::time::Duration;

use tracing::{info, warn};

use crate::config::ModelConfig;
use crate::llm::ModelClient;

use super::dosing::{compute_doses, DoseBreakdown, PatientProfile, PfStrategy};
use super::extract::{extract_macros, strip_code_fences, MealExtraction};
use super::narrative::reconcile_narrative;
use super::prompt;

/// Shown instead of the model's explanation when the model could not be
/// reached. The correction dose is still real; the macros are not.
pub const MANUAL_ENTRY_NARRATIVE: &str = concat!(
    "<p>Automatic analysis is unavailable right now. Carbohydrates, protein ",
    "and fat were not estimated; log them manually. The correction dose below ",
    "is computed from your glucose reading and is still valid.</p>"
);

#[derive(Debug, Clone)]
pub struct AnalysisInput {
    pub text: Option<String>,
    pub image_data_url: Option<String>,
    pub glucose_mgdl: f64,
    pub meal_type: String,
    pub strategy_override: Option<PfStrategy>,
}

#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub doses: DoseBreakdown,
    pub narrative: String,
    pub macros: MealExtraction,
    pub summary: String,
    /// True when the model was unreachable and the zero-macro path was taken.
    pub degraded: bool,
}

/// Runs one meal analysis: prompt, bounded model call, macro extraction, dose
/// computation, narrative reconciliation. Model failure of any kind degrades
/// to a manual-entry result instead of propagating; persistence is on the
/// caller.
pub async fn analyze_meal(
    input: &AnalysisInput,
    profile: &PatientProfile,
    model: &dyn ModelClient,
    model_cfg: &ModelConfig,
) -> AnalysisOutcome {
    let mut profile = profile.clone().sanitized();
    if let Some(strategy) = input.strategy_override {
        profile.pf_strategy = strategy;
    }

    let system = prompt::system_prompt(&profile);
    let parts = prompt::user_parts(input);
    let deadline = if input.image_data_url.is_some() {
        Duration::from_secs(model_cfg.image_timeout_secs)
    } else {
        Duration::from_secs(model_cfg.text_timeout_secs)
    };

    let raw = match tokio::time::timeout(deadline, model.complete(&system, &parts)).await {
        Ok(Ok(raw)) => Some(raw),
        Ok(Err(e)) => {
            warn!(error = %e, "model call failed; degrading to manual entry");
            None
        }
        Err(_) => {
            warn!(deadline_secs = deadline.as_secs(), "model call deadline exceeded");
            None
        }
    };

    let fallback_summary = input
        .text
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("{} (photo)", input.meal_type));

    match raw {
        Some(raw) => {
            let cleaned = strip_code_fences(&raw);
            let macros = extract_macros(&cleaned, &fallback_summary);
            let doses = compute_doses(&macros, input.glucose_mgdl, &profile);
            let narrative = reconcile_narrative(&cleaned, &doses, &profile);
            info!(
                carbs_g = macros.carbs_g,
                fast_total = doses.fast_total_units,
                regular = doses.deferred_or_regular_units,
                "meal analysis complete"
            );
            AnalysisOutcome {
                summary: macros.summary.clone(),
                doses,
                narrative,
                macros,
                degraded: false,
            }
        }
        None => {
            let macros = MealExtraction {
                summary: fallback_summary.clone(),
                ..MealExtraction::default()
            };
            let doses = compute_doses(&macros, input.glucose_mgdl, &profile);
            AnalysisOutcome {
                doses,
                narrative: MANUAL_ENTRY_NARRATIVE.to_string(),
                macros,
                summary: fallback_summary,
                degraded: true,
            }
        }
    }
}
