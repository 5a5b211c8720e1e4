use crate::llm::ContentPart;

use super::dosing::{PatientProfile, PfStrategy};
use super::service::AnalysisInput;

/// System prompt for the meal-analysis model. Embeds the patient parameters
/// so the explanation can reference them, and pins the output contract the
/// extractor and the narrative patcher depend on: a six-column item table,
/// the macro-total sentences, the dose lines, and the trailing data block.
pub fn system_prompt(profile: &PatientProfile) -> String {
    let strategy = match profile.pf_strategy {
        PfStrategy::ApplyRegularNow => {
            "The protein-fat dose is taken as regular insulin together with the meal."
        }
        PfStrategy::SplitToRapidLater => {
            "The protein-fat dose is taken as rapid insulin 2-3 hours after the meal."
        }
    };
    format!(
        concat!(
            "You are a nutrition assistant for an insulin-dependent diabetic. ",
            "Estimate the macronutrients of the described meal and explain the insulin dosing.\n",
            "Patient parameters: 1 unit of {product} covers {icr} g of carbohydrate (ICR); ",
            "1 unit lowers glucose by {isf} mg/dL (ISF); the glucose target is {target} mg/dL. ",
            "Count {pct}% of protein calories toward the carbohydrate equivalent. {strategy}\n\n",
            "Respond in plain HTML with exactly this structure:\n",
            "1. A <table> of the meal items with columns: Item, Portion, Carbs (g), Protein (g), Fat (g), Calories.\n",
            "2. The sentences \"Protein total: N g\" and \"Fat total: N g\".\n",
            "3. A dosing section with the lines \"Total fast-acting bolus: N U\" and ",
            "\"Regular insulin now: N U\" (or \"Rapid insulin in 2-3 hours: N U\").\n",
            "4. Finally a machine-readable block:\n",
            "<pre class=\"meal-data\">{{\"carbs_g\": 0, \"gross_carbs_g\": 0, \"fiber_g\": 0, ",
            "\"sugar_alcohol_g\": 0, \"protein_fat_equivalent_g\": 0, \"calories_kcal\": 0, ",
            "\"summary\": \"...\"}}</pre>\n",
            "Numbers may use comma decimals. Do not wrap the answer in markdown code fences."
        ),
        product = profile.insulin_product,
        icr = profile.icr_g_per_unit,
        isf = profile.isf_mgdl_per_unit,
        target = profile.target_mgdl,
        pct = profile.protein_pct,
        strategy = strategy,
    )
}

/// User message for one analysis request: the meal description and reading,
/// plus the photo when one was supplied.
pub fn user_parts(input: &AnalysisInput) -> Vec<ContentPart> {
    let mut text = format!(
        "Meal type: {}. Current glucose: {} mg/dL.",
        input.meal_type, input.glucose_mgdl
    );
    if let Some(description) = input.text.as_deref().filter(|t| !t.trim().is_empty()) {
        text.push_str("\nMeal description: ");
        text.push_str(description.trim());
    } else {
        text.push_str("\nEstimate the meal from the attached photo.");
    }

    let mut parts = vec![ContentPart::Text(text)];
    if let Some(url) = &input.image_data_url {
        parts.push(ContentPart::ImageUrl(url.clone()));
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_embeds_patient_parameters() {
        let profile = PatientProfile {
            icr_g_per_unit: 12.0,
            insulin_product: "lispro".into(),
            protein_pct: 50.0,
            ..PatientProfile::default()
        };
        let prompt = system_prompt(&profile);
        assert!(prompt.contains("1 unit of lispro covers 12 g"));
        assert!(prompt.contains("Count 50% of protein calories"));
        assert!(prompt.contains("meal-data"));
    }

    #[test]
    fn user_parts_include_image_when_present() {
        let input = AnalysisInput {
            text: Some("rice and beans".into()),
            image_data_url: Some("data:image/png;base64,AA==".into()),
            glucose_mgdl: 140.0,
            meal_type: "lunch".into(),
            strategy_override: None,
        };
        let parts = user_parts(&input);
        assert_eq!(parts.len(), 2);
        match &parts[0] {
            ContentPart::Text(t) => {
                assert!(t.contains("rice and beans"));
                assert!(t.contains("140"));
            }
            ContentPart::ImageUrl(_) => panic!("first part should be text"),
        }
    }
}
