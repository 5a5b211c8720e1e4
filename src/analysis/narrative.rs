use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use super::dosing::{round1, DoseBreakdown, PatientProfile, PfStrategy};

// The model's free-text arithmetic is untrusted: these routines overwrite the
// few numeric fields the UI reads with the calculator's output, leaving the
// rest of the markup exactly as generated. A missing anchor means that part
// stays as-is; a wrong number on screen beats a failed analysis.

lazy_static! {
    // Every shape the protein-fat breakdown section has had. All of them are
    // removed before the canonical block is inserted, so reconciliation can
    // never leave two contradictory sections behind.
    static ref BREAKDOWN_VARIANTS: [Regex; 3] = [
        Regex::new(r#"(?is)<div class="pf-breakdown">.*?</div>\n?"#).unwrap(),
        Regex::new(r#"(?is)<section[^>]*protein[- ]fat[^>]*>.*?</section>\n?"#).unwrap(),
        Regex::new(r"(?is)<h4>\s*protein\s*(\+|and)\s*fat[^<]*</h4>\s*(<p>.*?</p>)?\n?").unwrap(),
    ];
    static ref TOTAL_LINE_RE: Regex =
        Regex::new(r"(?i)(total fast-acting bolus:\s*)[\d.,]+(\s*U)").unwrap();
    static ref REGULAR_LINE_RE: Regex = Regex::new(
        r"(?i)(regular insulin( now)?|rapid insulin in 2\s*(-|to)\s*3 hours):\s*[\d.,]+\s*U"
    )
    .unwrap();
    static ref DATA_BLOCK_RE: Regex =
        Regex::new(r#"(?s)(<pre class="meal-data">\s*)(\{.*?\})(\s*</pre>)"#).unwrap();
}

/// Rewrites the dose fields of a model-generated explanation with the
/// authoritative `DoseBreakdown`. Idempotent; unknown markup passes through.
pub fn reconcile_narrative(
    markup: &str,
    doses: &DoseBreakdown,
    profile: &PatientProfile,
) -> String {
    let mut out = strip_breakdown_variants(markup);
    out = insert_breakdown(&out, doses, profile);
    out = patch_total_line(&out, doses);
    out = patch_regular_line(&out, doses, profile);
    patch_data_block(&out, doses)
}

fn strip_breakdown_variants(markup: &str) -> String {
    let mut out = markup.to_string();
    for re in BREAKDOWN_VARIANTS.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    out
}

fn canonical_breakdown(doses: &DoseBreakdown, profile: &PatientProfile) -> String {
    let timing = match profile.pf_strategy {
        PfStrategy::ApplyRegularNow => "as regular insulin with the meal",
        PfStrategy::SplitToRapidLater => "as rapid insulin in 2-3 hours",
    };
    format!(
        "<div class=\"pf-breakdown\"><h4>Protein + fat</h4><p>Equivalent carbs: {:.1} g, dose: {:.1} U, taken {}.</p></div>\n",
        round1(doses.protein_fat_equivalent_g),
        round1(doses.protein_fat_dose_units),
        timing
    )
}

/// The canonical block goes right before the trailing data block when one is
/// present, otherwise at the end of the document.
fn insert_breakdown(markup: &str, doses: &DoseBreakdown, profile: &PatientProfile) -> String {
    let block = canonical_breakdown(doses, profile);
    match markup.rfind("<pre class=\"meal-data\">") {
        Some(pos) => {
            let mut out = markup.to_string();
            out.insert_str(pos, &block);
            out
        }
        None => format!("{markup}{block}"),
    }
}

fn patch_total_line(markup: &str, doses: &DoseBreakdown) -> String {
    TOTAL_LINE_RE
        .replace(markup, |caps: &regex::Captures<'_>| {
            format!("{}{}{}", &caps[1], doses.fast_total_units, &caps[2])
        })
        .into_owned()
}

fn patch_regular_line(
    markup: &str,
    doses: &DoseBreakdown,
    profile: &PatientProfile,
) -> String {
    let replacement = match profile.pf_strategy {
        PfStrategy::ApplyRegularNow => format!(
            "Regular insulin now: {} U",
            doses.deferred_or_regular_units
        ),
        PfStrategy::SplitToRapidLater => format!(
            "Rapid insulin in 2-3 hours: {} U",
            doses.deferred_or_regular_units
        ),
    };
    REGULAR_LINE_RE
        .replace(markup, replacement.as_str())
        .into_owned()
}

/// Keeps the persisted structured fields in step with the displayed numbers.
/// Whatever else the model put in the block is preserved.
fn patch_data_block(markup: &str, doses: &DoseBreakdown) -> String {
    DATA_BLOCK_RE
        .replace(markup, |caps: &regex::Captures<'_>| {
            let patched = match serde_json::from_str::<Map<String, Value>>(&caps[2]) {
                Ok(mut map) => {
                    for stale in ["pf_equivalent_g", "equivalent_carbs_g"] {
                        map.remove(stale);
                    }
                    map.insert(
                        "protein_fat_equivalent_g".into(),
                        json_f64(round1(doses.protein_fat_equivalent_g)),
                    );
                    map.insert(
                        "fast_total_units".into(),
                        Value::from(doses.fast_total_units),
                    );
                    map.insert(
                        "regular_units".into(),
                        Value::from(doses.deferred_or_regular_units),
                    );
                    serde_json::to_string(&map).unwrap_or_else(|_| caps[2].to_string())
                }
                Err(_) => caps[2].to_string(),
            };
            format!("{}{}{}", &caps[1], patched, &caps[3])
        })
        .into_owned()
}

fn json_f64(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::dosing::{compute_doses, PatientProfile};
    use crate::analysis::extract::MealExtraction;

    fn doses() -> DoseBreakdown {
        let ext = MealExtraction {
            carbs_g: 60.0,
            protein_g: 30.0,
            fat_g: 20.0,
            ..MealExtraction::default()
        };
        compute_doses(&ext, 180.0, &PatientProfile::default())
    }

    fn sample_markup() -> String {
        concat!(
            "<h3>Analysis</h3>",
            "<p>Total fast-acting bolus: 11 U</p>\n",
            "<p>Regular insulin now: 3 U</p>\n",
            "<section class=\"protein-fat\"><p>model arithmetic: 9 g, 0.9 U</p></section>\n",
            "<pre class=\"meal-data\">{\"carbs_g\": 60, \"pf_equivalent_g\": 9}</pre>"
        )
        .to_string()
    }

    #[test]
    fn rewrites_the_known_dose_lines() {
        let profile = PatientProfile::default();
        let out = reconcile_narrative(&sample_markup(), &doses(), &profile);
        assert!(out.contains("Total fast-acting bolus: 8 U"));
        assert!(out.contains("Regular insulin now: 1 U"));
    }

    #[test]
    fn exactly_one_breakdown_block_survives() {
        let profile = PatientProfile::default();
        let out = reconcile_narrative(&sample_markup(), &doses(), &profile);
        assert_eq!(out.matches("pf-breakdown").count(), 1);
        assert!(!out.contains("model arithmetic"));
        assert!(out.contains("Equivalent carbs: 13.8 g"));
        assert!(out.contains("dose: 1.4 U"));
    }

    #[test]
    fn data_block_carries_authoritative_figures() {
        let profile = PatientProfile::default();
        let out = reconcile_narrative(&sample_markup(), &doses(), &profile);
        assert!(out.contains("\"protein_fat_equivalent_g\":13.8"));
        assert!(out.contains("\"fast_total_units\":8"));
        assert!(out.contains("\"carbs_g\":60"));
        assert!(!out.contains("pf_equivalent_g"));
    }

    #[test]
    fn idempotent_under_reapplication() {
        let profile = PatientProfile::default();
        let d = doses();
        let once = reconcile_narrative(&sample_markup(), &d, &profile);
        let twice = reconcile_narrative(&once, &d, &profile);
        assert_eq!(once, twice);
    }

    #[test]
    fn deferred_strategy_changes_the_wording_only() {
        let profile = PatientProfile {
            pf_strategy: PfStrategy::SplitToRapidLater,
            ..PatientProfile::default()
        };
        let out = reconcile_narrative(&sample_markup(), &doses(), &profile);
        assert!(out.contains("Rapid insulin in 2-3 hours: 1 U"));
        assert!(out.contains("taken as rapid insulin in 2-3 hours."));
    }

    #[test]
    fn missing_anchors_leave_markup_untouched() {
        let profile = PatientProfile::default();
        let plain = "<p>No recognizable structure here.</p>";
        let out = reconcile_narrative(plain, &doses(), &profile);
        // Only the canonical breakdown is appended; the original text stays.
        assert!(out.starts_with(plain));
        assert_eq!(out.matches("pf-breakdown").count(), 1);
    }

    #[test]
    fn malformed_data_block_is_left_alone() {
        let profile = PatientProfile::default();
        let markup = "<pre class=\"meal-data\">{broken json}</pre>";
        let out = reconcile_narrative(markup, &doses(), &profile);
        assert!(out.contains("{broken json}"));
    }
}
