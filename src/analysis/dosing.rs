use serde::{Deserialize, Serialize};

use super::extract::MealExtraction;

// Substitutes for missing or unusable patient settings. Applied once, in
// `PatientProfile::sanitized`, never inside the formulas.
pub const DEFAULT_ICR_G_PER_UNIT: f64 = 10.0;
pub const DEFAULT_ISF_MGDL_PER_UNIT: f64 = 50.0;
pub const DEFAULT_TARGET_MGDL: f64 = 100.0;
pub const DEFAULT_PROTEIN_PCT: f64 = 100.0;
pub const DEFAULT_INSULIN_PRODUCT: &str = "fast-acting insulin";

/// How the protein-fat dose is presented: as regular insulin with the meal,
/// or as rapid insulin 2-3 hours later. Either way the dose itself is always
/// computed; no reminder is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PfStrategy {
    ApplyRegularNow,
    SplitToRapidLater,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientProfile {
    /// Grams of carbohydrate offset by one unit (ICR).
    pub icr_g_per_unit: f64,
    /// mg/dL glucose drop per unit (ISF).
    pub isf_mgdl_per_unit: f64,
    pub target_mgdl: f64,
    pub insulin_product: String,
    pub pf_strategy: PfStrategy,
    /// Percentage of protein calories counted toward equivalent carbs, 0-100.
    pub protein_pct: f64,
}

impl Default for PatientProfile {
    fn default() -> Self {
        Self {
            icr_g_per_unit: DEFAULT_ICR_G_PER_UNIT,
            isf_mgdl_per_unit: DEFAULT_ISF_MGDL_PER_UNIT,
            target_mgdl: DEFAULT_TARGET_MGDL,
            insulin_product: DEFAULT_INSULIN_PRODUCT.to_string(),
            pf_strategy: PfStrategy::ApplyRegularNow,
            protein_pct: DEFAULT_PROTEIN_PCT,
        }
    }
}

impl PatientProfile {
    /// Replaces values the dose formulas cannot divide by with the documented
    /// defaults and clamps the protein percentage into range. Every profile
    /// crossing into the analysis pipeline goes through here.
    pub fn sanitized(mut self) -> Self {
        if !self.icr_g_per_unit.is_finite() || self.icr_g_per_unit <= 0.0 {
            self.icr_g_per_unit = DEFAULT_ICR_G_PER_UNIT;
        }
        if !self.isf_mgdl_per_unit.is_finite() || self.isf_mgdl_per_unit <= 0.0 {
            self.isf_mgdl_per_unit = DEFAULT_ISF_MGDL_PER_UNIT;
        }
        if !self.target_mgdl.is_finite() || self.target_mgdl <= 0.0 {
            self.target_mgdl = DEFAULT_TARGET_MGDL;
        }
        if !self.protein_pct.is_finite() {
            self.protein_pct = DEFAULT_PROTEIN_PCT;
        }
        self.protein_pct = self.protein_pct.clamp(0.0, 100.0);
        if self.insulin_product.trim().is_empty() {
            self.insulin_product = DEFAULT_INSULIN_PRODUCT.to_string();
        }
        self
    }
}

/// Protein/fat to carbohydrate-equivalent conversion. The rule changed twice
/// before settling on `KcalSplitTen`; the older variants are retained only to
/// compare against log entries written while they were live. Persisted
/// equivalents are never recomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PfConversion {
    /// First revision: flat 10% of combined grams.
    FlatFraction,
    /// Second revision: both macro kcal totals divided by 4.
    KcalSplitFour,
    /// Current rule: protein kcal scaled by the profile percentage, fat fixed
    /// at 10% of its kcal, the sum divided by 10.
    KcalSplitTen,
}

impl PfConversion {
    pub const CANONICAL: Self = Self::KcalSplitTen;

    pub fn equivalent_g(self, protein_g: f64, fat_g: f64, protein_pct: f64) -> f64 {
        match self {
            Self::FlatFraction => (protein_g + fat_g) * 0.10,
            Self::KcalSplitFour => (protein_g * 4.0 + fat_g * 9.0) / 4.0,
            Self::KcalSplitTen => {
                (protein_g * 4.0 * protein_pct / 100.0 + fat_g * 9.0 * 0.10) / 10.0
            }
        }
    }
}

/// Authoritative dose figures. Unit fields are half-up rounded for display;
/// the per-component doses stay unrounded and are formatted to one decimal
/// only when rendered into the narrative.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DoseBreakdown {
    pub carb_dose_units: f64,
    pub correction_dose_units: f64,
    pub protein_fat_equivalent_g: f64,
    pub protein_fat_dose_units: f64,
    pub fast_total_units: i64,
    pub deferred_or_regular_units: i64,
}

/// One decimal, for narrative display of intermediate quantities.
pub fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Pure dose computation. `profile` must already be sanitized; the divisions
/// below assume positive ICR/ISF.
pub fn compute_doses(
    extraction: &MealExtraction,
    glucose_mgdl: f64,
    profile: &PatientProfile,
) -> DoseBreakdown {
    let carb_dose = extraction.carbs_g / profile.icr_g_per_unit;
    let correction =
        ((glucose_mgdl - profile.target_mgdl) / profile.isf_mgdl_per_unit).max(0.0);

    // The model's own equivalent figure wins only when it is actually usable;
    // otherwise recompute from the recovered macros.
    let equivalent_g = if extraction.reported_equivalent_g > 0.0 {
        extraction.reported_equivalent_g
    } else {
        PfConversion::CANONICAL.equivalent_g(
            extraction.protein_g,
            extraction.fat_g,
            profile.protein_pct,
        )
    };
    let pf_dose = equivalent_g / profile.icr_g_per_unit;

    DoseBreakdown {
        carb_dose_units: carb_dose,
        correction_dose_units: correction,
        protein_fat_equivalent_g: equivalent_g,
        protein_fat_dose_units: pf_dose,
        fast_total_units: (carb_dose + correction).round() as i64,
        deferred_or_regular_units: pf_dose.round() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extraction(carbs: f64, protein: f64, fat: f64) -> MealExtraction {
        MealExtraction {
            carbs_g: carbs,
            protein_g: protein,
            fat_g: fat,
            ..MealExtraction::default()
        }
    }

    #[test]
    fn canonical_conversion_matches_hand_computation() {
        // (20*4*0.5 + 10*9*0.10) / 10 = (40 + 9) / 10
        let eq = PfConversion::CANONICAL.equivalent_g(20.0, 10.0, 50.0);
        assert!((eq - 4.9).abs() < 1e-9);
    }

    #[test]
    fn historical_variants_differ_from_canonical() {
        assert!((PfConversion::FlatFraction.equivalent_g(20.0, 10.0, 50.0) - 3.0).abs() < 1e-9);
        assert!(
            (PfConversion::KcalSplitFour.equivalent_g(20.0, 10.0, 50.0) - 42.5).abs() < 1e-9
        );
    }

    #[test]
    fn full_scenario() {
        let profile = PatientProfile::default(); // 10 / 50 / 100 / 100%
        let doses = compute_doses(&extraction(60.0, 30.0, 20.0), 180.0, &profile);
        assert!((doses.carb_dose_units - 6.0).abs() < 1e-9);
        assert!((doses.correction_dose_units - 1.6).abs() < 1e-9);
        assert!((doses.protein_fat_equivalent_g - 13.8).abs() < 1e-9);
        assert!((doses.protein_fat_dose_units - 1.38).abs() < 1e-9);
        assert_eq!(doses.fast_total_units, 8);
        assert_eq!(doses.deferred_or_regular_units, 1);
    }

    #[test]
    fn no_correction_at_or_below_target() {
        let profile = PatientProfile::default();
        let doses = compute_doses(&extraction(30.0, 0.0, 0.0), 100.0, &profile);
        assert_eq!(doses.correction_dose_units, 0.0);
        let doses = compute_doses(&extraction(30.0, 0.0, 0.0), 72.0, &profile);
        assert_eq!(doses.correction_dose_units, 0.0);
    }

    #[test]
    fn totals_round_half_up() {
        let profile = PatientProfile {
            icr_g_per_unit: 10.0,
            isf_mgdl_per_unit: 50.0,
            ..PatientProfile::default()
        };
        // carb dose 3.4, correction 0.2 -> round(3.6) = 4
        let doses = compute_doses(&extraction(34.0, 0.0, 0.0), 110.0, &profile);
        assert!((doses.carb_dose_units - 3.4).abs() < 1e-9);
        assert!((doses.correction_dose_units - 0.2).abs() < 1e-9);
        assert_eq!(doses.fast_total_units, 4);
    }

    #[test]
    fn model_reported_equivalent_wins_when_positive() {
        let profile = PatientProfile::default();
        let mut ext = extraction(0.0, 30.0, 20.0);
        ext.reported_equivalent_g = 11.0;
        let doses = compute_doses(&ext, 100.0, &profile);
        assert!((doses.protein_fat_equivalent_g - 11.0).abs() < 1e-9);

        ext.reported_equivalent_g = 0.0;
        let doses = compute_doses(&ext, 100.0, &profile);
        assert!((doses.protein_fat_equivalent_g - 13.8).abs() < 1e-9);
    }

    #[test]
    fn sanitized_substitutes_defaults() {
        let profile = PatientProfile {
            icr_g_per_unit: 0.0,
            isf_mgdl_per_unit: -3.0,
            target_mgdl: f64::NAN,
            insulin_product: "  ".into(),
            pf_strategy: PfStrategy::SplitToRapidLater,
            protein_pct: 250.0,
        }
        .sanitized();
        assert_eq!(profile.icr_g_per_unit, DEFAULT_ICR_G_PER_UNIT);
        assert_eq!(profile.isf_mgdl_per_unit, DEFAULT_ISF_MGDL_PER_UNIT);
        assert_eq!(profile.target_mgdl, DEFAULT_TARGET_MGDL);
        assert_eq!(profile.protein_pct, 100.0);
        assert_eq!(profile.insulin_product, DEFAULT_INSULIN_PRODUCT);
        assert_eq!(profile.pf_strategy, PfStrategy::SplitToRapidLater);
    }

    #[test]
    fn determinism() {
        let profile = PatientProfile::default();
        let a = compute_doses(&extraction(45.0, 12.0, 7.0), 140.0, &profile);
        let b = compute_doses(&extraction(45.0, 12.0, 7.0), 140.0, &profile);
        assert_eq!(a.fast_total_units, b.fast_total_units);
        assert_eq!(a.carb_dose_units, b.carb_dose_units);
        assert_eq!(a.protein_fat_equivalent_g, b.protein_fat_equivalent_g);
    }

    #[test]
    fn round1_is_half_up_to_one_decimal() {
        assert_eq!(round1(1.38), 1.4);
        assert_eq!(round1(1.34), 1.3);
        assert_eq!(round1(0.05), 0.1);
    }
}
