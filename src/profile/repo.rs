use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::analysis::dosing::{PatientProfile, PfStrategy};

/// Raw settings row. Every column is nullable; defaulting happens in
/// `into_profile`, which is the single place missing or unusable values are
/// replaced.
#[derive(Debug, FromRow)]
struct SettingsRow {
    icr_g_per_unit: Option<f64>,
    isf_mgdl_per_unit: Option<f64>,
    target_mgdl: Option<f64>,
    insulin_product: Option<String>,
    pf_strategy: Option<String>,
    protein_pct: Option<f64>,
}

impl SettingsRow {
    fn into_profile(self) -> PatientProfile {
        let defaults = PatientProfile::default();
        let pf_strategy = match self.pf_strategy.as_deref() {
            Some("split-to-rapid-later") => PfStrategy::SplitToRapidLater,
            _ => PfStrategy::ApplyRegularNow,
        };
        PatientProfile {
            icr_g_per_unit: self.icr_g_per_unit.unwrap_or(defaults.icr_g_per_unit),
            isf_mgdl_per_unit: self.isf_mgdl_per_unit.unwrap_or(defaults.isf_mgdl_per_unit),
            target_mgdl: self.target_mgdl.unwrap_or(defaults.target_mgdl),
            insulin_product: self.insulin_product.unwrap_or(defaults.insulin_product),
            pf_strategy,
            protein_pct: self.protein_pct.unwrap_or(defaults.protein_pct),
        }
        .sanitized()
    }
}

fn strategy_str(strategy: PfStrategy) -> &'static str {
    match strategy {
        PfStrategy::ApplyRegularNow => "apply-regular-now",
        PfStrategy::SplitToRapidLater => "split-to-rapid-later",
    }
}

/// Always yields a usable profile: missing row or missing fields fall back to
/// the documented defaults.
pub async fn get_or_default(db: &PgPool, user_id: Uuid) -> anyhow::Result<PatientProfile> {
    let row = sqlx::query_as::<_, SettingsRow>(
        r#"
        SELECT icr_g_per_unit, isf_mgdl_per_unit, target_mgdl,
               insulin_product, pf_strategy, protein_pct
        FROM patient_settings
        WHERE user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(row.map_or_else(PatientProfile::default, SettingsRow::into_profile))
}

pub async fn upsert(
    db: &PgPool,
    user_id: Uuid,
    profile: &PatientProfile,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO patient_settings
            (user_id, icr_g_per_unit, isf_mgdl_per_unit, target_mgdl,
             insulin_product, pf_strategy, protein_pct, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, now())
        ON CONFLICT (user_id) DO UPDATE SET
            icr_g_per_unit = EXCLUDED.icr_g_per_unit,
            isf_mgdl_per_unit = EXCLUDED.isf_mgdl_per_unit,
            target_mgdl = EXCLUDED.target_mgdl,
            insulin_product = EXCLUDED.insulin_product,
            pf_strategy = EXCLUDED.pf_strategy,
            protein_pct = EXCLUDED.protein_pct,
            updated_at = now()
        "#,
    )
    .bind(user_id)
    .bind(profile.icr_g_per_unit)
    .bind(profile.isf_mgdl_per_unit)
    .bind(profile.target_mgdl)
    .bind(&profile.insulin_product)
    .bind(strategy_str(profile.pf_strategy))
    .bind(profile.protein_pct)
    .execute(db)
    .await?;
    Ok(())
}
