use anyhow::Context;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

/// One persisted analysis. Append-only: rows are inserted once and never
/// updated, so equivalents computed under older conversion rules stay as
/// they were written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MealLogEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub logged_at: OffsetDateTime,
    pub meal_type: String,
    pub description: String,
    pub glucose_mgdl: f64,
    pub carbs_g: f64,
    pub protein_fat_equivalent_g: f64,
    pub fast_total_units: i64,
    pub regular_units: i64,
    pub narrative: Option<String>,
    pub photo_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub user_id: Uuid,
    pub meal_type: String,
    pub description: String,
    pub glucose_mgdl: f64,
    pub carbs_g: f64,
    pub protein_fat_equivalent_g: f64,
    pub fast_total_units: i64,
    pub regular_units: i64,
    pub narrative: Option<String>,
    pub photo_key: Option<String>,
}

const RETURNING: &str = r#"
    RETURNING id, user_id, logged_at, meal_type, description, glucose_mgdl,
              carbs_g, protein_fat_equivalent_g, fast_total_units,
              regular_units, narrative, photo_key
"#;

async fn insert(
    db: &PgPool,
    entry: &NewLogEntry,
    with_narrative: bool,
) -> anyhow::Result<MealLogEntry> {
    let narrative = if with_narrative {
        entry.narrative.clone()
    } else {
        None
    };
    let sql = format!(
        r#"
        INSERT INTO meal_log
            (id, user_id, meal_type, description, glucose_mgdl, carbs_g,
             protein_fat_equivalent_g, fast_total_units, regular_units,
             narrative, photo_key)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        {RETURNING}
        "#
    );
    let row = sqlx::query_as::<_, MealLogEntry>(&sql)
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(&entry.meal_type)
        .bind(&entry.description)
        .bind(entry.glucose_mgdl)
        .bind(entry.carbs_g)
        .bind(entry.protein_fat_equivalent_g)
        .bind(entry.fast_total_units)
        .bind(entry.regular_units)
        .bind(narrative)
        .bind(&entry.photo_key)
        .fetch_one(db)
        .await?;
    Ok(row)
}

/// Appends one log entry. When the full row fails to write (typically the
/// narrative pushing the payload over a size constraint), retries exactly
/// once without the narrative before giving up.
pub async fn append(db: &PgPool, entry: &NewLogEntry) -> anyhow::Result<MealLogEntry> {
    match insert(db, entry, true).await {
        Ok(row) => Ok(row),
        Err(e) => {
            warn!(error = %e, user_id = %entry.user_id, "full meal_log insert failed; retrying without narrative");
            insert(db, entry, false)
                .await
                .context("meal_log insert (degraded, no narrative)")
        }
    }
}

pub async fn list_by_user(
    db: &PgPool,
    user_id: Uuid,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<MealLogEntry>> {
    let rows = sqlx::query_as::<_, MealLogEntry>(
        r#"
        SELECT id, user_id, logged_at, meal_type, description, glucose_mgdl,
               carbs_g, protein_fat_equivalent_g, fast_total_units,
               regular_units, narrative, photo_key
        FROM meal_log
        WHERE user_id = $1
        ORDER BY logged_at DESC
        LIMIT $2 OFFSET $3
        "#,
    )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
    Ok(rows)
}

pub async fn get_owned(
    db: &PgPool,
    user_id: Uuid,
    id: Uuid,
) -> anyhow::Result<Option<MealLogEntry>> {
    let row = sqlx::query_as::<_, MealLogEntry>(
        r#"
        SELECT id, user_id, logged_at, meal_type, description, glucose_mgdl,
               carbs_g, protein_fat_equivalent_g, fast_total_units,
               regular_units, narrative, photo_key
        FROM meal_log
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(id)
    .bind(user_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// Owner-only delete; entries are otherwise immutable.
pub async fn delete_owned(db: &PgPool, user_id: Uuid, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM meal_log WHERE id = $1 AND user_id = $2")
        .bind(id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
