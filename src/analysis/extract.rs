use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::numeric::{json_number, parse_locale_number};

/// Structured macro estimate recovered from one model completion. Numeric
/// fields are 0 whenever the corresponding signal could not be recovered;
/// extraction never fails.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MealExtraction {
    pub carbs_g: f64,
    pub protein_g: f64,
    pub fat_g: f64,
    pub summary: String,
    pub gross_carbs_g: f64,
    pub fiber_g: f64,
    pub sugar_alcohol_g: f64,
    pub calories_kcal: f64,
    /// Equivalent carbs as reported by the model itself; 0 means absent.
    /// The dose calculator recomputes it from protein/fat in that case.
    pub reported_equivalent_g: f64,
}

// Key aliases accepted in the trailing data block. The prompt pins the first
// name of each list; the rest survived earlier prompt revisions and keep old
// completions parseable.
const CARB_KEYS: &[&str] = &["carbs_g", "net_carbs_g", "carbohydrates_g", "carb_g"];
const GROSS_CARB_KEYS: &[&str] = &["gross_carbs_g", "total_carbs_g", "carbs_before_fiber_g"];
const FIBER_KEYS: &[&str] = &["fiber_g", "fibre_g"];
const SUGAR_ALCOHOL_KEYS: &[&str] = &["sugar_alcohol_g", "polyols_g"];
const PROTEIN_KEYS: &[&str] = &["protein_g", "proteins_g"];
const FAT_KEYS: &[&str] = &["fat_g", "fats_g", "lipids_g"];
const EQUIVALENT_KEYS: &[&str] = &[
    "protein_fat_equivalent_g",
    "pf_equivalent_g",
    "equivalent_carbs_g",
];
const CALORIE_KEYS: &[&str] = &["calories_kcal", "total_kcal", "energy_kcal"];
const SUMMARY_KEYS: &[&str] = &["summary", "meal_summary", "description"];

// Fixed column positions in the per-item table the prompt asks for:
// item | portion | carbs | protein | fat | calories
const TABLE_MIN_CELLS: usize = 6;
const TABLE_PROTEIN_COL: usize = 3;
const TABLE_FAT_COL: usize = 4;

lazy_static! {
    static ref FENCE_RE: Regex = Regex::new(r"```[a-zA-Z]*\n?").unwrap();
    static ref ROW_RE: Regex = Regex::new(r"(?is)<tr[^>]*>(.*?)</tr>").unwrap();
    static ref CELL_RE: Regex = Regex::new(r"(?is)<td[^>]*>(.*?)</td>").unwrap();
    static ref TAG_RE: Regex = Regex::new(r"(?s)<[^>]+>").unwrap();
    static ref PROTEIN_TOTAL_RE: Regex =
        Regex::new(r"(?i)protein\s+total:?\s*([\d.,]+)\s*g").unwrap();
    static ref FAT_TOTAL_RE: Regex = Regex::new(r"(?i)fat\s+total:?\s*([\d.,]+)\s*g").unwrap();
}

/// Drops markdown code-fence markers the model sometimes wraps its HTML in.
pub fn strip_code_fences(raw: &str) -> String {
    FENCE_RE.replace_all(raw, "").into_owned()
}

/// Recovers macro totals from a raw model completion. Strategy chain:
/// trailing JSON data block, then narrative "protein total / fat total"
/// sentences, then summing the per-item table columns. Total failure yields
/// an all-zero result carrying `fallback_summary`.
pub fn extract_macros(raw: &str, fallback_summary: &str) -> MealExtraction {
    let cleaned = strip_code_fences(raw);

    let mut out = MealExtraction {
        summary: fallback_summary.to_string(),
        ..MealExtraction::default()
    };

    if let Some(block) = trailing_data_block(&cleaned) {
        out.carbs_g = alias_number(&block, CARB_KEYS);
        out.gross_carbs_g = alias_number(&block, GROSS_CARB_KEYS);
        out.fiber_g = alias_number(&block, FIBER_KEYS);
        out.sugar_alcohol_g = alias_number(&block, SUGAR_ALCOHOL_KEYS);
        out.protein_g = alias_number(&block, PROTEIN_KEYS);
        out.fat_g = alias_number(&block, FAT_KEYS);
        out.reported_equivalent_g = alias_number(&block, EQUIVALENT_KEYS);
        out.calories_kcal = alias_number(&block, CALORIE_KEYS);
        if let Some(summary) = alias_string(&block, SUMMARY_KEYS) {
            out.summary = summary;
        }
    } else {
        debug!("no parseable trailing data block in model output");
    }

    // The data block historically carried only carb-side figures; protein and
    // fat usually have to come out of the narrative or the table.
    if out.protein_g <= 0.0 && out.fat_g <= 0.0 {
        let (protein, fat) = narrative_totals(&cleaned);
        if protein > 0.0 || fat > 0.0 {
            out.protein_g = protein;
            out.fat_g = fat;
        } else {
            let (protein, fat) = table_totals(&cleaned);
            out.protein_g = protein;
            out.fat_g = fat;
        }
    }

    out
}

/// Locates and parses the flat JSON object at the tail of the output.
/// Returns None when absent or unparseable.
fn trailing_data_block(text: &str) -> Option<Map<String, Value>> {
    let start = text.rfind('{')?;
    let end = text[start..].find('}')? + start;
    serde_json::from_str::<Map<String, Value>>(&text[start..=end]).ok()
}

fn alias_number(block: &Map<String, Value>, keys: &[&str]) -> f64 {
    keys.iter()
        .find_map(|k| block.get(*k))
        .map(|v| json_number(Some(v)))
        .unwrap_or(0.0)
        .max(0.0)
}

fn alias_string(block: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| block.get(*k))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// "Protein total: N g" / "Fat total: N g" sentences in the narrative.
fn narrative_totals(text: &str) -> (f64, f64) {
    let protein = PROTEIN_TOTAL_RE
        .captures(text)
        .map(|c| parse_locale_number(&c[1]))
        .unwrap_or(0.0);
    let fat = FAT_TOTAL_RE
        .captures(text)
        .map(|c| parse_locale_number(&c[1]))
        .unwrap_or(0.0);
    (protein, fat)
}

/// Sums the protein and fat columns of every well-formed table row. Rows with
/// fewer cells than the expected layout are skipped rather than guessed at,
/// and negative cells count as zero so the recovered totals stay ≥ 0.
fn table_totals(text: &str) -> (f64, f64) {
    let mut protein = 0.0;
    let mut fat = 0.0;
    for row in ROW_RE.captures_iter(text) {
        let cells: Vec<String> = CELL_RE
            .captures_iter(&row[1])
            .map(|c| TAG_RE.replace_all(&c[1], "").trim().to_string())
            .collect();
        if cells.len() < TABLE_MIN_CELLS {
            continue;
        }
        protein += parse_locale_number(&cells[TABLE_PROTEIN_COL]).max(0.0);
        fat += parse_locale_number(&cells[TABLE_FAT_COL]).max(0.0);
    }
    (protein, fat)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = concat!(
        "<table><tr><th>Item</th><th>Portion</th><th>Carbs</th>",
        "<th>Protein</th><th>Fat</th><th>Calories</th></tr>",
        "<tr><td>Rice</td><td>100 g</td><td>28</td><td>2,5</td><td>0,3</td><td>130</td></tr>",
        "<tr><td>Steak</td><td>150 g</td><td>0</td><td>27,5</td><td>19,7</td><td>290</td></tr>",
        "</table>"
    );

    #[test]
    fn data_block_is_the_primary_path() {
        let raw = format!(
            "{}<p>Looks like rice and steak.</p>\n<pre class=\"meal-data\">\n{}\n</pre>",
            TABLE,
            r#"{"carbs_g": "28", "gross_carbs_g": 31, "fiber_g": 3, "protein_g": 30, "fat_g": 20, "protein_fat_equivalent_g": 13.8, "calories_kcal": 420, "summary": "rice and steak"}"#
        );
        let ext = extract_macros(&raw, "caller text");
        assert_eq!(ext.carbs_g, 28.0);
        assert_eq!(ext.gross_carbs_g, 31.0);
        assert_eq!(ext.fiber_g, 3.0);
        assert_eq!(ext.protein_g, 30.0);
        assert_eq!(ext.fat_g, 20.0);
        assert_eq!(ext.reported_equivalent_g, 13.8);
        assert_eq!(ext.calories_kcal, 420.0);
        assert_eq!(ext.summary, "rice and steak");
    }

    #[test]
    fn key_aliases_resolve_in_order() {
        let raw = r#"{"carbohydrates_g": 40, "lipids_g": "9,5", "proteins_g": 12, "meal_summary": "alias meal"}"#;
        let ext = extract_macros(raw, "x");
        assert_eq!(ext.carbs_g, 40.0);
        assert_eq!(ext.fat_g, 9.5);
        assert_eq!(ext.protein_g, 12.0);
        assert_eq!(ext.summary, "alias meal");
        // absent fields default to zero
        assert_eq!(ext.fiber_g, 0.0);
        assert_eq!(ext.reported_equivalent_g, 0.0);
    }

    #[test]
    fn code_fences_are_stripped_before_parsing() {
        let raw = "```html\n<p>meal</p>\n```\n```json\n{\"carbs_g\": 55}\n```";
        let ext = extract_macros(raw, "x");
        assert_eq!(ext.carbs_g, 55.0);
    }

    #[test]
    fn table_scan_recovers_missing_protein_and_fat() {
        let raw = format!("{}\n<pre>{}</pre>", TABLE, r#"{"carbs_g": 28}"#);
        let ext = extract_macros(&raw, "x");
        assert_eq!(ext.carbs_g, 28.0);
        assert_eq!(ext.protein_g, 30.0);
        assert_eq!(ext.fat_g, 20.0);
    }

    #[test]
    fn table_scan_skips_short_rows() {
        let raw = concat!(
            "<table>",
            "<tr><td>only</td><td>two</td></tr>",
            "<tr><td>a</td><td>b</td><td>1</td><td>10</td><td>5</td><td>90</td></tr>",
            "</table>"
        );
        let (protein, fat) = table_totals(raw);
        assert_eq!(protein, 10.0);
        assert_eq!(fat, 5.0);
    }

    #[test]
    fn narrative_totals_beat_the_table() {
        let raw = format!(
            "<p>Protein total: 18,5 g. Fat total: 7 g.</p>{}",
            TABLE
        );
        let ext = extract_macros(&raw, "x");
        assert_eq!(ext.protein_g, 18.5);
        assert_eq!(ext.fat_g, 7.0);
    }

    #[test]
    fn model_reported_equivalent_passes_through_when_positive() {
        let raw = r#"{"carbs_g": 10, "protein_fat_equivalent_g": 6.2}"#;
        let ext = extract_macros(raw, "x");
        assert_eq!(ext.reported_equivalent_g, 6.2);
    }

    #[test]
    fn negative_values_clamp_to_zero() {
        let raw = r#"{"carbs_g": -4, "fiber_g": -1}"#;
        let ext = extract_macros(raw, "x");
        assert_eq!(ext.carbs_g, 0.0);
        assert_eq!(ext.fiber_g, 0.0);
    }

    #[test]
    fn negative_table_cells_count_as_zero() {
        let raw = concat!(
            "<table>",
            "<tr><td>Mystery</td><td>1</td><td>0</td><td>-5</td><td>-2</td><td>0</td></tr>",
            "<tr><td>Steak</td><td>150 g</td><td>0</td><td>27,5</td><td>19,7</td><td>290</td></tr>",
            "</table>"
        );
        let ext = extract_macros(raw, "x");
        assert_eq!(ext.protein_g, 27.5);
        assert_eq!(ext.fat_g, 19.7);

        let only_negative =
            "<table><tr><td>a</td><td>b</td><td>0</td><td>-5</td><td>-1</td><td>0</td></tr></table>";
        let ext = extract_macros(only_negative, "x");
        assert_eq!(ext.protein_g, 0.0);
        assert_eq!(ext.fat_g, 0.0);
    }

    #[test]
    fn total_failure_keeps_caller_summary_and_zeros() {
        let ext = extract_macros("the model rambled with no structure at all", "grilled cheese");
        assert_eq!(ext.carbs_g, 0.0);
        assert_eq!(ext.protein_g, 0.0);
        assert_eq!(ext.fat_g, 0.0);
        assert_eq!(ext.summary, "grilled cheese");
    }

    #[test]
    fn malformed_data_block_falls_through() {
        let raw = format!("{}\n<pre>{{not json at all</pre>", TABLE);
        let ext = extract_macros(&raw, "x");
        assert_eq!(ext.carbs_g, 0.0);
        assert_eq!(ext.protein_g, 30.0);
        assert_eq!(ext.fat_g, 20.0);
    }
}
