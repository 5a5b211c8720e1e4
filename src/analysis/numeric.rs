use serde_json::Value;

/// Parses numbers the way the model tends to write them for Brazilian users:
/// `.` is a thousands separator, `,` is the decimal mark. Unparseable or
/// empty input yields 0.0 instead of an error; every caller on the extraction
/// path relies on that.
pub fn parse_locale_number(raw: &str) -> f64 {
    let cleaned: String = raw
        .chars()
        .filter(|&c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if cleaned.is_empty() {
        return 0.0;
    }
    cleaned
        .replace('.', "")
        .replace(',', ".")
        .parse::<f64>()
        .unwrap_or(0.0)
}

/// Numeric field out of the model's data block: already-numeric JSON values
/// pass through untouched, strings go through the locale parser, anything
/// else is 0.0.
pub fn json_number(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_locale_number(s),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_and_decimal_separators() {
        assert_eq!(parse_locale_number("1.234,5"), 1234.5);
        assert_eq!(parse_locale_number("45,7"), 45.7);
        assert_eq!(parse_locale_number("60"), 60.0);
    }

    #[test]
    fn tolerates_units_and_whitespace() {
        assert_eq!(parse_locale_number(" 12,5 g"), 12.5);
        assert_eq!(parse_locale_number("~30g"), 30.0);
    }

    #[test]
    fn garbage_is_zero() {
        assert_eq!(parse_locale_number("abc"), 0.0);
        assert_eq!(parse_locale_number(""), 0.0);
        assert_eq!(parse_locale_number("-"), 0.0);
    }

    #[test]
    fn json_number_is_idempotent_on_numbers() {
        assert_eq!(json_number(Some(&serde_json::json!(13.8))), 13.8);
        assert_eq!(json_number(Some(&serde_json::json!("13,8"))), 13.8);
        assert_eq!(json_number(Some(&serde_json::json!(null))), 0.0);
        assert_eq!(json_number(None), 0.0);
    }
}
