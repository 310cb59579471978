//! Text and number normalization helpers shared by the canonicalizer and collaborators.

use crate::constants::canonical::NULL_TOKENS;
use crate::types::RawValue;

/// Trim and upper-case an identity code.
pub fn normalize_code<T: AsRef<str>>(text: T) -> String {
    text.as_ref().trim().to_uppercase()
}

/// True when `text` is one of the upstream spellings of a missing value.
pub fn is_null_token(text: &str) -> bool {
    let trimmed = text.trim();
    NULL_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// True when a raw cell carries no value (JSON null or a null spelling).
pub fn is_absent(raw: &RawValue) -> bool {
    match raw {
        RawValue::Null => true,
        RawValue::String(text) => is_null_token(text),
        _ => false,
    }
}

/// Round `value` half away from zero to `places` decimals.
pub fn round_to_places(value: f64, places: u32) -> f64 {
    let scale = 10f64.powi(places as i32);
    (value * scale).round() / scale
}

/// Fixed-point integer representation of `value` at `places` decimals.
///
/// Returns `None` for non-finite values or values outside the `i64` range.
pub fn scaled_units(value: f64, places: u32) -> Option<i64> {
    if !value.is_finite() {
        return None;
    }
    let scaled = (value * 10f64.powi(places as i32)).round();
    if scaled.abs() >= i64::MAX as f64 {
        return None;
    }
    Some(scaled as i64)
}

/// Parse a raw cell as a finite float; text cells are trimmed first.
pub fn parse_float(raw: &RawValue) -> Option<f64> {
    let value = match raw {
        RawValue::Number(number) => number.as_f64()?,
        RawValue::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    value.is_finite().then_some(value)
}

/// Render a raw scalar cell as text (numbers use their JSON spelling).
pub fn raw_to_text(raw: &RawValue) -> Option<String> {
    match raw {
        RawValue::String(text) => Some(text.clone()),
        RawValue::Number(number) => Some(number.to_string()),
        RawValue::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_code_trims_and_uppercases() {
        assert_eq!(normalize_code("  e333852 \t"), "E333852");
        assert_eq!(normalize_code("ph-f"), "PH-F");
        assert_eq!(normalize_code(""), "");
    }

    #[test]
    fn null_tokens_collapse_regardless_of_case() {
        for token in ["", "  ", "NA", "nan", "NaN", "NaT", "None", "null", "<NA>", "N/A"] {
            assert!(is_null_token(token), "expected '{token}' to be null");
        }
        assert!(!is_null_token("0"));
        assert!(!is_null_token("Nanaimo"));
        assert!(is_absent(&json!(null)));
        assert!(!is_absent(&json!(0)));
    }

    #[test]
    fn rounding_collapses_float_noise() {
        assert_eq!(round_to_places(7.0000001, 6), 7.0);
        assert_eq!(round_to_places(7.000001, 6), 7.000001);
        assert_eq!(scaled_units(7.0000001, 6), scaled_units(7.0, 6));
        assert_ne!(scaled_units(7.000001, 6), scaled_units(7.0, 6));
        assert_eq!(scaled_units(f64::NAN, 6), None);
    }

    #[test]
    fn parse_float_accepts_numbers_and_numeric_text() {
        assert_eq!(parse_float(&json!(1.5)), Some(1.5));
        assert_eq!(parse_float(&json!(" -119.25 ")), Some(-119.25));
        assert_eq!(parse_float(&json!("abc")), None);
        assert_eq!(parse_float(&json!("inf")), None);
        assert_eq!(parse_float(&json!(null)), None);
    }
}
