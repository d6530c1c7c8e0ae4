use crate::ParseError;

/// Parse raw page text into a value.
///
/// Surrounding whitespace and thousands separators are removed first, so
/// `" 1,234.5 "` parses as `1234.5`. Anything that is not a finite number
/// afterwards is rejected.
pub fn parse_value(raw: &str) -> Result<f64, ParseError> {
    let normalized: String = raw.trim().chars().filter(|c| *c != ',').collect();

    match normalized.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseError::new(raw.trim())),
    }
}
