//! Lenient number parsing for hand-maintained and published tables.
//!
//! Published statistics and spreadsheet exports mix `.` and `,` as decimal
//! separator and use dashes or ellipses for "no data".

/// Cell values that mean "no data" in published tables.
const PLACEHOLDERS: &[&str] = &["", "...", "…", "-", "–", "—"];

/// Parse a decimal that may use a comma as its decimal separator.
///
/// Returns `None` for placeholders, blanks, non-numeric text and non-finite
/// results.
pub fn parse_decimal(raw: &str) -> Option<f64> {
  let trimmed = raw.trim();
  if PLACEHOLDERS.contains(&trimmed) {
    return None;
  }
  trimmed
    .replace(',', ".")
    .parse::<f64>()
    .ok()
    .filter(|v| v.is_finite())
}

/// Parse a whole number, truncating any fractional part.
pub fn parse_whole(raw: &str) -> Option<i64> {
  parse_decimal(raw).map(|v| v.trunc() as i64)
}

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 { (value * 100.0).round() / 100.0 }
