//! Brazilian phone-number masks.
//!
//! Handwritten and OCR'd phone numbers arrive with arbitrary punctuation,
//! spaces and the occasional stray letter. The formatter keeps only the
//! digits and picks a mask from their count alone, longest pattern first.
//! Digits beyond the 11th are noise and are dropped.

use crate::output::NOT_AVAILABLE;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_NON_DIGIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^0-9]+").unwrap());

/// Clean and re-punctuate a loosely formatted phone number.
///
/// | digits | output |
/// |--------|--------|
/// | ≥ 11   | `(DD) XXXXX-XXXX` from the first 11 |
/// | 10     | `(DD) XXXX-XXXX` |
/// | 9      | `XXXXX-XXXX` |
/// | 8      | `XXXX-XXXX` |
/// | 1–7    | the bare digits |
/// | 0      | `N/A` |
pub fn format_phone(input: &str) -> String {
    if input.is_empty() {
        return NOT_AVAILABLE.to_string();
    }

    let digits = RE_NON_DIGIT.replace_all(input, "");
    // ASCII only, so byte slicing below is on char boundaries.
    let d: &str = &digits;

    match d.len() {
        n if n >= 11 => format!("({}) {}-{}", &d[..2], &d[2..7], &d[7..11]),
        10 => format!("({}) {}-{}", &d[..2], &d[2..6], &d[6..10]),
        9 => format!("{}-{}", &d[..5], &d[5..]),
        8 => format!("{}-{}", &d[..4], &d[4..]),
        0 => NOT_AVAILABLE.to_string(),
        _ => d.to_string(),
    }
}
