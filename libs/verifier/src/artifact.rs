//! Non-billable row detection.
//!
//! OCR on scanned bills leaks header fragments that look like items. The
//! canonical shape is a zero-amount `UNKNOWN` row under a hospital-header
//! category; a second family is zero-amount rows whose text is nothing but
//! an inventory code, a number, or a lot/batch marker. Both are flagged
//! here and excluded from persistence and completeness accounting.

use once_cell::sync::Lazy;
use regex::Regex;

/// Collapse a name for artifact comparison: lowercase, strip separators.
fn squash(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .collect()
}

static LOT_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:lot|batch|b\.?\s?no|exp(?:iry)?|mfg|mfd)\b").unwrap()
});

/// Header artifact (hospital-ish category with an empty/UNKNOWN name) or a
/// zero-amount noise row; both require zero amounts, and the noise check
/// applies regardless of category.
pub fn is_artifact(category_name: &str, item_name: &str, amount: f64, final_amount: f64) -> bool {
    if amount != 0.0 || final_amount != 0.0 {
        return false;
    }
    let header_artifact = matches!(
        squash(category_name).as_str(),
        "hospital" | "hospitalization" | "hospitalcharges"
    ) && matches!(squash(item_name).as_str(), "" | "unknown");

    header_artifact || is_zero_amount_noise(item_name, amount)
}

/// Zero-amount rows whose text is purely numeric, a long alphanumeric code
/// (letters and digits mixed), or a lot/batch/expiry marker.
pub fn is_zero_amount_noise(item_name: &str, amount: f64) -> bool {
    if amount != 0.0 {
        return false;
    }
    let trimmed = item_name.trim();
    if trimmed.is_empty() {
        return false;
    }
    if LOT_MARKER_RE.is_match(trimmed) {
        return true;
    }
    let squashed: String = trimmed.chars().filter(|c| *c != ' ').collect();
    if squashed.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    squashed.len() >= 6
        && squashed.chars().all(|c| c.is_ascii_alphanumeric())
        && squashed.chars().any(|c| c.is_ascii_digit())
        && squashed.chars().any(|c| c.is_ascii_alphabetic())
}

const ADMIN_PHRASES: &[&str] = &[
    "registration fee",
    "registration charge",
    "registration charges",
    "admission fee",
    "admission charge",
    "admin fee",
    "admin charge",
    "administrative charge",
    "processing fee",
    "processing charge",
    "deposit",
    "advance deposit",
    "service charge",
    "medical records fee",
    "mrd charges",
    "documentation charge",
];

/// Administrative / non-comparable charge heuristic.
///
/// Takes a normalized item name; matches whole phrases so `deposit` does
/// not catch `depositary vein graft`.
pub fn is_admin_charge(normalized_item: &str) -> bool {
    ADMIN_PHRASES.iter().any(|phrase| {
        normalized_item == *phrase
            || normalized_item.starts_with(&format!("{phrase} "))
            || normalized_item.ends_with(&format!(" {phrase}"))
            || normalized_item.contains(&format!(" {phrase} "))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hospital_header_artifact() {
        assert!(is_artifact("Hospital - ", "UNKNOWN", 0.0, 0.0));
        assert!(is_artifact("Hospitalization", "", 0.0, 0.0));
        assert!(is_artifact("hospital charges", "unknown", 0.0, 0.0));
    }

    #[test]
    fn nonzero_amount_is_never_artifact() {
        assert!(!is_artifact("Hospital", "UNKNOWN", 100.0, 100.0));
        assert!(!is_artifact("Hospital", "UNKNOWN", 0.0, 50.0));
    }

    #[test]
    fn real_item_under_hospital_category_kept() {
        assert!(!is_artifact("Hospital", "Room Rent", 0.0, 0.0));
    }

    #[test]
    fn zero_amount_noise_rows() {
        assert!(is_zero_amount_noise("123456", 0.0));
        assert!(is_zero_amount_noise("HSN300490", 0.0));
        assert!(is_zero_amount_noise("Batch No: AB12", 0.0));
        assert!(!is_zero_amount_noise("123456", 10.0));
        assert!(!is_zero_amount_noise("Consultation", 0.0));
        assert!(is_artifact("Pharmacy", "HSN300490", 0.0, 0.0));
        // Noise rows are artifacts under hospital-header categories too.
        assert!(is_artifact("Hospital", "123456", 0.0, 0.0));
        assert!(is_artifact("Hospitalization", "Batch No: AB12", 0.0, 0.0));
    }

    #[test]
    fn admin_charge_phrases() {
        assert!(is_admin_charge("registration fee"));
        assert!(is_admin_charge("opd registration charges"));
        assert!(is_admin_charge("advance deposit"));
        assert!(!is_admin_charge("mri brain"));
    }
}
