//! Text normalization for bill items, tie-up names, and hospital names.
//!
//! Everything embedded or compared goes through [`normalize_text`] first so
//! that OCR noise (serial numbers, doctor attributions, inventory codes,
//! lot/batch markers, dates) never reaches the vector indices. A second pass
//! ([`medical_core`]) extracts `<substance> <strength><unit>` from pharmacy
//! rows, e.g. `nicorandil 5mg`.
//!
//! The rules are generic: no hospital- or drug-specific tables.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static SERIAL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\d{1,3}|[a-zA-Z])[.)]\s+").unwrap());

/// `Dr. A. Kumar`, `Prof. Y`, optionally followed by initials/surname tokens.
static DOCTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:dr|prof|doc)\.?\s+(?:[a-z]+\.?\s*){1,3}").unwrap()
});

static LOT_BATCH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:lot|batch|b\.?\s?no|exp(?:iry)?|mfg|mfd)\.?\s*(?:no\.?|:|-)?\s*[a-z0-9/\-]*")
        .unwrap()
});

static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:\d{1,2}[/.\-]\d{1,2}[/.\-]\d{2,4}|\d{4}-\d{2}-\d{2})\b").unwrap()
});

static STRENGTH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?(?:mg|mcg|ml|g|iu|%)$").unwrap());

static STRENGTH_FIND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d+(?:\.\d+)?)\s?(mg|mcg|ml|g|iu|%)\b").unwrap());

static PACK_COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:'?s|x)$").unwrap());

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Segment separators inside one bill row: `|` or a spaced hyphen.
static SEGMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*\|\s*|\s+-\s+").unwrap());

const CREDENTIALS: &[&str] = &[
    "mbbs", "md", "ms", "dnb", "mch", "dm", "frcs", "mrcp", "dgo", "dch", "dortho",
];

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "by", "for", "in", "of", "on", "per", "the", "to", "with",
];

const QUANTITY_WORDS: &[&str] = &["qty", "nos", "no's", "x", "pcs"];

fn is_doctor_attribution(segment: &str) -> bool {
    let lower = segment.trim().to_lowercase();
    if lower.starts_with("dr.")
        || lower.starts_with("dr ")
        || lower.starts_with("prof.")
        || lower.starts_with("prof ")
    {
        return true;
    }
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|tok| CREDENTIALS.contains(&tok))
}

/// True for SKU/HSN-style inventory codes: length >= 6, contains a digit,
/// and is not a recognized strength like `1000mg`.
fn is_inventory_code(token: &str) -> bool {
    token.len() >= 6
        && token.chars().all(|c| c.is_ascii_alphanumeric())
        && token.chars().any(|c| c.is_ascii_digit())
        && !STRENGTH_RE.is_match(token)
}

/// Normalize one free-text name for indexing and matching.
///
/// Removal order: leading serials, doctor-attribution segments, inline
/// doctor tokens, lot/batch/expiry markers, dates, then a token pass that
/// drops inventory codes, credentials, and pack-count suffixes. Separators
/// become spaces, output is lowercased and whitespace-collapsed.
pub fn normalize_text(raw: &str) -> String {
    let without_serial = SERIAL_RE.replace(raw.trim(), "");

    // Keep the first segment unconditionally; later segments survive only
    // when they are not doctor attributions.
    let mut kept = Vec::new();
    for (i, segment) in SEGMENT_RE.split(&without_serial).enumerate() {
        if i == 0 || !is_doctor_attribution(segment) {
            kept.push(segment);
        }
    }
    let joined = kept.join(" ");

    let no_doctors = DOCTOR_RE.replace_all(&joined, " ");
    let no_lots = LOT_BATCH_RE.replace_all(&no_doctors, " ");
    let no_dates = DATE_RE.replace_all(&no_lots, " ");

    let spaced: String = no_dates
        .chars()
        .map(|c| match c {
            '|' | '-' | ':' | '/' | ',' | '(' | ')' | '[' | ']' => ' ',
            _ => c,
        })
        .collect();
    let lowered = spaced.to_lowercase();

    let tokens: Vec<&str> = lowered
        .split_whitespace()
        .filter(|tok| {
            let bare = tok.trim_matches(|c: char| !c.is_ascii_alphanumeric());
            if bare.is_empty() {
                return false;
            }
            !is_inventory_code(bare)
                && !CREDENTIALS.contains(&bare)
                && !QUANTITY_WORDS.contains(&bare)
                && !PACK_COUNT_RE.is_match(bare)
        })
        .collect();

    WS_RE.replace_all(tokens.join(" ").trim(), " ").into_owned()
}

/// Extract the medical core `<substance> <strength><unit>` from a normalized
/// name, e.g. `tab nicorandil 5mg 10s` -> `nicorandil 5mg`.
///
/// Returns `None` when no strength pattern is present or when the core would
/// not differ from the input.
pub fn medical_core(normalized: &str) -> Option<String> {
    const FORM_WORDS: &[&str] = &[
        "tab", "tabs", "tablet", "tablets", "cap", "caps", "capsule", "capsules", "inj",
        "injection", "syp", "syrup", "susp", "suspension", "cream", "gel", "drops", "oint",
        "ointment",
    ];

    let m = STRENGTH_FIND_RE.find(normalized)?;
    let strength = STRENGTH_FIND_RE
        .captures(normalized)
        .map(|c| format!("{}{}", &c[1], &c[2]))?;

    let substance: Vec<&str> = normalized[..m.start()]
        .split_whitespace()
        .filter(|tok| !FORM_WORDS.contains(tok) && !tok.chars().all(|c| c.is_ascii_digit()))
        .collect();
    if substance.is_empty() {
        return None;
    }

    let core = format!("{} {}", substance.join(" "), strength);
    if core == normalized {
        None
    } else {
        Some(core)
    }
}

/// Content words for token-overlap scoring: stopwords, pure numbers, and
/// single characters removed.
pub fn content_tokens(text: &str) -> BTreeSet<String> {
    text.split_whitespace()
        .map(|tok| {
            tok.trim_matches(|c: char| !c.is_ascii_alphanumeric())
                .to_lowercase()
        })
        .filter(|tok| {
            tok.len() >= 2
                && !STOPWORDS.contains(&tok.as_str())
                && !tok.chars().all(|c| c.is_ascii_digit())
        })
        .collect()
}

/// Case-insensitive, whitespace-collapsed equality key for hospital lookup.
pub fn lookup_key(name: &str) -> String {
    WS_RE
        .replace_all(name.trim(), " ")
        .to_lowercase()
        .to_string()
}

/// Filesystem-safe slug for tie-up file naming.
///
/// `"Max Super-Specialty Hospital"` -> `"max_super_specialty_hospital"`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    slug.trim_matches('_').to_string()
}

/// Round-trip a slug back into a display name: `apollo_hospital` ->
/// `Apollo Hospital`.
pub fn display_name_from_slug(slug: &str) -> String {
    slug.split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_serial_and_doctor_attribution() {
        assert_eq!(
            normalize_text("1. CONSULTATION - FIRST VISIT | Dr. A. Kumar"),
            "consultation first visit"
        );
        assert_eq!(normalize_text("2) MRI BRAIN | Dr. X"), "mri brain");
        assert_eq!(normalize_text("a. X-Ray Chest"), "x ray chest");
    }

    #[test]
    fn keeps_non_doctor_segments() {
        assert_eq!(
            normalize_text("ROOM RENT - DELUXE WARD"),
            "room rent deluxe ward"
        );
    }

    #[test]
    fn strips_credentials_with_doctor_segment() {
        assert_eq!(
            normalize_text("ECHO SCREENING | Dr. B. Rao MBBS MD"),
            "echo screening"
        );
    }

    #[test]
    fn strips_codes_dates_and_lot_markers() {
        assert_eq!(
            normalize_text("PARACETAMOL 500MG HSN300490 12/03/2024"),
            "paracetamol 500mg"
        );
        assert_eq!(
            normalize_text("AMOXYCLAV 625 Batch No: AB1234X"),
            "amoxyclav 625"
        );
    }

    #[test]
    fn keeps_strength_tokens_and_drops_pack_counts() {
        assert_eq!(
            normalize_text("NICORANDIL 5MG TAB 10'S"),
            "nicorandil 5mg tab"
        );
        assert_eq!(normalize_text("INJ CEFTRIAXONE 1000MG"), "inj ceftriaxone 1000mg");
    }

    #[test]
    fn medical_core_extraction() {
        assert_eq!(
            medical_core("tab nicorandil 5mg").as_deref(),
            Some("nicorandil 5mg")
        );
        assert_eq!(
            medical_core("inj ceftriaxone 1000mg").as_deref(),
            Some("ceftriaxone 1000mg")
        );
        assert_eq!(medical_core("consultation first visit"), None);
        assert_eq!(medical_core("nicorandil 5mg"), None);
    }

    #[test]
    fn content_tokens_filter_numbers_and_stopwords() {
        let toks = content_tokens("mri of the brain 2");
        assert!(toks.contains("mri"));
        assert!(toks.contains("brain"));
        assert!(!toks.contains("of"));
        assert!(!toks.contains("2"));
    }

    #[test]
    fn slug_round_trip() {
        assert_eq!(slugify("Apollo Hospital"), "apollo_hospital");
        assert_eq!(
            slugify("Max Super-Specialty Hospital"),
            "max_super_specialty_hospital"
        );
        assert_eq!(slugify("Fortis (Delhi)"), "fortis_delhi");
        assert_eq!(display_name_from_slug("apollo_hospital"), "Apollo Hospital");
    }

    #[test]
    fn lookup_key_collapses_whitespace() {
        assert_eq!(lookup_key("  Apollo   Hospital "), "apollo hospital");
    }
}
