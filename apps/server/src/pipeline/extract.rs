//! Structured bill extraction from page-ordered OCR text.
//!
//! Line-oriented parsing: `Key: Value` pairs ahead of the first category
//! become patient/header metadata, short amount-free lines open a category,
//! lines ending in an amount become items (with optional `qty x rate`
//! detail), and payment/total markers close out the document. Pages that
//! produced no text are recorded as warnings, never errors.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use crate::models::{BillCategory, ExtractedBill, ItemRow, Payment};
use crate::pipeline::ocr::PageText;
use crate::{Error, Result};

static AMOUNT_TAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|\s)(?:Rs\.?\s*)?([0-9][0-9,]*(?:\.[0-9]{1,2})?)\s*$").unwrap());

static QTY_RATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([0-9]+(?:\.[0-9]+)?)\s*[xX*]\s*(?:Rs\.?\s*)?([0-9][0-9,]*(?:\.[0-9]{1,2})?)\s*$")
        .unwrap()
});

static KEY_VALUE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z .']{1,30}):\s+(.+)$").unwrap());

static GRAND_TOTAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:grand\s+total|net\s+(?:amount|payable)|total\s+amount)\b").unwrap()
});

static PAYMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:advance|paid|payment|receipt|deposit\s+paid)\b").unwrap()
});

fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse::<f64>().ok()
}

fn is_patient_key(key: &str) -> bool {
    let lower = key.to_lowercase();
    ["patient", "mrn", "uhid", "age", "sex", "gender"]
        .iter()
        .any(|k| lower.contains(k))
}

/// A category heading is a short line with no trailing amount and at least
/// one letter.
fn is_category_heading(line: &str) -> bool {
    line.len() <= 48
        && line.chars().any(|c| c.is_ascii_alphabetic())
        && !line.ends_with(':')
}

/// Extract a structured bill from OCR pages.
///
/// Fails with [`Error::OcrFailure`] only when every page came back empty.
pub fn extract_bill(pages: &[PageText]) -> Result<ExtractedBill> {
    let mut warnings = Vec::new();
    let empty_pages = pages.iter().filter(|p| p.is_empty()).count();
    if !pages.is_empty() && empty_pages == pages.len() {
        return Err(Error::OcrFailure(format!(
            "all {} pages produced no text",
            pages.len()
        )));
    }
    for page in pages.iter().filter(|p| p.is_empty()) {
        warnings.push(format!("page {} produced no text", page.page));
    }

    let mut patient = Map::new();
    let mut header = Map::new();
    let mut categories: Vec<BillCategory> = Vec::new();
    let mut payments: Vec<Payment> = Vec::new();
    let mut grand_total: Option<f64> = None;
    let mut seen_first_category = false;

    for page in pages {
        for raw_line in page.text.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }

            if GRAND_TOTAL_RE.is_match(line) {
                if let Some(amount) = AMOUNT_TAIL_RE
                    .captures(line)
                    .and_then(|c| parse_amount(&c[1]))
                {
                    grand_total = Some(amount);
                }
                continue;
            }

            if PAYMENT_RE.is_match(line) {
                if let Some(captures) = AMOUNT_TAIL_RE.captures(line) {
                    let amount = parse_amount(&captures[1]).unwrap_or(0.0);
                    let label = line[..captures.get(0).map_or(line.len(), |m| m.start())]
                        .trim()
                        .to_string();
                    payments.push(Payment { label, amount });
                    continue;
                }
            }

            if !seen_first_category {
                if let Some(captures) = KEY_VALUE_RE.captures(line) {
                    let key = captures[1].trim().to_string();
                    let value = JsonValue::String(captures[2].trim().to_string());
                    if is_patient_key(&key) {
                        patient.insert(key, value);
                    } else {
                        header.insert(key, value);
                    }
                    continue;
                }
            }

            if let Some(captures) = AMOUNT_TAIL_RE.captures(line) {
                let amount_match = captures.get(0).expect("whole match");
                let amount = match parse_amount(&captures[1]) {
                    Some(a) => a,
                    None => continue,
                };
                let mut name = line[..amount_match.start()].trim().to_string();

                let (quantity, rate) = match QTY_RATE_RE.captures(&name) {
                    Some(qr) => {
                        let quantity = qr[1].parse::<f64>().ok();
                        let rate = parse_amount(&qr[2]);
                        name = name[..qr.get(0).expect("whole match").start()]
                            .trim()
                            .to_string();
                        (quantity, rate)
                    }
                    None => (None, None),
                };

                if name.is_empty() {
                    warnings.push(format!(
                        "page {}: dropped amount-only line '{line}'",
                        page.page
                    ));
                    continue;
                }

                if categories.is_empty() {
                    categories.push(BillCategory {
                        category_name: "Uncategorized".into(),
                        items: Vec::new(),
                    });
                }
                categories
                    .last_mut()
                    .expect("non-empty")
                    .items
                    .push(ItemRow {
                        item_name: name,
                        amount,
                        quantity,
                        rate,
                        page: Some(page.page),
                    });
                continue;
            }

            if is_category_heading(line) {
                seen_first_category = true;
                categories.push(BillCategory {
                    category_name: line.to_string(),
                    items: Vec::new(),
                });
            }
        }
    }

    categories.retain(|c| !c.items.is_empty());

    let item_total: f64 = categories
        .iter()
        .flat_map(|c| c.items.iter())
        .map(|i| i.amount)
        .sum();
    let grand_total = grand_total.unwrap_or(item_total);

    Ok(ExtractedBill {
        patient: JsonValue::Object(patient),
        header: JsonValue::Object(header),
        categories,
        payments,
        grand_total,
        page_count: pages.len() as u32,
        extraction_warnings: warnings,
    })
}
