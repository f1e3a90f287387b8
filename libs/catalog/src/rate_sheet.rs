//! Tie-up rate sheet models and JSON loading.
//!
//! One JSON file per hospital, named by the slug of the hospital name
//! (`apollo_hospital.json`). Categories and items keep file order; the
//! verifier relies on stable ids derived from that order.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::text::slugify;
use crate::{Error, Result};

/// Pricing semantics of a tie-up item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Rate is per unit; multiplied by the billed quantity.
    Unit,
    /// Flat rate per occurrence.
    Service,
    /// Only billable as part of a package.
    Bundle,
}

/// A canonical billable entry from a hospital's rate sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TieUpItem {
    pub item_name: String,
    pub rate: f64,
    #[serde(rename = "type")]
    pub kind: ItemKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateCategory {
    pub category_name: String,
    pub items: Vec<TieUpItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSheet {
    pub hospital_name: String,
    pub categories: Vec<RateCategory>,
}

impl RateSheet {
    /// Filesystem slug for this hospital.
    pub fn slug(&self) -> String {
        slugify(&self.hospital_name)
    }

    pub fn item_count(&self) -> usize {
        self.categories.iter().map(|c| c.items.len()).sum()
    }

    fn validate(&self, path: &Path) -> Result<()> {
        if self.hospital_name.trim().is_empty() {
            return Err(Error::CatalogLoad(format!(
                "{}: hospital_name is empty",
                path.display()
            )));
        }
        for category in &self.categories {
            if category.category_name.trim().is_empty() {
                return Err(Error::CatalogLoad(format!(
                    "{}: category with empty name",
                    path.display()
                )));
            }
            for item in &category.items {
                if item.item_name.trim().is_empty() {
                    return Err(Error::CatalogLoad(format!(
                        "{}: item with empty name in category '{}'",
                        path.display(),
                        category.category_name
                    )));
                }
                if item.rate < 0.0 || !item.rate.is_finite() {
                    return Err(Error::CatalogLoad(format!(
                        "{}: negative or non-finite rate for '{}'",
                        path.display(),
                        item.item_name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Load a single rate sheet from a JSON file.
pub fn load_rate_sheet(path: &Path) -> Result<RateSheet> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::CatalogLoad(format!("{}: {}", path.display(), e)))?;
    let sheet: RateSheet = serde_json::from_str(&raw)
        .map_err(|e| Error::CatalogLoad(format!("{}: invalid JSON: {}", path.display(), e)))?;
    sheet.validate(path)?;
    Ok(sheet)
}

/// Load every `*.json` rate sheet in a directory, sorted by filename.
///
/// Fails with [`Error::CatalogLoad`] when a file is unreadable or invalid,
/// or when two hospitals share the same normalized name.
pub fn load_rate_sheets(dir: &Path) -> Result<Vec<RateSheet>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| Error::CatalogLoad(format!("{}: {}", dir.display(), e)))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut sheets = Vec::with_capacity(paths.len());
    let mut seen = std::collections::HashMap::new();
    for path in &paths {
        let sheet = load_rate_sheet(path)?;
        let key = crate::text::lookup_key(&sheet.hospital_name);
        if let Some(previous) = seen.insert(key, path.clone()) {
            return Err(Error::CatalogLoad(format!(
                "duplicate hospital '{}' in {} and {}",
                sheet.hospital_name,
                previous.display(),
                path.display()
            )));
        }
        sheets.push(sheet);
    }
    Ok(sheets)
}
