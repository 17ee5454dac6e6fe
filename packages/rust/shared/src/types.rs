//! Core domain types for the conference catalog.

use std::sync::LazyLock;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConfMapError, Result};

/// Delimiter joining the flattened cells of one listing row.
pub const ROW_DELIMITER: &str = "||||";

/// Table-name prefix for per-category raw row tables.
pub const RAW_TABLE_PREFIX: &str = "scraped_conferences";

/// Table-name prefix for per-category cleaned conference tables.
pub const CLEANED_TABLE_PREFIX: &str = "scraped_conferences_cleaned";

static SLUG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]+$").expect("static slug pattern"));

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// A topical partition of the catalog, e.g. "machine learning".
///
/// The slug (lowercase, spaces replaced by underscores) names the storage
/// tables, so construction rejects any label whose slug is not `[a-z0-9_]+`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Category {
    label: String,
    slug: String,
}

impl Category {
    /// Build a category from its free-text label.
    pub fn new(label: impl Into<String>) -> Result<Self> {
        let label = label.into().trim().to_string();
        let slug = label.to_lowercase().replace(' ', "_");
        if !SLUG_RE.is_match(&slug) {
            return Err(ConfMapError::validation(format!(
                "category {label:?} does not produce a safe table slug"
            )));
        }
        Ok(Self { label, slug })
    }

    /// The label as shown on the listing site.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Storage-name slug.
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Table holding this category's raw listing rows.
    pub fn raw_table(&self) -> TableName {
        TableName(format!("{RAW_TABLE_PREFIX}_{}", self.slug))
    }

    /// Table holding this category's cleaned conferences.
    pub fn cleaned_table(&self) -> TableName {
        TableName(format!("{CLEANED_TABLE_PREFIX}_{}", self.slug))
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label)
    }
}

/// A SQL table identifier derived from a validated [`Category`] slug.
///
/// Identifiers cannot be bound as statement parameters, so this is the only
/// way a per-category table name reaches SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    /// The bare table name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name double-quoted for use in SQL text.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RawRow
// ---------------------------------------------------------------------------

/// One extracted listing row: trimmed cell texts joined by [`ROW_DELIMITER`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRow {
    /// Document-order position within one crawl run of a category.
    pub position: usize,
    /// Delimited cell text.
    pub data: String,
}

impl RawRow {
    pub fn new(position: usize, data: impl Into<String>) -> Self {
        Self {
            position,
            data: data.into(),
        }
    }

    /// Split back into cells.
    pub fn cells(&self) -> Vec<&str> {
        self.data.split(ROW_DELIMITER).collect()
    }

    /// A row with at most one cell separates open calls from past deadlines.
    pub fn is_boundary(&self) -> bool {
        self.data.split(ROW_DELIMITER).nth(1).is_none()
    }
}

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A resolved latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

// ---------------------------------------------------------------------------
// Conference records
// ---------------------------------------------------------------------------

/// A conference reconstructed from a pair of raw rows, not yet validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConferenceRecord {
    pub abbreviation: String,
    pub name: String,
    /// Raw date-range text, e.g. `Jan 1, 2024 - Jan 3, 2024`.
    pub dates: String,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub location: String,
    /// Call-for-papers deadline text, kept verbatim.
    pub cfp: String,
    /// Filled in by geocoding.
    pub coordinates: Option<Coordinates>,
    /// Whether the record appeared after the listing's deadline boundary.
    pub past_submission_deadline: bool,
}

/// A record that passed validation: dates and coordinates are all present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedConference {
    pub abbreviation: String,
    pub name: String,
    pub dates: String,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub location: String,
    pub cfp: String,
    pub coordinates: Coordinates,
    pub past_submission_deadline: bool,
}

/// A row of a category's cleaned table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanedConference {
    pub id: i64,
    pub abbreviation: String,
    pub name: String,
    pub dates: String,
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub location: String,
    pub cfp: String,
    pub past_submission_deadline: bool,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_slug_and_tables() {
        let cat = Category::new("Machine Learning").expect("valid category");
        assert_eq!(cat.label(), "Machine Learning");
        assert_eq!(cat.slug(), "machine_learning");
        assert_eq!(cat.raw_table().as_str(), "scraped_conferences_machine_learning");
        assert_eq!(
            cat.cleaned_table().quoted(),
            "\"scraped_conferences_cleaned_machine_learning\""
        );
    }

    #[test]
    fn category_rejects_unsafe_labels() {
        assert!(Category::new("robotics\"; DROP TABLE x; --").is_err());
        assert!(Category::new("e-learning").is_err());
        assert!(Category::new("   ").is_err());
    }

    #[test]
    fn boundary_detection_counts_cells() {
        assert!(RawRow::new(0, "Expired CFPs").is_boundary());
        assert!(RawRow::new(0, "").is_boundary());
        assert!(!RawRow::new(0, "ABC||||Conf One").is_boundary());
        assert!(!RawRow::new(0, "||||").is_boundary());
    }

    #[test]
    fn raw_row_cells_split_on_delimiter() {
        let row = RawRow::new(3, "Jan 1, 2024 - Jan 3, 2024||||New York||||Dec 1, 2023");
        assert_eq!(
            row.cells(),
            vec!["Jan 1, 2024 - Jan 3, 2024", "New York", "Dec 1, 2023"]
        );
    }
}
