//! Name-based duplicate removal.
//!
//! Storage enforces one row per name on write; this module drops repeats
//! before a batch is written and repairs tables that predate the constraint.

use std::collections::HashSet;

use tracing::{info, instrument};

use confmap_shared::{AcceptedConference, Category, Result};
use confmap_storage::Storage;

/// Keep the first conference for each name, preserving order.
///
/// Returns the survivors and how many repeats were dropped.
pub fn retain_first_by_name(
    conferences: Vec<AcceptedConference>,
) -> (Vec<AcceptedConference>, usize) {
    let before = conferences.len();
    let mut seen = HashSet::new();
    let kept: Vec<_> = conferences
        .into_iter()
        .filter(|c| seen.insert(c.name.clone()))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

/// Remove stored duplicates for each category, keeping the earliest row.
///
/// Stops at the first storage error.
#[instrument(skip_all, fields(categories = categories.len()))]
pub async fn repair_duplicates(
    storage: &Storage,
    categories: &[Category],
) -> Result<Vec<(Category, u64)>> {
    let mut removed = Vec::with_capacity(categories.len());
    for category in categories {
        let count = storage.drop_duplicate_names(category).await?;
        removed.push((category.clone(), count));
    }
    let total: u64 = removed.iter().map(|(_, n)| n).sum();
    info!(total, "duplicate repair complete");
    Ok(removed)
}
