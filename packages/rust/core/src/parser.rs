//! Reconstruction of conference records from raw listing rows.
//!
//! Each conference spans two rows: `abbreviation||||name` followed by
//! `dates||||location||||cfp`. A row with at most one cell marks the point
//! after which every listed deadline has passed. Pairing follows content,
//! so a boundary row shifts the pairing of everything after it.

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use confmap_shared::{ConferenceRecord, RawRow};

/// Date format used in listing date ranges and deadlines, e.g. `Jan 1, 2024`.
pub const LISTING_DATE_FORMAT: &str = "%b %d, %Y";

/// Separator between the two sides of a date range.
const DATE_RANGE_SEPARATOR: &str = " - ";

/// Lazily pairs rows into [`ConferenceRecord`] candidates.
///
/// Iteration stops at the end of input or at a dangling first row; the
/// latter is reported by [`RecordPairParser::truncated_at`].
pub struct RecordPairParser<'a> {
    rows: &'a [RawRow],
    idx: usize,
    past_deadline: bool,
    boundaries: usize,
    truncated_at: Option<usize>,
}

impl<'a> RecordPairParser<'a> {
    pub fn new(rows: &'a [RawRow]) -> Self {
        Self {
            rows,
            idx: 0,
            past_deadline: false,
            boundaries: 0,
            truncated_at: None,
        }
    }

    /// Boundary rows seen so far.
    pub fn boundaries(&self) -> usize {
        self.boundaries
    }

    /// Position of the unpaired row that ended parsing, if any.
    pub fn truncated_at(&self) -> Option<usize> {
        self.truncated_at
    }

    fn mark_boundary(&mut self, row: &RawRow) {
        debug!(position = row.position, "deadline boundary");
        self.past_deadline = true;
        self.boundaries += 1;
    }
}

impl Iterator for RecordPairParser<'_> {
    type Item = ConferenceRecord;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let first = self.rows.get(self.idx)?;
            if first.is_boundary() {
                self.mark_boundary(first);
                self.idx += 1;
                continue;
            }

            let Some(second) = self.rows.get(self.idx + 1) else {
                self.truncated_at = Some(first.position);
                self.idx = self.rows.len();
                return None;
            };

            // The detail row is taken as-is; only the head slot can hold a boundary.
            self.idx += 2;
            return Some(build_record(first, second, self.past_deadline));
        }
    }
}

/// Everything one parse pass produced.
#[derive(Debug, Clone, Default)]
pub struct ParseOutcome {
    pub records: Vec<ConferenceRecord>,
    pub boundaries: usize,
    pub truncated_at: Option<usize>,
}

/// Parse a full row sequence.
pub fn parse_rows(rows: &[RawRow]) -> ParseOutcome {
    let mut parser = RecordPairParser::new(rows);
    let records = parser.by_ref().collect();
    ParseOutcome {
        records,
        boundaries: parser.boundaries(),
        truncated_at: parser.truncated_at(),
    }
}

fn build_record(head: &RawRow, detail: &RawRow, past_deadline: bool) -> ConferenceRecord {
    let head_cells = head.cells();
    let detail_cells = detail.cells();
    let cell = |cells: &[&str], i: usize| cells.get(i).copied().unwrap_or_default().to_string();

    let dates = cell(&detail_cells, 0);
    let cfp = cell(&detail_cells, 2);
    let (start_date, end_date) = match parse_date_range(&dates) {
        Some((start, end)) => (Some(start), Some(end)),
        None => (None, None),
    };
    if !cfp.is_empty() && parse_listing_date(&cfp).is_none() {
        debug!(position = detail.position, cfp = %cfp, "unparseable deadline kept verbatim");
    }

    ConferenceRecord {
        abbreviation: cell(&head_cells, 0),
        name: cell(&head_cells, 1),
        dates,
        start_date,
        end_date,
        location: cell(&detail_cells, 1),
        cfp,
        coordinates: None,
        past_submission_deadline: past_deadline,
    }
}

/// Parse `Jan 1, 2024 - Jan 3, 2024` into midnight start and end timestamps.
///
/// Returns `None` unless the text has exactly two sides and both parse.
pub fn parse_date_range(text: &str) -> Option<(NaiveDateTime, NaiveDateTime)> {
    let mut sides = text.split(DATE_RANGE_SEPARATOR);
    let (Some(start), Some(end), None) = (sides.next(), sides.next(), sides.next()) else {
        return None;
    };
    Some((parse_listing_date(start)?, parse_listing_date(end)?))
}

/// Parse a single listing date at midnight.
pub fn parse_listing_date(text: &str) -> Option<NaiveDateTime> {
    NaiveDate::parse_from_str(text.trim(), LISTING_DATE_FORMAT)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
