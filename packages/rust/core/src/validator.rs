//! Acceptance rules for geocoded records.

use std::fmt;

use serde::Serialize;

use confmap_shared::{AcceptedConference, ConferenceRecord};

/// Why a record was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// No coordinates: sentinel location, unknown place, or failed lookup.
    NoLocation,
    /// Start or end date missing.
    BadDates,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoLocation => "no_location",
            Self::BadDates => "bad_dates",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of validating one record.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accepted(AcceptedConference),
    Rejected(RejectionReason),
}

/// Accept a record only if it has coordinates and both dates.
///
/// Location is checked first, so a record missing both is `NoLocation`.
pub fn validate(record: ConferenceRecord) -> Verdict {
    let Some(coordinates) = record.coordinates else {
        return Verdict::Rejected(RejectionReason::NoLocation);
    };
    let (Some(start_date), Some(end_date)) = (record.start_date, record.end_date) else {
        return Verdict::Rejected(RejectionReason::BadDates);
    };

    Verdict::Accepted(AcceptedConference {
        abbreviation: record.abbreviation,
        name: record.name,
        dates: record.dates,
        start_date,
        end_date,
        location: record.location,
        cfp: record.cfp,
        coordinates,
        past_submission_deadline: record.past_submission_deadline,
    })
}

/// Per-category counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ValidationStats {
    pub seen: usize,
    pub accepted: usize,
    pub no_location: usize,
    pub bad_dates: usize,
}

impl ValidationStats {
    pub fn rejected(&self) -> usize {
        self.no_location + self.bad_dates
    }
}

/// Validates records and tallies the outcomes.
#[derive(Debug, Default)]
pub struct Validator {
    stats: ValidationStats,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, record: ConferenceRecord) -> Verdict {
        let verdict = validate(record);
        self.stats.seen += 1;
        match &verdict {
            Verdict::Accepted(_) => self.stats.accepted += 1,
            Verdict::Rejected(RejectionReason::NoLocation) => self.stats.no_location += 1,
            Verdict::Rejected(RejectionReason::BadDates) => self.stats.bad_dates += 1,
        }
        verdict
    }

    pub fn stats(&self) -> ValidationStats {
        self.stats
    }
}
