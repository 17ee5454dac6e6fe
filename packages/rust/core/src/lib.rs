//! Core pipeline orchestration and domain logic for the conference mapper.
//!
//! This crate turns crawled listing rows into stored conferences:
//! [`parser`] pairs rows into records, [`geo`] resolves locations,
//! [`validator`] accepts or rejects, [`dedupe`] drops repeated names, and
//! [`pipeline`] runs those steps per category.

pub mod dedupe;
pub mod geo;
pub mod parser;
pub mod pipeline;
pub mod validator;

pub use geo::{GeoCache, GeoResolver, LayeredGeoCache, MemoryGeoCache};
pub use parser::{ParseOutcome, RecordPairParser, parse_rows};
pub use pipeline::{
    BatchOptions, BatchReport, CategoryReport, PipelineContext, ProgressReporter, SilentProgress,
    Stage, run_batch,
};
pub use validator::{RejectionReason, ValidationStats, Validator, Verdict};
