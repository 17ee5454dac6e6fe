//! Shared types, error model, and configuration for the conference mapper.
//!
//! This crate is the foundation depended on by all other confmap crates.
//! It provides:
//! - [`ConfMapError`]: the unified error type
//! - Domain types ([`Category`], [`RawRow`], [`ConferenceRecord`], [`CleanedConference`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlSection, DEFAULT_CATEGORIES, DatabaseConfig, DatabaseSection,
    DatabaseTarget, GeocoderConfig, GeocoderSection, PipelineSection, config_dir,
    config_file_path, expand_home, init_config, load_config, load_config_from,
};
pub use error::{ConfMapError, Result};
pub use types::{
    AcceptedConference, CLEANED_TABLE_PREFIX, Category, CleanedConference, ConferenceRecord,
    Coordinates, RAW_TABLE_PREFIX, ROW_DELIMITER, RawRow, TableName,
};
