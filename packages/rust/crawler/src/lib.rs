//! Listing crawler for the conference directory.
//!
//! This crate provides:
//! - [`listing`]: row and pagination extraction for one listing page
//! - [`engine`]: the paginated, per-category crawler

pub mod engine;
pub mod listing;

pub use engine::{CrawlResult, ListingCrawler, ListingPages};
pub use listing::{ListingPage, extract_listing};
