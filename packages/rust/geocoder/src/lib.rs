//! External geocoding collaborator.
//!
//! The pipeline only needs a lookup-by-name that answers with optional
//! coordinates; [`Geocoder`] is that seam, and [`NominatimGeocoder`] is the
//! default implementation backed by an OpenStreetMap Nominatim endpoint.

mod nominatim;

use async_trait::async_trait;
use confmap_shared::{Coordinates, Result};

pub use nominatim::NominatimGeocoder;

/// Lookup of a free-text place name.
///
/// `Ok(None)` means the service answered and knows no such place;
/// `Err` means the lookup itself failed.
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a place name to coordinates.
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>>;

    /// Human-readable service name for tracing.
    fn name(&self) -> &str;
}
