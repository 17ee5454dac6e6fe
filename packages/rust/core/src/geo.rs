//! Location resolution with a name-keyed coordinate cache.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use confmap_geocoder::Geocoder;
use confmap_shared::{Coordinates, Result};
use confmap_storage::Storage;

/// Normalized names that never reach the geocoder.
pub const NON_GEOCODABLE: &[&str] = &[
    "virtual conference",
    "virtual",
    "online",
    "hybrid",
    "n/a",
    "",
    "publication",
];

/// Cache key for a location name: trimmed and lowercased.
pub fn normalize_location(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Whether a normalized name denotes no physical place.
pub fn is_non_geocodable(key: &str) -> bool {
    NON_GEOCODABLE.contains(&key)
}

/// Positive-only memo of resolved locations.
#[async_trait]
pub trait GeoCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Coordinates>>;
    async fn put(&self, key: &str, coords: Coordinates) -> Result<()>;
}

#[async_trait]
impl<T: GeoCache + ?Sized> GeoCache for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<Coordinates>> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, coords: Coordinates) -> Result<()> {
        (**self).put(key, coords).await
    }
}

/// The shared `geolocation_mapping` table.
#[async_trait]
impl GeoCache for Storage {
    async fn get(&self, key: &str) -> Result<Option<Coordinates>> {
        self.get_geocode(key).await
    }

    async fn put(&self, key: &str, coords: Coordinates) -> Result<()> {
        self.put_geocode(key, coords).await
    }
}

/// Process-local cache.
#[derive(Default)]
pub struct MemoryGeoCache {
    entries: RwLock<HashMap<String, Coordinates>>,
}

impl MemoryGeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl GeoCache for MemoryGeoCache {
    async fn get(&self, key: &str) -> Result<Option<Coordinates>> {
        Ok(self.entries.read().await.get(key).copied())
    }

    async fn put(&self, key: &str, coords: Coordinates) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), coords);
        Ok(())
    }
}

/// Memory in front of a slower backing cache.
///
/// Backing hits are copied into memory; writes go to both.
pub struct LayeredGeoCache<B> {
    memory: MemoryGeoCache,
    backing: B,
}

impl<B: GeoCache> LayeredGeoCache<B> {
    pub fn new(backing: B) -> Self {
        Self {
            memory: MemoryGeoCache::new(),
            backing,
        }
    }
}

#[async_trait]
impl<B: GeoCache> GeoCache for LayeredGeoCache<B> {
    async fn get(&self, key: &str) -> Result<Option<Coordinates>> {
        if let Some(coords) = self.memory.get(key).await? {
            return Ok(Some(coords));
        }
        let found = self.backing.get(key).await?;
        if let Some(coords) = found {
            self.memory.put(key, coords).await?;
        }
        Ok(found)
    }

    async fn put(&self, key: &str, coords: Coordinates) -> Result<()> {
        self.backing.put(key, coords).await?;
        self.memory.put(key, coords).await
    }
}

/// Resolves location names to coordinates, consulting the cache before
/// the external geocoder.
///
/// Only successful lookups are cached. Concurrent misses on the same name
/// may each reach the geocoder; the cache keeps whichever write lands last.
pub struct GeoResolver {
    cache: Arc<dyn GeoCache>,
    geocoder: Arc<dyn Geocoder>,
}

impl GeoResolver {
    pub fn new(cache: Arc<dyn GeoCache>, geocoder: Arc<dyn Geocoder>) -> Self {
        Self { cache, geocoder }
    }

    /// Coordinates for `name`, or `None` for unknown places.
    ///
    /// A cached entry always wins. Sentinel names without one resolve to
    /// `None` and never reach the geocoder. Geocoder failures are returned
    /// as errors, distinct from `None`.
    pub async fn resolve(&self, name: &str) -> Result<Option<Coordinates>> {
        let key = normalize_location(name);
        if let Some(coords) = self.cache.get(&key).await? {
            debug!(location = %key, "cache hit");
            return Ok(Some(coords));
        }

        if is_non_geocodable(&key) {
            debug!(location = %key, "not geocodable");
            return Ok(None);
        }

        debug!(location = %key, geocoder = self.geocoder.name(), "cache miss");
        let found = self.geocoder.geocode(&key).await?;
        if let Some(coords) = found {
            self.cache.put(&key, coords).await?;
        }
        Ok(found)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use confmap_shared::ConfMapError;
    use uuid::Uuid;

    /// Geocoder double answering from a fixed table and counting calls.
    pub(crate) struct TableGeocoder {
        pub places: HashMap<String, Coordinates>,
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl TableGeocoder {
        pub(crate) fn new(places: &[(&str, Coordinates)]) -> Self {
            Self {
                places: places
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(&[])
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Geocoder for TableGeocoder {
        async fn geocode(&self, query: &str) -> Result<Option<Coordinates>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ConfMapError::geo(query, "HTTP 503"));
            }
            Ok(self.places.get(query).copied())
        }

        fn name(&self) -> &str {
            "table"
        }
    }

    fn new_york() -> Coordinates {
        Coordinates::new(40.71, -74.0)
    }

    #[tokio::test]
    async fn resolves_once_per_normalized_name() {
        let geocoder = Arc::new(TableGeocoder::new(&[("new york", new_york())]));
        let cache = Arc::new(MemoryGeoCache::new());
        let resolver = GeoResolver::new(cache.clone(), geocoder.clone());

        assert_eq!(resolver.resolve("New York").await.unwrap(), Some(new_york()));
        assert_eq!(resolver.resolve("  new york ").await.unwrap(), Some(new_york()));
        assert_eq!(resolver.resolve("NEW YORK").await.unwrap(), Some(new_york()));
        assert_eq!(geocoder.calls(), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn sentinels_never_reach_geocoder() {
        let geocoder = Arc::new(TableGeocoder::new(&[("online", new_york())]));
        let cache = Arc::new(MemoryGeoCache::new());
        let resolver = GeoResolver::new(cache.clone(), geocoder.clone());

        for name in ["Virtual Conference", "ONLINE", " hybrid ", "N/A", "", "Publication", "virtual"] {
            assert_eq!(resolver.resolve(name).await.unwrap(), None, "{name:?}");
        }
        assert_eq!(geocoder.calls(), 0);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn cached_sentinel_entry_is_returned() {
        let geocoder = Arc::new(TableGeocoder::new(&[]));
        let cache = Arc::new(MemoryGeoCache::new());
        cache.put("virtual conference", new_york()).await.unwrap();
        let resolver = GeoResolver::new(cache, geocoder.clone());

        assert_eq!(
            resolver.resolve("Virtual Conference").await.unwrap(),
            Some(new_york())
        );
        assert_eq!(resolver.resolve("online").await.unwrap(), None);
        assert_eq!(geocoder.calls(), 0);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let geocoder = Arc::new(TableGeocoder::new(&[]));
        let cache = Arc::new(MemoryGeoCache::new());
        let resolver = GeoResolver::new(cache.clone(), geocoder.clone());

        assert_eq!(resolver.resolve("Atlantis").await.unwrap(), None);
        assert_eq!(resolver.resolve("Atlantis").await.unwrap(), None);
        assert_eq!(geocoder.calls(), 2);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn lookup_errors_propagate() {
        let resolver = GeoResolver::new(
            Arc::new(MemoryGeoCache::new()),
            Arc::new(TableGeocoder::failing()),
        );
        let err = resolver.resolve("Paris").await.unwrap_err();
        assert!(matches!(err, ConfMapError::GeoLookup { .. }));
    }

    #[tokio::test]
    async fn storage_cache_survives_resolvers() {
        let path = std::env::temp_dir().join(format!("confmap_geo_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&path).await.unwrap());

        let first = Arc::new(TableGeocoder::new(&[("new york", new_york())]));
        let resolver = GeoResolver::new(
            Arc::new(LayeredGeoCache::new(storage.clone())),
            first.clone(),
        );
        resolver.resolve("New York").await.unwrap();
        assert_eq!(first.calls(), 1);

        // A fresh memory layer still finds the stored entry.
        let second = Arc::new(TableGeocoder::new(&[]));
        let resolver = GeoResolver::new(
            Arc::new(LayeredGeoCache::new(storage.clone())),
            second.clone(),
        );
        assert_eq!(resolver.resolve("new york").await.unwrap(), Some(new_york()));
        assert_eq!(second.calls(), 0);
        assert_eq!(storage.get_geocode("new york").await.unwrap(), Some(new_york()));
    }

    #[tokio::test]
    async fn layered_cache_fills_memory_from_backing() {
        let backing = Arc::new(MemoryGeoCache::new());
        backing.put("rome", Coordinates::new(41.9, 12.5)).await.unwrap();
        let layered = LayeredGeoCache::new(backing.clone());

        assert_eq!(layered.memory.len().await, 0);
        assert!(layered.get("rome").await.unwrap().is_some());
        assert_eq!(layered.memory.len().await, 1);

        layered.put("oslo", Coordinates::new(59.9, 10.7)).await.unwrap();
        assert_eq!(backing.len().await, 2);
    }
}
