//! Nominatim search client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use confmap_shared::{ConfMapError, Coordinates, GeocoderConfig, Result};

use crate::Geocoder;

/// Maximum number of redirects to follow on a search request.
const MAX_REDIRECTS: usize = 3;

/// One search hit. Nominatim encodes coordinates as strings.
#[derive(Debug, Deserialize)]
struct Place {
    lat: String,
    lon: String,
}

/// Geocoder backed by a Nominatim `/search` endpoint.
///
/// Requests are spaced at least `min_interval` apart across all callers,
/// as the public instance allows one request per second.
pub struct NominatimGeocoder {
    client: Client,
    endpoint: Url,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl NominatimGeocoder {
    /// Build a client for the configured endpoint.
    pub fn new(config: &GeocoderConfig) -> Result<Self> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| {
            ConfMapError::config(format!("invalid geocoder endpoint {}: {e}", config.endpoint))
        })?;

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfMapError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            min_interval: config.min_interval,
            last_request: Mutex::new(None),
        })
    }

    /// Wait until the next request is allowed, then claim the slot.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    #[instrument(skip(self))]
    async fn geocode(&self, query: &str) -> Result<Option<Coordinates>> {
        self.throttle().await;

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("q", query), ("format", "jsonv2"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| ConfMapError::geo(query, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConfMapError::geo(query, format!("HTTP {status}")));
        }

        let places: Vec<Place> = response
            .json()
            .await
            .map_err(|e| ConfMapError::geo(query, format!("invalid response body: {e}")))?;

        let Some(place) = places.into_iter().next() else {
            debug!("no match");
            return Ok(None);
        };

        let lat = place
            .lat
            .parse::<f64>()
            .map_err(|e| ConfMapError::geo(query, format!("invalid latitude {:?}: {e}", place.lat)))?;
        let lon = place
            .lon
            .parse::<f64>()
            .map_err(|e| ConfMapError::geo(query, format!("invalid longitude {:?}: {e}", place.lon)))?;

        debug!(lat, lon, "resolved");
        Ok(Some(Coordinates::new(lat, lon)))
    }

    fn name(&self) -> &str {
        "nominatim"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn geocoder_for(server: &MockServer, min_interval: Duration) -> NominatimGeocoder {
        NominatimGeocoder::new(&GeocoderConfig {
            endpoint: format!("{}/search", server.uri()),
            user_agent: "confmap-test".into(),
            timeout: Duration::from_secs(5),
            min_interval,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn resolves_first_hit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "new york"))
            .and(query_param("format", "jsonv2"))
            .and(query_param("limit", "1"))
            .and(header_exists("user-agent"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"[{"place_id": 1, "lat": "40.7127281", "lon": "-74.0060152", "display_name": "New York"}]"#,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::ZERO);
        let coords = geocoder.geocode("new york").await.unwrap().expect("hit");
        assert!((coords.lat - 40.7127281).abs() < 1e-9);
        assert!((coords.lon + 74.0060152).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_result_is_none() {
        let server = MockServer::start().await;
        Mock::given(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::ZERO);
        assert!(geocoder.geocode("atlantis").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_error_is_lookup_failure() {
        let server = MockServer::start().await;
        Mock::given(path("/search"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::ZERO);
        let err = geocoder.geocode("paris").await.unwrap_err();
        assert!(matches!(err, ConfMapError::GeoLookup { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn malformed_coordinates_are_lookup_failures() {
        let server = MockServer::start().await;
        Mock::given(path("/search"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(r#"[{"lat": "north", "lon": "2.35"}]"#),
            )
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::ZERO);
        let err = geocoder.geocode("paris").await.unwrap_err();
        assert!(err.to_string().contains("invalid latitude"));
    }

    #[tokio::test]
    async fn requests_are_spaced() {
        let server = MockServer::start().await;
        Mock::given(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .expect(2)
            .mount(&server)
            .await;

        let geocoder = geocoder_for(&server, Duration::from_millis(200));
        let started = std::time::Instant::now();
        geocoder.geocode("a").await.unwrap();
        geocoder.geocode("b").await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
