//! Reverse geocoding: fill in place names for a coordinate.
//! Uses Nominatim (OpenStreetMap) - free, no API key required.

use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::model::{Coordinate, RawLocation};

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";
const USER_AGENT: &str = concat!("weatherstore/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    osm_type: Option<String>,
    osm_id: Option<u64>,
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    county: Option<String>,
    state: Option<String>,
    #[serde(rename = "ISO3166-2-lvl4")]
    state_code: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReverseGeocoder {
    http: Client,
    base_url: String,
}

impl ReverseGeocoder {
    pub fn new(timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { http, base_url: NOMINATIM_URL.to_string() }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fill the naming fields of `location`.
    ///
    /// Place names are decoration: failures are logged and leave `location`
    /// untouched rather than failing the weather query.
    pub async fn annotate(&self, coordinate: Coordinate, location: &mut RawLocation) {
        let url = format!("{}/reverse", self.base_url);
        let lat = coordinate.latitude.to_string();
        let lon = coordinate.longitude.to_string();

        let response = match self
            .http
            .get(&url)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("zoom", "10"),
            ])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("Reverse geocode request failed: {}", e);
                return;
            }
        };

        if !response.status().is_success() {
            tracing::debug!("Reverse geocode returned status {}", response.status());
            return;
        }

        let body: NominatimResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                tracing::debug!("Reverse geocode parse error: {}", e);
                return;
            }
        };

        if let (Some(osm_type), Some(osm_id)) = (body.osm_type, body.osm_id) {
            location.identifier = Some(format!("osm:{osm_type}/{osm_id}"));
        }

        let Some(addr) = body.address else {
            return;
        };

        // Prefer city > town > village > municipality for the place name
        location.city = addr.city.or(addr.town).or(addr.village).or(addr.municipality);
        location.county = addr.county;
        location.state_abbreviation = addr
            .state_code
            .as_deref()
            .and_then(|code| code.split('-').nth(1))
            .map(str::to_string);
        location.state = addr.state;
        location.country = addr.country;
        location.country_abbreviation = addr.country_code.map(|c| c.to_ascii_uppercase());

        tracing::debug!("Reverse geocoded {} to {:?}", coordinate, location.city);
    }
}
