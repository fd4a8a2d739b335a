use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use url::Url;

use crate::{
    condition::ConditionCode,
    error::WeatherError,
    units::{self, TemperatureUnit, celsius_from_fahrenheit, formatted_temperature},
};

/// A geographic point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn validate(&self) -> Result<Self, WeatherError> {
        if self.is_valid() {
            Ok(*self)
        } else {
            Err(WeatherError::InvalidCoordinate {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

impl std::fmt::Display for Coordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4},{:.4}", self.latitude, self.longitude)
    }
}

/// Which kind of weather a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKind {
    Current,
    Hourly,
    Daily,
    Forecast,
    Historical,
    Almanac,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Current => "current",
            QueryKind::Hourly => "hourly",
            QueryKind::Daily => "daily",
            QueryKind::Forecast => "forecast",
            QueryKind::Historical => "historical",
            QueryKind::Almanac => "almanac",
        }
    }

    /// Kinds that take a represented date.
    pub fn is_dated(&self) -> bool {
        matches!(self, QueryKind::Forecast | QueryKind::Historical | QueryKind::Almanac)
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encode a calendar day as 00:00 UTC of that day.
pub fn floating_date(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Location metadata as reported by a provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLocation {
    pub identifier: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub timezone: Option<String>,
    pub country: Option<String>,
    pub country_abbreviation: Option<String>,
    pub state: Option<String>,
    pub state_abbreviation: Option<String>,
    pub county: Option<String>,
    pub city: Option<String>,
}

/// One observation or forecast point as reported by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawObservation {
    pub time: DateTime<Utc>,
    /// Catalog code; `None` when the provider gave no condition.
    pub condition_code: Option<u32>,
    pub unit: TemperatureUnit,
    pub temperature: Option<f64>,
    pub temperature_high: Option<f64>,
    pub temperature_low: Option<f64>,
    /// Fraction in `[0, 1]`.
    pub precipitation_chance: Option<f64>,
    pub sunrise: Option<DateTime<Utc>>,
    pub sunset: Option<DateTime<Utc>>,
    pub image_small_url: Option<String>,
    pub image_large_url: Option<String>,
}

impl RawObservation {
    pub fn new(time: DateTime<Utc>, unit: TemperatureUnit) -> Self {
        Self {
            time,
            condition_code: None,
            unit,
            temperature: None,
            temperature_high: None,
            temperature_low: None,
            precipitation_chance: None,
            sunrise: None,
            sunset: None,
            image_small_url: None,
            image_large_url: None,
        }
    }
}

/// Everything a provider returns for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPayload {
    pub location: RawLocation,
    pub observations: Vec<RawObservation>,
    /// Hourly points backing daily observations, when the provider has them.
    #[serde(default)]
    pub hourly_detail: Vec<RawObservation>,
    /// Offset of the location's local time from UTC; hourly detail is
    /// grouped into local calendar days with it.
    #[serde(default)]
    pub utc_offset_seconds: i64,
}

/// An immutable, resolved location.
#[derive(Debug, Clone, Serialize)]
pub struct LocationRecord {
    identifier: String,
    coordinate: Coordinate,
    timezone: Option<String>,
    country: Option<String>,
    country_abbreviation: Option<String>,
    state: Option<String>,
    state_abbreviation: Option<String>,
    county: Option<String>,
    city: Option<String>,
    created_at: DateTime<Utc>,
}

impl LocationRecord {
    pub fn from_raw(raw: RawLocation, created_at: DateTime<Utc>) -> Self {
        let coordinate = Coordinate::new(raw.latitude, raw.longitude);
        Self {
            identifier: raw.identifier.unwrap_or_else(|| coordinate.to_string()),
            coordinate,
            timezone: raw.timezone,
            country: raw.country,
            country_abbreviation: raw.country_abbreviation,
            state: raw.state,
            state_abbreviation: raw.state_abbreviation,
            county: raw.county,
            city: raw.city,
            created_at,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn coordinate(&self) -> Coordinate {
        self.coordinate
    }

    pub fn timezone(&self) -> Option<&str> {
        self.timezone.as_deref()
    }

    pub fn country(&self) -> Option<&str> {
        self.country.as_deref()
    }

    pub fn country_abbreviation(&self) -> Option<&str> {
        self.country_abbreviation.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn state_abbreviation(&self) -> Option<&str> {
        self.state_abbreviation.as_deref()
    }

    pub fn county(&self) -> Option<&str> {
        self.county.as_deref()
    }

    pub fn city(&self) -> Option<&str> {
        self.city.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// "City, ST, Country", falling back to the coordinate.
    pub fn summary(&self) -> String {
        let parts: Vec<&str> = [
            self.city(),
            self.state_abbreviation().or(self.state()),
            self.country(),
        ]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();

        if parts.is_empty() {
            self.coordinate.to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl PartialEq for LocationRecord {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier && self.coordinate == other.coordinate
    }
}

/// An immutable snapshot of weather for one represented date.
///
/// Temperatures are stored in Celsius; Fahrenheit is derived on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherRecord {
    created_at: DateTime<Utc>,
    represented_date: DateTime<Utc>,
    temperature_celsius: Option<f64>,
    temperature_high_celsius: Option<f64>,
    temperature_low_celsius: Option<f64>,
    condition: ConditionCode,
    precipitation_chance: Option<f64>,
    sunrise: Option<DateTime<Utc>>,
    sunset: Option<DateTime<Utc>>,
    image_small_url: Option<Url>,
    image_large_url: Option<Url>,
    location: Arc<LocationRecord>,
}

impl WeatherRecord {
    /// Normalize one provider observation.
    ///
    /// `created_at` of `None` means the record describes the moment it was
    /// observed, so creation and represented date coincide.
    pub fn from_observation(
        obs: &RawObservation,
        location: Arc<LocationRecord>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Self, WeatherError> {
        let to_celsius = |value: Option<f64>| -> Result<Option<f64>, WeatherError> {
            match value {
                None => Ok(None),
                Some(v) if !v.is_finite() => Err(WeatherError::InvalidPayload(format!(
                    "non-finite temperature at {}",
                    obs.time
                ))),
                Some(v) => Ok(Some(match obs.unit {
                    TemperatureUnit::Celsius => v,
                    TemperatureUnit::Fahrenheit => celsius_from_fahrenheit(v),
                })),
            }
        };

        let temperature = to_celsius(obs.temperature)?;
        let high = to_celsius(obs.temperature_high)?;
        let low = to_celsius(obs.temperature_low)?;

        if let (Some(h), Some(l)) = (high, low) {
            if h < l {
                return Err(WeatherError::InvalidPayload(format!(
                    "temperature high {h} is below low {l} at {}",
                    obs.time
                )));
            }
        }

        if let Some(chance) = obs.precipitation_chance {
            if !(0.0..=1.0).contains(&chance) {
                return Err(WeatherError::InvalidPayload(format!(
                    "chance of precipitation {chance} outside [0, 1] at {}",
                    obs.time
                )));
            }
        }

        Ok(Self {
            created_at: created_at.unwrap_or(obs.time),
            represented_date: obs.time,
            temperature_celsius: temperature,
            temperature_high_celsius: high,
            temperature_low_celsius: low,
            condition: obs
                .condition_code
                .map(ConditionCode::from_code)
                .unwrap_or(ConditionCode::NotAvailable),
            precipitation_chance: obs.precipitation_chance,
            sunrise: obs.sunrise,
            sunset: obs.sunset,
            image_small_url: parse_url(obs.image_small_url.as_deref()),
            image_large_url: parse_url(obs.image_large_url.as_deref()),
            location,
        })
    }

    /// Copy of this record with `condition` replaced.
    pub(crate) fn with_condition(&self, condition: ConditionCode) -> Self {
        Self { condition, ..self.clone() }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn represented_date(&self) -> DateTime<Utc> {
        self.represented_date
    }

    pub fn condition(&self) -> ConditionCode {
        self.condition
    }

    pub fn precipitation_chance(&self) -> Option<f64> {
        self.precipitation_chance
    }

    pub fn sunrise(&self) -> Option<DateTime<Utc>> {
        self.sunrise
    }

    pub fn sunset(&self) -> Option<DateTime<Utc>> {
        self.sunset
    }

    pub fn image_small_url(&self) -> Option<&Url> {
        self.image_small_url.as_ref()
    }

    pub fn image_large_url(&self) -> Option<&Url> {
        self.image_large_url.as_ref()
    }

    pub fn location(&self) -> &Arc<LocationRecord> {
        &self.location
    }

    pub fn coordinate(&self) -> Coordinate {
        self.location.coordinate()
    }

    pub fn temperature_celsius(&self) -> Option<f64> {
        self.temperature_celsius
    }

    pub fn temperature_high_celsius(&self) -> Option<f64> {
        self.temperature_high_celsius
    }

    pub fn temperature_low_celsius(&self) -> Option<f64> {
        self.temperature_low_celsius
    }

    pub fn temperature_fahrenheit(&self) -> Option<f64> {
        self.temperature_celsius.map(units::fahrenheit_from_celsius)
    }

    pub fn temperature_high_fahrenheit(&self) -> Option<f64> {
        self.temperature_high_celsius.map(units::fahrenheit_from_celsius)
    }

    pub fn temperature_low_fahrenheit(&self) -> Option<f64> {
        self.temperature_low_celsius.map(units::fahrenheit_from_celsius)
    }

    pub fn temperature_in(&self, unit: TemperatureUnit) -> Option<f64> {
        self.temperature_celsius.map(|c| units::temperature_in(c, unit))
    }

    pub fn high_in(&self, unit: TemperatureUnit) -> Option<f64> {
        self.temperature_high_celsius.map(|c| units::temperature_in(c, unit))
    }

    pub fn low_in(&self, unit: TemperatureUnit) -> Option<f64> {
        self.temperature_low_celsius.map(|c| units::temperature_in(c, unit))
    }

    pub fn temperature_string(&self, unit: TemperatureUnit) -> Option<String> {
        self.temperature_celsius.map(|c| format_celsius(c, unit))
    }

    /// "H 25°C / L 14°C", or whichever bound is known.
    pub fn high_low_string(&self, unit: TemperatureUnit) -> Option<String> {
        let high = self.temperature_high_celsius.map(|c| format!("H {}", format_celsius(c, unit)));
        let low = self.temperature_low_celsius.map(|c| format!("L {}", format_celsius(c, unit)));
        match (high, low) {
            (Some(h), Some(l)) => Some(format!("{h} / {l}")),
            (h, l) => h.or(l),
        }
    }

    /// One-sentence description, e.g. "Sunny. 22°C, high 25°C, low 14°C.
    /// 20% chance of precipitation."
    pub fn natural_language(&self, unit: TemperatureUnit) -> String {
        let mut readings = Vec::new();
        if let Some(t) = self.temperature_celsius {
            readings.push(format_celsius(t, unit));
        }
        if let Some(h) = self.temperature_high_celsius {
            readings.push(format!("high {}", format_celsius(h, unit)));
        }
        if let Some(l) = self.temperature_low_celsius {
            readings.push(format!("low {}", format_celsius(l, unit)));
        }

        let mut sentence = format!("{}.", self.condition.short_name());
        if !readings.is_empty() {
            sentence.push(' ');
            sentence.push_str(&readings.join(", "));
            sentence.push('.');
        }
        if let Some(chance) = self.precipitation_chance {
            sentence.push_str(&format!(
                " {:.0}% chance of precipitation.",
                (chance * 100.0).round()
            ));
        }
        sentence
    }
}

fn format_celsius(celsius: f64, unit: TemperatureUnit) -> String {
    formatted_temperature(celsius, units::fahrenheit_from_celsius(celsius), unit)
}

fn parse_url(raw: Option<&str>) -> Option<Url> {
    let raw = raw?;
    match Url::parse(raw) {
        Ok(url) => Some(url),
        Err(e) => {
            tracing::debug!("Ignoring unparseable imagery URL {raw:?}: {e}");
            None
        }
    }
}
