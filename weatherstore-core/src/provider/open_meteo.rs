use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;

use crate::{
    condition::ConditionCode,
    error::WeatherError,
    model::{Coordinate, QueryKind, RawLocation, RawObservation, RawPayload, floating_date},
    provider::{nominatim::ReverseGeocoder, require_date},
    units::TemperatureUnit,
};

use super::{ProviderLimits, WeatherProvider};

const FORECAST_URL: &str = "https://api.open-meteo.com";
const ARCHIVE_URL: &str = "https://archive-api.open-meteo.com";

/// Longest forecast the API serves.
const MAX_FORECAST_DAYS: u32 = 16;
/// The archive reaches back to 1940.
const HISTORY_DAYS: u32 = 365 * 85;
const EARLIEST_ARCHIVE_YEAR: i32 = 1940;
/// Years averaged for almanac normals.
const ALMANAC_YEARS: i32 = 10;

const DAILY_FIELDS: &str =
    "weather_code,temperature_2m_max,temperature_2m_min,precipitation_probability_max,sunrise,sunset";
const HOURLY_FIELDS: &str = "temperature_2m,weather_code,precipitation_probability,is_day";
const ARCHIVE_DAILY_FIELDS: &str =
    "weather_code,temperature_2m_max,temperature_2m_min,temperature_2m_mean,sunrise,sunset";
const ARCHIVE_HOURLY_FIELDS: &str = "temperature_2m,weather_code,is_day";

#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    http: Client,
    forecast_base: String,
    archive_base: String,
    geocoder: Option<ReverseGeocoder>,
    timeout: Duration,
    limits: ProviderLimits,
}

impl OpenMeteoProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http: Client::builder().timeout(timeout).build().unwrap_or_default(),
            forecast_base: FORECAST_URL.to_string(),
            archive_base: ARCHIVE_URL.to_string(),
            geocoder: None,
            timeout,
            limits: ProviderLimits {
                forecast_days: MAX_FORECAST_DAYS,
                history_days: HISTORY_DAYS,
            },
        }
    }

    pub fn with_base_urls(mut self, forecast: impl Into<String>, archive: impl Into<String>) -> Self {
        self.forecast_base = forecast.into();
        self.archive_base = archive.into();
        self
    }

    /// Resolve place names through Nominatim.
    pub fn with_reverse_geocoding(self) -> Self {
        let geocoder = ReverseGeocoder::new(self.timeout);
        self.with_geocoder(geocoder)
    }

    pub fn with_geocoder(mut self, geocoder: ReverseGeocoder) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = ProviderLimits {
            forecast_days: limits.forecast_days.min(MAX_FORECAST_DAYS),
            history_days: limits.history_days,
        };
        self
    }

    async fn get<T: DeserializeOwned>(
        &self,
        kind: QueryKind,
        context: &str,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, WeatherError> {
        let res = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| WeatherError::from_transport(kind, context, e))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| WeatherError::from_transport(kind, context, e))?;

        if !status.is_success() {
            return Err(WeatherError::from_status(kind, context, status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| WeatherError::InvalidPayload(format!("{context}: failed to parse JSON: {e}")))
    }

    fn base_query(coordinate: Coordinate) -> Vec<(&'static str, String)> {
        vec![
            ("latitude", coordinate.latitude.to_string()),
            ("longitude", coordinate.longitude.to_string()),
            ("timezone", "auto".to_string()),
            ("timeformat", "unixtime".to_string()),
        ]
    }

    async fn forecast_api(
        &self,
        kind: QueryKind,
        context: &str,
        coordinate: Coordinate,
        extra: &[(&'static str, String)],
    ) -> Result<OmResponse, WeatherError> {
        let mut query = Self::base_query(coordinate);
        query.extend_from_slice(extra);
        let url = format!("{}/v1/forecast", self.forecast_base);
        self.get(kind, context, &url, &query).await
    }

    async fn archive_api(
        &self,
        kind: QueryKind,
        context: &str,
        coordinate: Coordinate,
        start: NaiveDate,
        end: NaiveDate,
        extra: &[(&'static str, String)],
    ) -> Result<OmResponse, WeatherError> {
        let mut query = Self::base_query(coordinate);
        query.push(("start_date", start.to_string()));
        query.push(("end_date", end.to_string()));
        query.extend_from_slice(extra);
        let url = format!("{}/v1/archive", self.archive_base);
        self.get(kind, context, &url, &query).await
    }

    async fn fetch_current(&self, coordinate: Coordinate) -> Result<RawPayload, WeatherError> {
        let parsed = self
            .forecast_api(
                QueryKind::Current,
                "Open-Meteo current conditions",
                coordinate,
                &[
                    ("current", "temperature_2m,weather_code,is_day".to_string()),
                    ("daily", DAILY_FIELDS.to_string()),
                    ("forecast_days", "1".to_string()),
                ],
            )
            .await?;

        let current = parsed.current.as_ref().ok_or_else(|| {
            WeatherError::InvalidPayload("Open-Meteo response contained no current block".into())
        })?;
        let time = unix_to_utc(current.time)?;

        let mut obs = RawObservation::new(time, TemperatureUnit::Celsius);
        obs.temperature = current.temperature_2m;
        obs.condition_code = current
            .weather_code
            .map(|code| condition_from_wmo(code, current.is_day != Some(0)).code());

        if let Some(today) = parsed
            .daily
            .as_ref()
            .and_then(|daily| daily_observations(daily, parsed.utc_offset_seconds).ok())
            .and_then(|days| days.into_iter().next())
        {
            obs.temperature_high = today.temperature_high;
            obs.temperature_low = today.temperature_low;
            obs.precipitation_chance = today.precipitation_chance;
            obs.sunrise = today.sunrise;
            obs.sunset = today.sunset;
        }

        Ok(RawPayload {
            location: self.location(coordinate, &parsed).await,
            observations: vec![obs],
            hourly_detail: Vec::new(),
            utc_offset_seconds: parsed.utc_offset_seconds,
        })
    }

    async fn fetch_hourly(&self, coordinate: Coordinate) -> Result<RawPayload, WeatherError> {
        let parsed = self
            .forecast_api(
                QueryKind::Hourly,
                "Open-Meteo hourly forecast",
                coordinate,
                &[
                    ("hourly", HOURLY_FIELDS.to_string()),
                    ("forecast_days", "2".to_string()),
                ],
            )
            .await?;

        let observations = match &parsed.hourly {
            Some(hourly) => hourly_observations(hourly)?,
            None => Vec::new(),
        };

        Ok(RawPayload {
            location: self.location(coordinate, &parsed).await,
            observations,
            hourly_detail: Vec::new(),
            utc_offset_seconds: parsed.utc_offset_seconds,
        })
    }

    async fn fetch_daily(&self, coordinate: Coordinate) -> Result<RawPayload, WeatherError> {
        let parsed = self
            .forecast_api(
                QueryKind::Daily,
                "Open-Meteo daily forecast",
                coordinate,
                &[
                    ("daily", DAILY_FIELDS.to_string()),
                    ("forecast_days", self.limits.forecast_days.max(1).to_string()),
                ],
            )
            .await?;

        let observations = match &parsed.daily {
            Some(daily) => daily_observations(daily, parsed.utc_offset_seconds)?,
            None => Vec::new(),
        };

        Ok(RawPayload {
            location: self.location(coordinate, &parsed).await,
            observations,
            hourly_detail: Vec::new(),
            utc_offset_seconds: parsed.utc_offset_seconds,
        })
    }

    async fn fetch_forecast_day(
        &self,
        coordinate: Coordinate,
        date: NaiveDate,
    ) -> Result<RawPayload, WeatherError> {
        let parsed = self
            .forecast_api(
                QueryKind::Forecast,
                "Open-Meteo forecast",
                coordinate,
                &[
                    ("daily", DAILY_FIELDS.to_string()),
                    ("hourly", HOURLY_FIELDS.to_string()),
                    ("start_date", date.to_string()),
                    ("end_date", date.to_string()),
                ],
            )
            .await?;

        self.day_payload(coordinate, &parsed).await
    }

    async fn fetch_historical(
        &self,
        coordinate: Coordinate,
        date: NaiveDate,
    ) -> Result<RawPayload, WeatherError> {
        let parsed = self
            .archive_api(
                QueryKind::Historical,
                "Open-Meteo archive",
                coordinate,
                date,
                date,
                &[
                    ("daily", ARCHIVE_DAILY_FIELDS.to_string()),
                    ("hourly", ARCHIVE_HOURLY_FIELDS.to_string()),
                ],
            )
            .await?;

        let payload = self.day_payload(coordinate, &parsed).await?;
        // the archive lags a few days behind and answers with nulls meanwhile
        let has_data = payload.observations.iter().any(|obs| {
            obs.temperature_high.is_some() || obs.temperature_low.is_some() || obs.condition_code.is_some()
        });
        if !has_data {
            return Err(WeatherError::not_found(
                QueryKind::Historical,
                format!("Open-Meteo archive has no data for {date} yet"),
            ));
        }
        Ok(payload)
    }

    async fn fetch_almanac(
        &self,
        coordinate: Coordinate,
        date: NaiveDate,
    ) -> Result<RawPayload, WeatherError> {
        // the ten complete years before the requested one
        let last_year = date.year() - 1;
        let first_year = (last_year - ALMANAC_YEARS + 1).max(EARLIEST_ARCHIVE_YEAR);

        let (Some(start), Some(end)) = (
            NaiveDate::from_ymd_opt(first_year, 1, 1),
            NaiveDate::from_ymd_opt(last_year, 12, 31),
        ) else {
            return Err(WeatherError::not_found(QueryKind::Almanac, format!("no reference years for {date}")));
        };
        if end < start {
            return Err(WeatherError::not_found(QueryKind::Almanac, format!("no reference years for {date}")));
        }

        let parsed = self
            .archive_api(
                QueryKind::Almanac,
                "Open-Meteo almanac",
                coordinate,
                start,
                end,
                &[("daily", "temperature_2m_max,temperature_2m_min,temperature_2m_mean".to_string())],
            )
            .await?;

        let daily = parsed.daily.as_ref().ok_or_else(|| {
            WeatherError::not_found(QueryKind::Almanac, "Open-Meteo archive returned no daily data")
        })?;

        let mut highs = Vec::new();
        let mut lows = Vec::new();
        let mut means = Vec::new();
        for (i, &t) in daily.time.iter().enumerate() {
            let day = local_date(t, parsed.utc_offset_seconds)?;
            if day.month() != date.month() || day.day() != date.day() {
                continue;
            }
            highs.extend(at(&daily.temperature_2m_max, i));
            lows.extend(at(&daily.temperature_2m_min, i));
            means.extend(at(&daily.temperature_2m_mean, i));
        }

        if highs.is_empty() && lows.is_empty() && means.is_empty() {
            return Err(WeatherError::not_found(
                QueryKind::Almanac,
                format!("no reference data for {:02}-{:02}", date.month(), date.day()),
            ));
        }

        let mut obs = RawObservation::new(floating_date(date), TemperatureUnit::Celsius);
        obs.temperature = average(&means);
        obs.temperature_high = average(&highs);
        obs.temperature_low = average(&lows);

        Ok(RawPayload {
            location: self.location(coordinate, &parsed).await,
            observations: vec![obs],
            hourly_detail: Vec::new(),
            utc_offset_seconds: parsed.utc_offset_seconds,
        })
    }

    async fn day_payload(
        &self,
        coordinate: Coordinate,
        parsed: &OmResponse,
    ) -> Result<RawPayload, WeatherError> {
        let observations = match &parsed.daily {
            Some(daily) => daily_observations(daily, parsed.utc_offset_seconds)?,
            None => Vec::new(),
        };
        let hourly_detail = match &parsed.hourly {
            Some(hourly) => hourly_observations(hourly)?,
            None => Vec::new(),
        };

        Ok(RawPayload {
            location: self.location(coordinate, parsed).await,
            observations,
            hourly_detail,
            utc_offset_seconds: parsed.utc_offset_seconds,
        })
    }

    async fn location(&self, coordinate: Coordinate, parsed: &OmResponse) -> RawLocation {
        let mut location = RawLocation {
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            timezone: parsed.timezone.clone(),
            ..RawLocation::default()
        };
        if let Some(geocoder) = &self.geocoder {
            geocoder.annotate(coordinate, &mut location).await;
        }
        location
    }
}

#[derive(Debug, Deserialize)]
struct OmResponse {
    timezone: Option<String>,
    #[serde(default)]
    utc_offset_seconds: i64,
    current: Option<OmCurrent>,
    hourly: Option<OmHourly>,
    daily: Option<OmDaily>,
}

#[derive(Debug, Deserialize)]
struct OmCurrent {
    time: i64,
    temperature_2m: Option<f64>,
    weather_code: Option<u32>,
    is_day: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct OmHourly {
    time: Vec<i64>,
    #[serde(default)]
    temperature_2m: Vec<Option<f64>>,
    #[serde(default)]
    weather_code: Vec<Option<u32>>,
    #[serde(default)]
    precipitation_probability: Vec<Option<f64>>,
    #[serde(default)]
    is_day: Vec<Option<u8>>,
}

#[derive(Debug, Deserialize)]
struct OmDaily {
    time: Vec<i64>,
    #[serde(default)]
    weather_code: Vec<Option<u32>>,
    #[serde(default)]
    temperature_2m_max: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    temperature_2m_mean: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability_max: Vec<Option<f64>>,
    #[serde(default)]
    sunrise: Vec<Option<i64>>,
    #[serde(default)]
    sunset: Vec<Option<i64>>,
}

#[async_trait]
impl WeatherProvider for OpenMeteoProvider {
    fn id(&self) -> &'static str {
        "openmeteo"
    }

    fn limits(&self) -> ProviderLimits {
        self.limits
    }

    async fn fetch(
        &self,
        kind: QueryKind,
        coordinate: Coordinate,
        date: Option<NaiveDate>,
    ) -> Result<RawPayload, WeatherError> {
        match kind {
            QueryKind::Current => self.fetch_current(coordinate).await,
            QueryKind::Hourly => self.fetch_hourly(coordinate).await,
            QueryKind::Daily => self.fetch_daily(coordinate).await,
            QueryKind::Forecast => self.fetch_forecast_day(coordinate, require_date(kind, date)?).await,
            QueryKind::Historical => self.fetch_historical(coordinate, require_date(kind, date)?).await,
            QueryKind::Almanac => self.fetch_almanac(coordinate, require_date(kind, date)?).await,
        }
    }
}

/// Map a WMO weather interpretation code onto the condition catalog.
pub fn condition_from_wmo(code: u32, is_day: bool) -> ConditionCode {
    match code {
        0 if is_day => ConditionCode::Sunny,
        0 => ConditionCode::ClearNight,
        1 if is_day => ConditionCode::FairDay,
        1 => ConditionCode::FairNight,
        2 if is_day => ConditionCode::PartlyCloudyDay,
        2 => ConditionCode::PartlyCloudyNight,
        3 => ConditionCode::Cloudy,
        45 | 48 => ConditionCode::Foggy,
        51 | 53 | 55 => ConditionCode::Drizzle,
        56 | 57 => ConditionCode::FreezingDrizzle,
        61 | 63 | 65 | 82 => ConditionCode::Showers,
        66 | 67 => ConditionCode::FreezingRain,
        71 => ConditionCode::LightSnowShowers,
        73 => ConditionCode::Snow,
        75 => ConditionCode::HeavySnow,
        77 => ConditionCode::SnowFlurries,
        80 | 81 => ConditionCode::ScatteredShowers,
        85 => ConditionCode::ScatteredSnowShowers,
        86 => ConditionCode::SnowShowers,
        95 | 96 => ConditionCode::Thunderstorms,
        99 => ConditionCode::SevereThunderstorms,
        _ => ConditionCode::NotAvailable,
    }
}

fn hourly_observations(hourly: &OmHourly) -> Result<Vec<RawObservation>, WeatherError> {
    hourly
        .time
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let mut obs = RawObservation::new(unix_to_utc(t)?, TemperatureUnit::Celsius);
            let is_day = at(&hourly.is_day, i) != Some(0);
            obs.temperature = at(&hourly.temperature_2m, i);
            obs.condition_code = at(&hourly.weather_code, i).map(|c| condition_from_wmo(c, is_day).code());
            obs.precipitation_chance = at(&hourly.precipitation_probability, i).map(|p| p / 100.0);
            Ok(obs)
        })
        .collect()
}

fn daily_observations(daily: &OmDaily, utc_offset: i64) -> Result<Vec<RawObservation>, WeatherError> {
    daily
        .time
        .iter()
        .enumerate()
        .map(|(i, &t)| {
            let day = local_date(t, utc_offset)?;
            let mut obs = RawObservation::new(floating_date(day), TemperatureUnit::Celsius);
            obs.temperature = at(&daily.temperature_2m_mean, i);
            obs.temperature_high = at(&daily.temperature_2m_max, i);
            obs.temperature_low = at(&daily.temperature_2m_min, i);
            obs.condition_code = at(&daily.weather_code, i).map(|c| condition_from_wmo(c, true).code());
            obs.precipitation_chance = at(&daily.precipitation_probability_max, i).map(|p| p / 100.0);
            obs.sunrise = at(&daily.sunrise, i).and_then(|s| DateTime::from_timestamp(s, 0));
            obs.sunset = at(&daily.sunset, i).and_then(|s| DateTime::from_timestamp(s, 0));
            Ok(obs)
        })
        .collect()
}

fn at<T: Copy>(values: &[Option<T>], idx: usize) -> Option<T> {
    values.get(idx).copied().flatten()
}

fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn unix_to_utc(ts: i64) -> Result<DateTime<Utc>, WeatherError> {
    DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| WeatherError::InvalidPayload(format!("timestamp {ts} out of range")))
}

/// Calendar date of a local-midnight unix timestamp.
fn local_date(ts: i64, utc_offset: i64) -> Result<NaiveDate, WeatherError> {
    Ok(unix_to_utc(ts + utc_offset)?.date_naive())
}
