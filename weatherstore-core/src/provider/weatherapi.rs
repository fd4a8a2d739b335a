use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::{
    condition::ConditionCode,
    error::{WeatherError, truncate_body},
    model::{Coordinate, QueryKind, RawLocation, RawObservation, RawPayload, floating_date},
    provider::require_date,
    units::TemperatureUnit,
};

use super::{ProviderLimits, WeatherProvider};

const BASE_URL: &str = "https://api.weatherapi.com/v1";

#[derive(Debug, Clone)]
pub struct WeatherApiProvider {
    api_key: String,
    http: Client,
    base_url: String,
    limits: ProviderLimits,
}

impl WeatherApiProvider {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        Self {
            api_key,
            http: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url: BASE_URL.to_string(),
            // free plan
            limits: ProviderLimits { forecast_days: 3, history_days: 7 },
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_limits(mut self, limits: ProviderLimits) -> Self {
        self.limits = limits;
        self
    }

    async fn request(
        &self,
        kind: QueryKind,
        endpoint: &str,
        coordinate: Coordinate,
        extra: &[(&str, String)],
    ) -> Result<WaResponse, WeatherError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let context = format!("WeatherAPI {endpoint}");
        let q = format!("{},{}", coordinate.latitude, coordinate.longitude);

        let mut query: Vec<(&str, String)> =
            vec![("key", self.api_key.clone()), ("q", q), ("aqi", "no".to_string())];
        query.extend_from_slice(extra);

        let res = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| WeatherError::from_transport(kind, &context, e))?;

        let status = res.status();
        let body = res.text().await.map_err(|e| WeatherError::from_transport(kind, &context, e))?;

        if !status.is_success() {
            return Err(api_error(kind, &context, status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| WeatherError::InvalidPayload(format!("{context}: failed to parse JSON: {e}")))
    }

    async fn fetch_current(&self, coordinate: Coordinate) -> Result<RawPayload, WeatherError> {
        let parsed = self.request(QueryKind::Current, "forecast.json", coordinate, &[("days", "1".to_string())]).await?;
        let offset = parsed.location.utc_offset_seconds();

        let current = parsed.current.as_ref().ok_or_else(|| {
            WeatherError::InvalidPayload("WeatherAPI response contained no current block".into())
        })?;
        let time = current
            .last_updated_epoch
            .or(parsed.location.localtime_epoch)
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .ok_or_else(|| {
                WeatherError::InvalidPayload("WeatherAPI current block has no observation time".into())
            })?;

        let mut obs = RawObservation::new(time, TemperatureUnit::Celsius);
        obs.temperature = Some(current.temp_c);
        obs.condition_code = Some(condition_from_weatherapi(current.condition.code, current.is_day != 0).code());
        set_icons(&mut obs, &current.condition.icon);

        if let Some(today) = parsed.forecast.as_ref().and_then(|f| f.forecastday.first()) {
            obs.temperature_high = Some(today.day.maxtemp_c);
            obs.temperature_low = Some(today.day.mintemp_c);
            obs.precipitation_chance = today.day.precipitation_chance();
            let date = parse_date(&today.date)?;
            obs.sunrise = astro_time(date, &today.astro.sunrise, offset);
            obs.sunset = astro_time(date, &today.astro.sunset, offset);
        }

        Ok(RawPayload {
            location: parsed.location.to_raw(coordinate),
            observations: vec![obs],
            hourly_detail: Vec::new(),
            utc_offset_seconds: parsed.location.utc_offset_seconds(),
        })
    }

    async fn fetch_hourly(&self, coordinate: Coordinate) -> Result<RawPayload, WeatherError> {
        let parsed = self.request(QueryKind::Hourly, "forecast.json", coordinate, &[("days", "2".to_string())]).await?;

        let observations = parsed
            .forecast
            .iter()
            .flat_map(|f| f.forecastday.iter())
            .flat_map(|day| day.hour.iter())
            .map(WaHour::to_observation)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RawPayload {
            location: parsed.location.to_raw(coordinate),
            observations,
            hourly_detail: Vec::new(),
            utc_offset_seconds: parsed.location.utc_offset_seconds(),
        })
    }

    async fn fetch_days(
        &self,
        kind: QueryKind,
        endpoint: &str,
        coordinate: Coordinate,
        extra: &[(&str, String)],
    ) -> Result<RawPayload, WeatherError> {
        let parsed = self.request(kind, endpoint, coordinate, extra).await?;
        let offset = parsed.location.utc_offset_seconds();
        let days = parsed.forecast.map(|f| f.forecastday).unwrap_or_default();

        let mut observations = Vec::with_capacity(days.len());
        let mut hourly_detail = Vec::new();
        for day in &days {
            let date = parse_date(&day.date)?;
            let mut obs = RawObservation::new(floating_date(date), TemperatureUnit::Celsius);
            obs.temperature = day.day.avgtemp_c;
            obs.temperature_high = Some(day.day.maxtemp_c);
            obs.temperature_low = Some(day.day.mintemp_c);
            obs.precipitation_chance = day.day.precipitation_chance();
            obs.sunrise = astro_time(date, &day.astro.sunrise, offset);
            obs.sunset = astro_time(date, &day.astro.sunset, offset);
            set_icons(&mut obs, &day.day.condition.icon);

            // the day summary follows midday, so let the store derive the
            // condition from the hours when we have them
            if day.hour.is_empty() {
                obs.condition_code = Some(condition_from_weatherapi(day.day.condition.code, true).code());
            }
            for hour in &day.hour {
                hourly_detail.push(hour.to_observation()?);
            }
            observations.push(obs);
        }

        Ok(RawPayload {
            location: parsed.location.to_raw(coordinate),
            observations,
            hourly_detail,
            utc_offset_seconds: parsed.location.utc_offset_seconds(),
        })
    }
}

fn api_error(kind: QueryKind, context: &str, status: reqwest::StatusCode, body: &str) -> WeatherError {
    let Ok(envelope) = serde_json::from_str::<WaErrorEnvelope>(body) else {
        return WeatherError::from_status(kind, context, status, body);
    };
    let message = format!("{context}: {} (code {})", envelope.error.message, envelope.error.code);

    match envelope.error.code {
        1006 => WeatherError::NotFound { kind, detail: message },
        // quota exceeded and internal errors clear up on their own
        2007 | 9999 => WeatherError::ProviderUnavailable(message),
        1002 | 2006 | 2008 | 2009 => WeatherError::ProviderRejected(message),
        _ => WeatherError::ProviderRejected(format!("{message}: {}", truncate_body(body))),
    }
}

#[derive(Debug, Deserialize)]
struct WaErrorEnvelope {
    error: WaError,
}

#[derive(Debug, Deserialize)]
struct WaError {
    code: u32,
    message: String,
}

#[derive(Debug, Deserialize)]
struct WaLocation {
    name: String,
    region: Option<String>,
    country: String,
    tz_id: Option<String>,
    localtime_epoch: Option<i64>,
    localtime: Option<String>,
}

impl WaLocation {
    /// Offset of local time from UTC, recovered from `localtime` and its epoch.
    fn utc_offset_seconds(&self) -> i64 {
        let (Some(epoch), Some(local)) = (self.localtime_epoch, self.localtime.as_deref()) else {
            return 0;
        };
        let Ok(naive) = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M") else {
            return 0;
        };
        let diff = naive.and_utc().timestamp() - epoch;
        // `localtime` has minute precision; real offsets are multiples of 15 minutes
        (diff as f64 / 900.0).round() as i64 * 900
    }

    fn to_raw(&self, coordinate: Coordinate) -> RawLocation {
        RawLocation {
            identifier: None,
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            timezone: self.tz_id.clone(),
            country: Some(self.country.clone()),
            country_abbreviation: None,
            state: self.region.clone().filter(|r| !r.is_empty()),
            state_abbreviation: None,
            county: None,
            city: Some(self.name.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WaCondition {
    code: u32,
    #[serde(default)]
    icon: String,
}

#[derive(Debug, Deserialize)]
struct WaCurrent {
    temp_c: f64,
    #[serde(default = "default_is_day")]
    is_day: u8,
    condition: WaCondition,
    last_updated_epoch: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WaHour {
    time_epoch: i64,
    temp_c: f64,
    #[serde(default = "default_is_day")]
    is_day: u8,
    condition: WaCondition,
    chance_of_rain: Option<f64>,
    chance_of_snow: Option<f64>,
}

impl WaHour {
    fn to_observation(&self) -> Result<RawObservation, WeatherError> {
        let time = DateTime::from_timestamp(self.time_epoch, 0).ok_or_else(|| {
            WeatherError::InvalidPayload(format!("timestamp {} out of range", self.time_epoch))
        })?;
        let mut obs = RawObservation::new(time, TemperatureUnit::Celsius);
        obs.temperature = Some(self.temp_c);
        obs.condition_code = Some(condition_from_weatherapi(self.condition.code, self.is_day != 0).code());
        obs.precipitation_chance = max_chance(self.chance_of_rain, self.chance_of_snow);
        set_icons(&mut obs, &self.condition.icon);
        Ok(obs)
    }
}

#[derive(Debug, Deserialize)]
struct WaDay {
    maxtemp_c: f64,
    mintemp_c: f64,
    avgtemp_c: Option<f64>,
    daily_chance_of_rain: Option<f64>,
    daily_chance_of_snow: Option<f64>,
    condition: WaCondition,
}

impl WaDay {
    fn precipitation_chance(&self) -> Option<f64> {
        max_chance(self.daily_chance_of_rain, self.daily_chance_of_snow)
    }
}

#[derive(Debug, Deserialize)]
struct WaAstro {
    sunrise: String,
    sunset: String,
}

#[derive(Debug, Deserialize)]
struct WaForecastDay {
    date: String,
    day: WaDay,
    astro: WaAstro,
    #[serde(default)]
    hour: Vec<WaHour>,
}

#[derive(Debug, Deserialize)]
struct WaForecast {
    forecastday: Vec<WaForecastDay>,
}

#[derive(Debug, Deserialize)]
struct WaResponse {
    location: WaLocation,
    current: Option<WaCurrent>,
    forecast: Option<WaForecast>,
}

fn default_is_day() -> u8 {
    1
}

#[async_trait]
impl WeatherProvider for WeatherApiProvider {
    fn id(&self) -> &'static str {
        "weatherapi"
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
            QueryKind::Daily => {
                let days = self.limits.forecast_days.max(1).to_string();
                self.fetch_days(kind, "forecast.json", coordinate, &[("days", days)]).await
            }
            QueryKind::Forecast => {
                let dt = require_date(kind, date)?.to_string();
                self.fetch_days(kind, "forecast.json", coordinate, &[("dt", dt)]).await
            }
            QueryKind::Historical => {
                let dt = require_date(kind, date)?.to_string();
                self.fetch_days(kind, "history.json", coordinate, &[("dt", dt)]).await
            }
            QueryKind::Almanac => Err(WeatherError::not_found(
                QueryKind::Almanac,
                "WeatherAPI does not offer climatological normals",
            )),
        }
    }
}

/// Map a WeatherAPI.com condition code onto the condition catalog.
pub fn condition_from_weatherapi(code: u32, is_day: bool) -> ConditionCode {
    match code {
        1000 if is_day => ConditionCode::Sunny,
        1000 => ConditionCode::ClearNight,
        1003 if is_day => ConditionCode::PartlyCloudyDay,
        1003 => ConditionCode::PartlyCloudyNight,
        1006 if is_day => ConditionCode::MostlyCloudyDay,
        1006 => ConditionCode::MostlyCloudyNight,
        1009 => ConditionCode::Cloudy,
        1030 => ConditionCode::Haze,
        1135 | 1147 => ConditionCode::Foggy,
        1063 | 1240 => ConditionCode::ScatteredShowers,
        1180 | 1183 | 1186 | 1189 | 1192 | 1195 | 1243 | 1246 => ConditionCode::Showers,
        1150 | 1153 => ConditionCode::Drizzle,
        1072 | 1168 | 1171 => ConditionCode::FreezingDrizzle,
        1198 | 1201 => ConditionCode::FreezingRain,
        1069 | 1204 | 1207 | 1249 | 1252 => ConditionCode::Sleet,
        1237 | 1261 | 1264 => ConditionCode::Hail,
        1066 | 1210 | 1213 => ConditionCode::LightSnowShowers,
        1216 | 1219 => ConditionCode::Snow,
        1222 | 1225 => ConditionCode::HeavySnow,
        1255 => ConditionCode::ScatteredSnowShowers,
        1258 => ConditionCode::SnowShowers,
        1114 => ConditionCode::BlowingSnow,
        1117 => ConditionCode::HeavySnow,
        1087 => ConditionCode::IsolatedThunderstorms,
        1273 => ConditionCode::Thunderstorms,
        1276 => ConditionCode::SevereThunderstorms,
        1279 | 1282 => ConditionCode::MixedRainAndSnow,
        _ => ConditionCode::NotAvailable,
    }
}

fn max_chance(rain: Option<f64>, snow: Option<f64>) -> Option<f64> {
    match (rain, snow) {
        (Some(r), Some(s)) => Some(r.max(s) / 100.0),
        (r, s) => r.or(s).map(|c| c / 100.0),
    }
}

/// WeatherAPI icon paths are protocol-relative 64x64 images; a 128x128
/// variant lives next to each.
fn set_icons(obs: &mut RawObservation, icon: &str) {
    if icon.is_empty() {
        return;
    }
    let small = if icon.starts_with("//") { format!("https:{icon}") } else { icon.to_string() };
    obs.image_large_url = Some(small.replace("64x64", "128x128"));
    obs.image_small_url = Some(small);
}

fn parse_date(raw: &str) -> Result<NaiveDate, WeatherError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| WeatherError::InvalidPayload(format!("bad date {raw:?}: {e}")))
}

/// Convert a local "07:12 AM" on `date` to UTC. Polar days report
/// "No sunrise"/"No sunset", which yields `None`.
fn astro_time(date: NaiveDate, raw: &str, utc_offset: i64) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(raw.trim(), "%I:%M %p").ok()?;
    Some(date.and_time(time).and_utc() - ChronoDuration::seconds(utc_offset))
}
