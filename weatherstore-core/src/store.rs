//! The orchestrating client: validation, caching and normalization around a
//! [`WeatherProvider`].

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

use crate::{
    Config,
    aggregate,
    cache::{CachePolicy, CoalescingCache},
    condition::ConditionCode,
    error::WeatherError,
    model::{Coordinate, LocationRecord, QueryKind, RawPayload, WeatherRecord, floating_date},
    provider::{self, ProviderId, ProviderLimits, WeatherProvider},
};

/// Source of "now" for date windows and record creation timestamps.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Per-kind lifetimes and key precision for [`WeatherStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreSettings {
    pub current_ttl: Duration,
    pub hourly_ttl: Duration,
    pub daily_ttl: Duration,
    pub forecast_ttl: Duration,
    pub historical_ttl: Duration,
    pub almanac_ttl: Duration,
    pub coordinate_precision: u32,
    pub cache: CachePolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        crate::config::CacheConfig::default().store_settings()
    }
}

impl StoreSettings {
    pub fn ttl(&self, kind: QueryKind) -> Duration {
        match kind {
            QueryKind::Current => self.current_ttl,
            QueryKind::Hourly => self.hourly_ttl,
            QueryKind::Daily => self.daily_ttl,
            QueryKind::Forecast => self.forecast_ttl,
            QueryKind::Historical => self.historical_ttl,
            QueryKind::Almanac => self.almanac_ttl,
        }
    }
}

/// Coordinates are bucketed so that nearby lookups share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    latitude: i64,
    longitude: i64,
    kind: QueryKind,
    date: Option<NaiveDate>,
}

impl CacheKey {
    fn new(coordinate: Coordinate, kind: QueryKind, date: Option<NaiveDate>, precision: u32) -> Self {
        let scale = 10f64.powi(precision as i32);
        Self {
            latitude: (coordinate.latitude * scale).round() as i64,
            longitude: (coordinate.longitude * scale).round() as i64,
            kind,
            date,
        }
    }
}

type Records = Arc<[WeatherRecord]>;

pub struct WeatherStore {
    provider: Arc<dyn WeatherProvider>,
    cache: CoalescingCache<CacheKey, Records>,
    settings: StoreSettings,
    clock: Arc<dyn Clock>,
}

impl Debug for WeatherStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherStore")
            .field("provider", &self.provider.id())
            .field("cache", &self.cache)
            .field("settings", &self.settings)
            .finish()
    }
}

impl WeatherStore {
    pub fn new(provider: Arc<dyn WeatherProvider>) -> Self {
        Self::with_settings(provider, StoreSettings::default())
    }

    pub fn with_settings(provider: Arc<dyn WeatherProvider>, settings: StoreSettings) -> Self {
        Self {
            provider,
            cache: CoalescingCache::new(settings.cache),
            settings,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build a store for the configured default provider.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        store_from_config(config, None)
    }

    pub fn provider_id(&self) -> &'static str {
        self.provider.id()
    }

    pub fn limits(&self) -> ProviderLimits {
        self.provider.limits()
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Conditions right now. The record's represented date is the
    /// observation time, which is also its creation time.
    #[tracing::instrument(skip(self), fields(provider = self.provider.id()))]
    pub async fn current_conditions(&self, coordinate: Coordinate) -> Result<WeatherRecord, WeatherError> {
        let coordinate = coordinate.validate()?;
        let records = self.records(QueryKind::Current, coordinate, None).await?;
        single(QueryKind::Current, &records)
    }

    /// Hourly points, ascending.
    #[tracing::instrument(skip(self), fields(provider = self.provider.id()))]
    pub async fn hourly_forecast(&self, coordinate: Coordinate) -> Result<Vec<WeatherRecord>, WeatherError> {
        let coordinate = coordinate.validate()?;
        let records = self.records(QueryKind::Hourly, coordinate, None).await?;
        Ok(records.to_vec())
    }

    /// One record per day, ascending.
    #[tracing::instrument(skip(self), fields(provider = self.provider.id()))]
    pub async fn daily_forecast(&self, coordinate: Coordinate) -> Result<Vec<WeatherRecord>, WeatherError> {
        let coordinate = coordinate.validate()?;
        let records = self.records(QueryKind::Daily, coordinate, None).await?;
        Ok(records.to_vec())
    }

    #[tracing::instrument(skip(self), fields(provider = self.provider.id()))]
    pub async fn forecast(&self, coordinate: Coordinate, date: NaiveDate) -> Result<WeatherRecord, WeatherError> {
        let coordinate = coordinate.validate()?;
        let today = self.clock.today();
        let horizon = self.provider.limits().forecast_days.max(1) - 1;
        check_window(QueryKind::Forecast, date, today, add_days(today, horizon))?;

        let records = self.records(QueryKind::Forecast, coordinate, Some(date)).await?;
        single(QueryKind::Forecast, &records)
    }

    #[tracing::instrument(skip(self), fields(provider = self.provider.id()))]
    pub async fn historical(&self, coordinate: Coordinate, date: NaiveDate) -> Result<WeatherRecord, WeatherError> {
        let coordinate = coordinate.validate()?;
        let today = self.clock.today();
        let earliest = sub_days(today, self.provider.limits().history_days);
        check_window(QueryKind::Historical, date, earliest, sub_days(today, 1))?;

        let records = self.records(QueryKind::Historical, coordinate, Some(date)).await?;
        single(QueryKind::Historical, &records)
    }

    /// Climatological normals for the calendar day of `date`, any year up
    /// to the end of next year.
    #[tracing::instrument(skip(self), fields(provider = self.provider.id()))]
    pub async fn almanac(&self, coordinate: Coordinate, date: NaiveDate) -> Result<WeatherRecord, WeatherError> {
        let coordinate = coordinate.validate()?;
        let next_year = self.clock.today().year() + 1;
        let latest = NaiveDate::from_ymd_opt(next_year, 12, 31).unwrap_or(NaiveDate::MAX);
        check_window(QueryKind::Almanac, date, NaiveDate::MIN, latest)?;
        let records = self.records(QueryKind::Almanac, coordinate, Some(date)).await?;
        single(QueryKind::Almanac, &records)
    }

    /// Route `date` to [`Self::historical`], [`Self::current_conditions`] or
    /// [`Self::forecast`] depending on whether it is before, equal to or
    /// after today.
    pub async fn weather(&self, coordinate: Coordinate, date: NaiveDate) -> Result<WeatherRecord, WeatherError> {
        let today = self.clock.today();
        match date.cmp(&today) {
            std::cmp::Ordering::Less => self.historical(coordinate, date).await,
            std::cmp::Ordering::Equal => self.current_conditions(coordinate).await,
            std::cmp::Ordering::Greater => self.forecast(coordinate, date).await,
        }
    }

    /// Dominant condition of the hourly forecast within `[start, end]`.
    #[tracing::instrument(skip(self), fields(provider = self.provider.id()))]
    pub async fn dominant_condition(
        &self,
        coordinate: Coordinate,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ConditionCode, WeatherError> {
        let coordinate = coordinate.validate()?;
        let records = self.records(QueryKind::Hourly, coordinate, None).await?;
        Ok(aggregate::dominant_condition(&records, start, end))
    }

    /// Forget every cached answer; fetches in flight still complete.
    pub fn clear_cache(&self) {
        tracing::debug!("clearing weather cache");
        self.cache.clear();
    }

    async fn records(
        &self,
        kind: QueryKind,
        coordinate: Coordinate,
        date: Option<NaiveDate>,
    ) -> Result<Records, WeatherError> {
        let key = CacheKey::new(coordinate, kind, date, self.settings.coordinate_precision);
        let provider = Arc::clone(&self.provider);
        let clock = Arc::clone(&self.clock);

        self.cache
            .get_or_fetch(key, self.settings.ttl(kind), move || async move {
                let payload = provider.fetch(kind, coordinate, date).await.inspect_err(|e| {
                    tracing::warn!(provider = provider.id(), %kind, %coordinate, "fetch failed: {e}");
                })?;
                normalize(kind, date, payload, clock.now())
            })
            .await
    }
}

/// Turn one provider payload into the records answering `kind`.
fn normalize(
    kind: QueryKind,
    date: Option<NaiveDate>,
    payload: RawPayload,
    now: DateTime<Utc>,
) -> Result<Records, WeatherError> {
    if payload.observations.is_empty() {
        return Err(WeatherError::not_found(kind, "provider returned no observations"));
    }

    let location = Arc::new(LocationRecord::from_raw(payload.location, now));
    let created_at = match kind {
        QueryKind::Current => None,
        _ => Some(now),
    };

    let mut records = payload
        .observations
        .iter()
        .map(|obs| WeatherRecord::from_observation(obs, Arc::clone(&location), created_at))
        .collect::<Result<Vec<_>, _>>()?;
    records.sort_by_key(WeatherRecord::represented_date);

    if !payload.hourly_detail.is_empty() {
        let mut hourly = payload
            .hourly_detail
            .iter()
            .map(|obs| WeatherRecord::from_observation(obs, Arc::clone(&location), created_at))
            .collect::<Result<Vec<_>, _>>()?;
        hourly.sort_by_key(WeatherRecord::represented_date);

        let by_day: HashMap<NaiveDate, ConditionCode> =
            aggregate::daily_conditions(&hourly, payload.utc_offset_seconds).into_iter().collect();
        for record in &mut records {
            if record.condition() != ConditionCode::NotAvailable {
                continue;
            }
            if let Some(condition) = by_day.get(&record.represented_date().date_naive()) {
                *record = record.with_condition(*condition);
            }
        }
    }

    if let Some(date) = date.filter(|_| kind.is_dated()) {
        records = select_date(kind, date, records)?;
    }

    Ok(records.into())
}

/// Keep the record for `date`, even when it is the only one returned.
fn select_date(
    kind: QueryKind,
    date: NaiveDate,
    records: Vec<WeatherRecord>,
) -> Result<Vec<WeatherRecord>, WeatherError> {
    let wanted = floating_date(date);
    records
        .into_iter()
        .find(|r| r.represented_date() == wanted)
        .map(|r| vec![r])
        .ok_or_else(|| WeatherError::not_found(kind, format!("no observation for {date}")))
}

fn single(kind: QueryKind, records: &[WeatherRecord]) -> Result<WeatherRecord, WeatherError> {
    records
        .last()
        .cloned()
        .ok_or_else(|| WeatherError::not_found(kind, "provider returned no observations"))
}

fn check_window(
    kind: QueryKind,
    date: NaiveDate,
    earliest: NaiveDate,
    latest: NaiveDate,
) -> Result<(), WeatherError> {
    if date < earliest || date > latest {
        return Err(WeatherError::DateOutOfRange { kind, date, earliest, latest });
    }
    Ok(())
}

fn add_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_add_days(Days::new(days.into())).unwrap_or(NaiveDate::MAX)
}

fn sub_days(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_days(Days::new(days.into())).unwrap_or(NaiveDate::MIN)
}

/// Build a store for `provider`, or the configured default when `None`.
pub fn store_from_config(config: &Config, provider_id: Option<ProviderId>) -> anyhow::Result<WeatherStore> {
    let provider = match provider_id {
        Some(id) => provider::provider_from_config(id, config)?,
        None => provider::default_provider_from_config(config)?,
    };
    Ok(WeatherStore::with_settings(provider, config.cache.store_settings()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{RawLocation, RawObservation},
        provider::memory::InMemoryProvider,
        units::TemperatureUnit,
    };
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 18, 12, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn seattle() -> Coordinate {
        Coordinate::new(47.6062, -122.3321)
    }

    fn obs(time: DateTime<Utc>, condition: ConditionCode) -> RawObservation {
        let mut obs = RawObservation::new(time, TemperatureUnit::Celsius);
        obs.condition_code = Some(condition.code());
        obs.temperature = Some(15.0);
        obs
    }

    fn payload(observations: Vec<RawObservation>) -> RawPayload {
        RawPayload {
            location: RawLocation {
                latitude: 47.61,
                longitude: -122.33,
                city: Some("Seattle".into()),
                ..RawLocation::default()
            },
            observations,
            hourly_detail: Vec::new(),
            utc_offset_seconds: 0,
        }
    }

    fn store(provider: Arc<InMemoryProvider>) -> WeatherStore {
        WeatherStore::new(provider).with_clock(Arc::new(FixedClock(now())))
    }

    #[tokio::test]
    async fn current_represented_date_equals_creation_date() {
        let observed = now() - chrono::Duration::minutes(7);
        let provider = Arc::new(
            InMemoryProvider::new()
                .with_response(QueryKind::Current, payload(vec![obs(observed, ConditionCode::Sunny)])),
        );

        let record = store(provider).current_conditions(seattle()).await.unwrap();
        assert_eq!(record.represented_date(), observed);
        assert_eq!(record.created_at(), record.represented_date());
        assert_eq!(record.condition(), ConditionCode::Sunny);
    }

    #[tokio::test]
    async fn invalid_coordinate_never_reaches_provider() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = store(provider.clone());

        let err = store.current_conditions(Coordinate::new(91.0, 0.0)).await.unwrap_err();
        assert!(matches!(err, WeatherError::InvalidCoordinate { .. }));

        let err = store.historical(Coordinate::new(0.0, 181.0), date(2026, 6, 17)).await.unwrap_err();
        assert!(matches!(err, WeatherError::InvalidCoordinate { .. }));

        let err = store.hourly_forecast(Coordinate::new(f64::NAN, 0.0)).await.unwrap_err();
        assert!(matches!(err, WeatherError::InvalidCoordinate { .. }));

        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test]
    async fn historical_outside_window_is_rejected() {
        let provider = Arc::new(
            InMemoryProvider::new().with_limits(ProviderLimits { forecast_days: 3, history_days: 7 }),
        );
        let store = store(provider.clone());

        let err = store.historical(seattle(), date(2026, 6, 10)).await.unwrap_err();
        assert_eq!(
            err,
            WeatherError::DateOutOfRange {
                kind: QueryKind::Historical,
                date: date(2026, 6, 10),
                earliest: date(2026, 6, 11),
                latest: date(2026, 6, 17),
            }
        );

        // today is not history yet
        let err = store.historical(seattle(), date(2026, 6, 18)).await.unwrap_err();
        assert!(matches!(err, WeatherError::DateOutOfRange { .. }));
        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test]
    async fn forecast_outside_horizon_is_rejected() {
        let provider = Arc::new(
            InMemoryProvider::new().with_limits(ProviderLimits { forecast_days: 3, history_days: 7 }),
        );
        let store = store(provider.clone());

        let err = store.forecast(seattle(), date(2026, 6, 21)).await.unwrap_err();
        assert!(matches!(err, WeatherError::DateOutOfRange { latest, .. } if latest == date(2026, 6, 20)));

        let err = store.forecast(seattle(), date(2026, 6, 17)).await.unwrap_err();
        assert!(matches!(err, WeatherError::DateOutOfRange { .. }));
        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_identical_requests_share_one_fetch() {
        let provider = Arc::new(
            InMemoryProvider::new()
                .with_latency(Duration::from_millis(200))
                .with_response(QueryKind::Current, payload(vec![obs(now(), ConditionCode::Cloudy)])),
        );
        let store = store(provider.clone());

        let (a, b) = tokio::join!(
            store.current_conditions(seattle()),
            store.current_conditions(seattle())
        );

        assert_eq!(provider.fetch_count(), 1);
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);
        assert!(Arc::ptr_eq(a.location(), b.location()));
    }

    #[tokio::test(start_paused = true)]
    async fn nearby_coordinates_share_a_cache_entry_until_ttl() {
        let provider = Arc::new(
            InMemoryProvider::new()
                .with_response(QueryKind::Current, payload(vec![obs(now(), ConditionCode::Cloudy)])),
        );
        let store = store(provider.clone());

        store.current_conditions(seattle()).await.unwrap();
        store.current_conditions(Coordinate::new(47.6058, -122.3324)).await.unwrap();
        assert_eq!(provider.fetch_count(), 1);

        tokio::time::advance(store.settings().current_ttl + Duration::from_secs(1)).await;
        store.current_conditions(seattle()).await.unwrap();
        assert_eq!(provider.fetch_count(), 2);
    }

    #[tokio::test]
    async fn hourly_records_are_ascending_and_share_location() {
        let base = Utc.with_ymd_and_hms(2026, 6, 18, 13, 0, 0).unwrap();
        let hours = vec![
            obs(base + chrono::Duration::hours(2), ConditionCode::Showers),
            obs(base, ConditionCode::Sunny),
            obs(base + chrono::Duration::hours(1), ConditionCode::Cloudy),
        ];
        let provider = Arc::new(InMemoryProvider::new().with_response(QueryKind::Hourly, payload(hours)));

        let records = store(provider).hourly_forecast(seattle()).await.unwrap();
        let times: Vec<_> = records.iter().map(WeatherRecord::represented_date).collect();
        assert!(times.windows(2).all(|w| w[0] < w[1]));
        assert!(records.iter().all(|r| Arc::ptr_eq(r.location(), records[0].location())));
        assert_eq!(records[0].location().city(), Some("Seattle"));
    }

    #[tokio::test]
    async fn daily_condition_is_derived_from_hourly_detail() {
        let day = date(2026, 6, 19);
        let mut summary = obs(floating_date(day), ConditionCode::Sunny);
        summary.condition_code = None;

        let mut raw = payload(vec![summary]);
        let start = floating_date(day) + chrono::Duration::hours(8);
        raw.hourly_detail = (0..10)
            .map(|h| {
                let condition = if h == 6 { ConditionCode::Tornado } else { ConditionCode::Sunny };
                obs(start + chrono::Duration::hours(h), condition)
            })
            .collect();

        let provider = Arc::new(InMemoryProvider::new().with_response(QueryKind::Daily, raw));
        let records = store(provider).daily_forecast(seattle()).await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].condition(), ConditionCode::Tornado);
        assert_eq!(records[0].created_at(), now());
    }

    #[tokio::test]
    async fn forecast_picks_the_requested_day() {
        let days = vec![
            obs(floating_date(date(2026, 6, 18)), ConditionCode::Sunny),
            obs(floating_date(date(2026, 6, 19)), ConditionCode::Snow),
        ];
        let provider = Arc::new(InMemoryProvider::new().with_response(QueryKind::Forecast, payload(days)));

        let record = store(provider).forecast(seattle(), date(2026, 6, 19)).await.unwrap();
        assert_eq!(record.condition(), ConditionCode::Snow);
        assert_eq!(record.represented_date(), floating_date(date(2026, 6, 19)));
    }

    #[tokio::test]
    async fn lone_observation_for_another_day_is_not_found() {
        let provider = Arc::new(InMemoryProvider::new().with_response(
            QueryKind::Forecast,
            payload(vec![obs(floating_date(date(2026, 6, 20)), ConditionCode::Snow)]),
        ));

        let err = store(provider).forecast(seattle(), date(2026, 6, 19)).await.unwrap_err();
        assert!(matches!(err, WeatherError::NotFound { kind: QueryKind::Forecast, .. }));
    }

    #[tokio::test]
    async fn daily_conditions_use_the_location_day() {
        // Tokyo, UTC+9: local midnight of the 19th is 15:00 UTC on the 18th
        let days = [date(2026, 6, 19), date(2026, 6, 20)];
        let summaries = days
            .iter()
            .map(|d| {
                let mut summary = obs(floating_date(*d), ConditionCode::Sunny);
                summary.condition_code = None;
                summary
            })
            .collect();

        let mut raw = payload(summaries);
        raw.utc_offset_seconds = 9 * 3600;
        let local_midnight = floating_date(days[0]) - chrono::Duration::hours(9);
        raw.hourly_detail = (0..48)
            .map(|h| {
                // 02:00 local on the 20th
                let condition = if h == 26 { ConditionCode::Tornado } else { ConditionCode::Sunny };
                obs(local_midnight + chrono::Duration::hours(h), condition)
            })
            .collect();

        let provider = Arc::new(InMemoryProvider::new().with_response(QueryKind::Daily, raw));
        let records = store(provider).daily_forecast(seattle()).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].condition(), ConditionCode::Sunny);
        assert_eq!(records[1].condition(), ConditionCode::Tornado);
    }

    #[tokio::test]
    async fn almanac_beyond_next_year_is_rejected() {
        let provider = Arc::new(InMemoryProvider::new());
        let store = store(provider.clone());

        let err = store.almanac(seattle(), date(2028, 1, 1)).await.unwrap_err();
        assert!(matches!(err, WeatherError::DateOutOfRange { latest, .. } if latest == date(2027, 12, 31)));
        assert_eq!(provider.fetch_count(), 0);
    }

    #[tokio::test]
    async fn weather_routes_by_date() {
        let provider = Arc::new(
            InMemoryProvider::new()
                .with_response(QueryKind::Historical, payload(vec![obs(floating_date(date(2026, 6, 17)), ConditionCode::Hail)]))
                .with_response(QueryKind::Current, payload(vec![obs(now(), ConditionCode::Sunny)]))
                .with_response(QueryKind::Forecast, payload(vec![obs(floating_date(date(2026, 6, 19)), ConditionCode::Windy)])),
        );
        let store = store(provider);

        let past = store.weather(seattle(), date(2026, 6, 17)).await.unwrap();
        let today = store.weather(seattle(), date(2026, 6, 18)).await.unwrap();
        let future = store.weather(seattle(), date(2026, 6, 19)).await.unwrap();

        assert_eq!(past.condition(), ConditionCode::Hail);
        assert_eq!(today.condition(), ConditionCode::Sunny);
        assert_eq!(future.condition(), ConditionCode::Windy);
    }

    #[tokio::test]
    async fn not_found_is_cached_but_unavailable_is_not() {
        let provider = Arc::new(
            InMemoryProvider::new()
                .with_response(QueryKind::Daily, payload(Vec::new()))
                .with_failure(QueryKind::Hourly, WeatherError::ProviderUnavailable("down".into())),
        );
        let store = store(provider.clone());

        for _ in 0..2 {
            let err = store.daily_forecast(seattle()).await.unwrap_err();
            assert!(matches!(err, WeatherError::NotFound { kind: QueryKind::Daily, .. }));
        }
        assert_eq!(provider.fetch_count(), 1);

        for _ in 0..2 {
            let err = store.hourly_forecast(seattle()).await.unwrap_err();
            assert!(err.is_retryable());
        }
        assert_eq!(provider.fetch_count(), 3);
    }

    #[tokio::test]
    async fn inconsistent_bounds_are_invalid_payload() {
        let mut bad = obs(now(), ConditionCode::Sunny);
        bad.temperature_high = Some(10.0);
        bad.temperature_low = Some(20.0);
        let provider = Arc::new(InMemoryProvider::new().with_response(QueryKind::Current, payload(vec![bad])));

        let err = store(provider).current_conditions(seattle()).await.unwrap_err();
        assert!(matches!(err, WeatherError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn dominant_condition_over_hourly_forecast() {
        let base = Utc.with_ymd_and_hms(2026, 6, 18, 13, 0, 0).unwrap();
        let hours = (0..6)
            .map(|h| {
                let condition = if h < 2 { ConditionCode::Showers } else { ConditionCode::Cloudy };
                obs(base + chrono::Duration::hours(h), condition)
            })
            .collect();
        let provider = Arc::new(InMemoryProvider::new().with_response(QueryKind::Hourly, payload(hours)));
        let store = store(provider);

        let all = store
            .dominant_condition(seattle(), base, base + chrono::Duration::hours(5))
            .await
            .unwrap();
        assert_eq!(all, ConditionCode::Cloudy);

        let morning = store
            .dominant_condition(seattle(), base, base + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(morning, ConditionCode::Showers);
    }

    #[tokio::test]
    async fn clear_cache_forces_refetch() {
        let provider = Arc::new(
            InMemoryProvider::new()
                .with_response(QueryKind::Almanac, payload(vec![obs(floating_date(date(2026, 3, 1)), ConditionCode::NotAvailable)])),
        );
        let store = store(provider.clone());

        store.almanac(seattle(), date(2026, 3, 1)).await.unwrap();
        store.almanac(seattle(), date(2026, 3, 1)).await.unwrap();
        assert_eq!(provider.fetch_count(), 1);

        store.clear_cache();
        store.almanac(seattle(), date(2026, 3, 1)).await.unwrap();
        assert_eq!(provider.fetch_count(), 2);
    }

    #[test]
    fn store_from_config_uses_cache_section() {
        let mut config = Config::default();
        config.cache.hourly_ttl_secs = 42;

        let store = store_from_config(&config, None).unwrap();
        assert_eq!(store.provider_id(), "openmeteo");
        assert_eq!(store.settings().ttl(QueryKind::Hourly), Duration::from_secs(42));
    }
}
