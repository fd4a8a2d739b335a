use crate::{
    Config, WeatherError,
    model::{Coordinate, QueryKind, RawPayload},
    provider::{open_meteo::OpenMeteoProvider, weatherapi::WeatherApiProvider},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::{convert::TryFrom, fmt::Debug, sync::Arc};

pub mod memory;
pub mod nominatim;
pub mod open_meteo;
pub mod weatherapi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenMeteo,
    WeatherApi,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenMeteo => "openmeteo",
            ProviderId::WeatherApi => "weatherapi",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[ProviderId::OpenMeteo, ProviderId::WeatherApi]
    }

    pub fn requires_api_key(&self) -> bool {
        matches!(self, ProviderId::WeatherApi)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "openmeteo" | "open-meteo" => Ok(ProviderId::OpenMeteo),
            "weatherapi" => Ok(ProviderId::WeatherApi),
            _ => Err(anyhow::anyhow!(
                "Unknown provider '{value}'. Supported providers: openmeteo, weatherapi."
            )),
        }
    }
}

/// How far a provider reaches into the future and the past, in days from
/// today.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderLimits {
    pub forecast_days: u32,
    pub history_days: u32,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self { forecast_days: 7, history_days: 7 }
    }
}

/// A source of raw weather payloads.
///
/// Implementations only talk to their backend; validation, caching and
/// normalization are done by [`crate::WeatherStore`].
#[async_trait]
pub trait WeatherProvider: Send + Sync + Debug {
    fn id(&self) -> &'static str;

    fn limits(&self) -> ProviderLimits {
        ProviderLimits::default()
    }

    /// `date` is set for [`QueryKind::is_dated`] kinds and `None` otherwise.
    async fn fetch(
        &self,
        kind: QueryKind,
        coordinate: Coordinate,
        date: Option<NaiveDate>,
    ) -> Result<RawPayload, WeatherError>;
}

pub(crate) fn require_date(kind: QueryKind, date: Option<NaiveDate>) -> Result<NaiveDate, WeatherError> {
    date.ok_or_else(|| WeatherError::InvalidPayload(format!("{kind} query issued without a date")))
}

/// Construct a provider from config and explicit ProviderId.
pub fn provider_from_config(
    id: ProviderId,
    config: &Config,
) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let settings = config.provider_config(id).cloned().unwrap_or_default();

    let provider: Arc<dyn WeatherProvider> = match id {
        ProviderId::OpenMeteo => {
            let mut provider = OpenMeteoProvider::new(config.cache.request_timeout());
            if config.reverse_geocode {
                provider = provider.with_reverse_geocoding();
            }
            let limits = settings.limits(provider.limits());
            Arc::new(provider.with_limits(limits))
        }
        ProviderId::WeatherApi => {
            let api_key = settings.api_key.as_deref().ok_or_else(|| {
                anyhow::anyhow!(
                    "No API key configured for provider '{id}'.\n\
                         Hint: run `weatherstore configure {id}` and enter your API key."
                )
            })?;
            let provider = WeatherApiProvider::new(api_key.to_owned(), config.cache.request_timeout());
            let limits = settings.limits(provider.limits());
            Arc::new(provider.with_limits(limits))
        }
    };

    Ok(provider)
}

/// Construct the default provider from config, using `default_provider` field.
pub fn default_provider_from_config(config: &Config) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let id = config.default_provider_id()?;
    provider_from_config(id, config)
}
