use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use crate::{
    cache::CachePolicy,
    provider::{ProviderId, ProviderLimits},
    store::StoreSettings,
    units::UnitPreference,
};

/// Configuration for a single provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Overrides the provider's forecast horizon (e.g. for a paid plan).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_days: Option<u32>,
}

impl ProviderConfig {
    pub fn limits(&self, defaults: ProviderLimits) -> ProviderLimits {
        ProviderLimits {
            forecast_days: self.forecast_days.unwrap_or(defaults.forecast_days),
            history_days: self.history_days.unwrap_or(defaults.history_days),
        }
    }
}

/// Cache lifetimes and request handling, all in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub current_ttl_secs: u64,
    pub hourly_ttl_secs: u64,
    pub daily_ttl_secs: u64,
    pub forecast_ttl_secs: u64,
    pub historical_ttl_secs: u64,
    pub almanac_ttl_secs: u64,
    pub not_found_ttl_secs: u64,
    pub request_timeout_secs: u64,
    /// Decimal places kept when bucketing coordinates into cache keys.
    pub coordinate_precision: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            current_ttl_secs: 10 * 60,
            hourly_ttl_secs: 30 * 60,
            daily_ttl_secs: 3 * 60 * 60,
            forecast_ttl_secs: 3 * 60 * 60,
            historical_ttl_secs: 24 * 60 * 60,
            almanac_ttl_secs: 7 * 24 * 60 * 60,
            not_found_ttl_secs: 5 * 60,
            request_timeout_secs: 10,
            coordinate_precision: 2,
        }
    }
}

impl CacheConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            current_ttl: Duration::from_secs(self.current_ttl_secs),
            hourly_ttl: Duration::from_secs(self.hourly_ttl_secs),
            daily_ttl: Duration::from_secs(self.daily_ttl_secs),
            forecast_ttl: Duration::from_secs(self.forecast_ttl_secs),
            historical_ttl: Duration::from_secs(self.historical_ttl_secs),
            almanac_ttl: Duration::from_secs(self.almanac_ttl_secs),
            coordinate_precision: self.coordinate_precision.min(6),
            cache: CachePolicy {
                fetch_timeout: self.request_timeout(),
                not_found_ttl: Duration::from_secs(self.not_found_ttl_secs),
            },
        }
    }
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
///
/// ```toml
/// default_provider = "weatherapi"
/// units = "celsius"
///
/// [providers.weatherapi]
/// api_key = "..."
/// forecast_days = 10
///
/// [cache]
/// current_ttl_secs = 300
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Optional default provider id, e.g. "openmeteo" or "weatherapi".
    pub default_provider: Option<String>,

    #[serde(default)]
    pub units: UnitPreference,

    /// Look up place names for coordinates when the provider has none.
    #[serde(default)]
    pub reverse_geocode: bool,

    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    #[serde(default)]
    pub cache: CacheConfig,
}

impl Config {
    /// The default provider, or Open-Meteo when none is set since it needs
    /// no key.
    pub fn default_provider_id(&self) -> Result<ProviderId> {
        match self.default_provider.as_deref() {
            Some(s) => ProviderId::try_from(s),
            None => Ok(ProviderId::OpenMeteo),
        }
    }

    pub fn provider_config(&self, id: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(id.as_str())
    }

    /// Store default provider as string.
    pub fn set_default_provider(&mut self, id: ProviderId) {
        self.default_provider = Some(id.as_str().to_string());
    }

    /// Load config from disk, or return an empty default if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(cfg)
    }

    /// Save config to disk, creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_file_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weatherstore", "weatherstore")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Set or replace a provider API key, keeping its other settings. The
    /// first configured provider also becomes the default.
    pub fn upsert_provider_api_key(&mut self, provider_id: ProviderId, api_key: String) {
        self.providers
            .entry(provider_id.as_str().to_string())
            .or_default()
            .api_key = Some(api_key);

        if self.default_provider.is_none() {
            self.default_provider = Some(provider_id.to_string());
        }
    }

    /// Returns API key for a provider, if present.
    pub fn provider_api_key(&self, provider_id: ProviderId) -> Option<&str> {
        self.provider_config(provider_id).and_then(|cfg| cfg.api_key.as_deref())
    }

    /// Keyless providers are always usable.
    pub fn is_provider_configured(&self, provider_id: ProviderId) -> bool {
        !provider_id.requires_api_key() || self.provider_api_key(provider_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderId;

    #[test]
    fn default_provider_falls_back_to_openmeteo() {
        let cfg = Config::default();
        assert_eq!(cfg.default_provider_id().unwrap(), ProviderId::OpenMeteo);
    }

    #[test]
    fn unknown_default_provider_errors() {
        let cfg = Config { default_provider: Some("darksky".into()), ..Config::default() };
        let err = cfg.default_provider_id().unwrap_err();
        assert!(err.to_string().contains("Unknown provider"));
    }

    #[test]
    fn set_api_key_and_default_for_provider() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WEATHER_KEY".into());

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::WeatherApi);

        let key = cfg.provider_api_key(ProviderId::WeatherApi);
        assert_eq!(key, Some("WEATHER_KEY"));
        assert!(cfg.is_provider_configured(ProviderId::WeatherApi));
    }

    #[test]
    fn keyless_provider_is_always_configured() {
        let cfg = Config::default();
        assert!(cfg.is_provider_configured(ProviderId::OpenMeteo));
        assert!(!cfg.is_provider_configured(ProviderId::WeatherApi));
    }

    #[test]
    fn upsert_keeps_existing_default_and_limits() {
        let mut cfg = Config::default();
        cfg.set_default_provider(ProviderId::OpenMeteo);
        cfg.providers.insert(
            "weatherapi".into(),
            ProviderConfig { forecast_days: Some(14), ..ProviderConfig::default() },
        );

        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WEATHER_KEY".into());

        assert_eq!(cfg.default_provider_id().unwrap(), ProviderId::OpenMeteo);
        let settings = cfg.provider_config(ProviderId::WeatherApi).unwrap();
        assert_eq!(settings.forecast_days, Some(14));
        assert_eq!(settings.api_key.as_deref(), Some("WEATHER_KEY"));
    }

    #[test]
    fn set_default_provider_overrides_default() {
        let mut cfg = Config::default();

        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "WEATHER_KEY".into());
        cfg.set_default_provider(ProviderId::OpenMeteo);

        let default = cfg.default_provider_id().expect("default provider must exist");
        assert_eq!(default, ProviderId::OpenMeteo);
    }

    #[test]
    fn partial_cache_section_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            units = "fahrenheit"

            [cache]
            current_ttl_secs = 60
            "#,
        )
        .unwrap();

        assert_eq!(cfg.units, UnitPreference::Fahrenheit);
        assert_eq!(cfg.cache.current_ttl_secs, 60);
        assert_eq!(cfg.cache.hourly_ttl_secs, 30 * 60);

        let settings = cfg.cache.store_settings();
        assert_eq!(settings.current_ttl, Duration::from_secs(60));
        assert_eq!(settings.coordinate_precision, 2);
        assert_eq!(settings.cache.fetch_timeout, Duration::from_secs(10));
    }

    #[test]
    fn save_and_load_roundtrip_through_file() {
        let dir = std::env::temp_dir().join(format!("weatherstore-config-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut cfg = Config::default();
        cfg.upsert_provider_api_key(ProviderId::WeatherApi, "KEY".into());
        cfg.reverse_geocode = true;
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.provider_api_key(ProviderId::WeatherApi), Some("KEY"));
        assert!(loaded.reverse_geocode);
        assert_eq!(loaded.cache, CacheConfig::default());

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn limits_override_only_what_is_set() {
        let settings = ProviderConfig { history_days: Some(30), ..ProviderConfig::default() };
        let limits = settings.limits(ProviderLimits { forecast_days: 3, history_days: 7 });
        assert_eq!(limits, ProviderLimits { forecast_days: 3, history_days: 30 });
    }
}
