//! Temperature units and locale-based unit selection.

use serde::{Deserialize, Serialize};
use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

impl TemperatureUnit {
    pub const fn suffix(self) -> &'static str {
        match self {
            TemperatureUnit::Celsius => "°C",
            TemperatureUnit::Fahrenheit => "°F",
        }
    }
}

/// Unit preference as stored in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitPreference {
    #[default]
    Auto,
    Celsius,
    Fahrenheit,
}

impl UnitPreference {
    pub fn resolve(self, locale: &dyn LocaleProvider) -> TemperatureUnit {
        match self {
            UnitPreference::Auto => locale_unit(locale),
            UnitPreference::Celsius => TemperatureUnit::Celsius,
            UnitPreference::Fahrenheit => TemperatureUnit::Fahrenheit,
        }
    }
}

impl TryFrom<&str> for UnitPreference {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "auto" => Ok(UnitPreference::Auto),
            "c" | "celsius" => Ok(UnitPreference::Celsius),
            "f" | "fahrenheit" => Ok(UnitPreference::Fahrenheit),
            _ => Err(anyhow::anyhow!(
                "Unknown unit '{value}'. Supported units: auto, celsius, fahrenheit."
            )),
        }
    }
}

/// Supplies the active region code (ISO 3166 alpha-2, e.g. "US").
pub trait LocaleProvider: Send + Sync + Debug {
    fn current_region(&self) -> Option<String>;
}

/// Reads the region from the POSIX locale environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvLocale;

impl LocaleProvider for EnvLocale {
    fn current_region(&self) -> Option<String> {
        ["LC_ALL", "LC_MEASUREMENT", "LANG"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|value| !value.is_empty())
            .and_then(|value| region_from_locale(&value))
    }
}

/// A fixed region, for tests and explicit overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedRegion(pub String);

impl LocaleProvider for FixedRegion {
    fn current_region(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Extract the region from a locale string such as `en_US.UTF-8` or `fr-CA`.
pub fn region_from_locale(locale: &str) -> Option<String> {
    let base = locale.split(['.', '@']).next()?;
    let region = base.split(['_', '-']).nth(1)?;
    if region.len() == 2 && region.chars().all(|c| c.is_ascii_alphabetic()) {
        Some(region.to_ascii_uppercase())
    } else {
        None
    }
}

const FAHRENHEIT_REGIONS: &[&str] = &[
    "US", "BS", "BZ", "KY", "PW", "LR", "FM", "MH", "PR", "GU", "VI", "AS",
];

pub fn unit_for_region(region: &str) -> TemperatureUnit {
    if FAHRENHEIT_REGIONS.iter().any(|r| r.eq_ignore_ascii_case(region)) {
        TemperatureUnit::Fahrenheit
    } else {
        TemperatureUnit::Celsius
    }
}

pub fn locale_unit(locale: &dyn LocaleProvider) -> TemperatureUnit {
    locale
        .current_region()
        .map(|region| unit_for_region(&region))
        .unwrap_or(TemperatureUnit::Celsius)
}

pub fn fahrenheit_from_celsius(celsius: f64) -> f64 {
    celsius * 9.0 / 5.0 + 32.0
}

pub fn celsius_from_fahrenheit(fahrenheit: f64) -> f64 {
    (fahrenheit - 32.0) * 5.0 / 9.0
}

/// Convert a canonical Celsius value into `unit`.
pub fn temperature_in(celsius: f64, unit: TemperatureUnit) -> f64 {
    match unit {
        TemperatureUnit::Celsius => celsius,
        TemperatureUnit::Fahrenheit => fahrenheit_from_celsius(celsius),
    }
}

/// Render whichever of the two readings matches `unit`, rounded half away
/// from zero to a whole degree.
pub fn formatted_temperature(celsius: f64, fahrenheit: f64, unit: TemperatureUnit) -> String {
    let value = match unit {
        TemperatureUnit::Celsius => celsius,
        TemperatureUnit::Fahrenheit => fahrenheit,
    };
    // `+ 0.0` turns -0.0 into 0.0
    let rounded = value.round() + 0.0;
    format!("{rounded:.0}{}", unit.suffix())
}
