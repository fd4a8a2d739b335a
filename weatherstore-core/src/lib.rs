//! Core library for the `weatherstore` CLI.
//!
//! This crate defines:
//! - The condition catalog and unit conversion
//! - Immutable weather and location records, and aggregation over them
//! - Abstraction over weather providers (Open-Meteo, WeatherAPI.com, in-memory)
//! - [`WeatherStore`], which validates queries, caches and coalesces provider
//!   fetches, and normalizes raw payloads into records
//! - Configuration & credentials handling
//!
//! It is used by `weatherstore-cli`, but can also be reused by other binaries or services.

pub mod aggregate;
pub mod cache;
pub mod condition;
pub mod config;
pub mod error;
pub mod model;
pub mod provider;
pub mod store;
pub mod units;

pub use condition::{ConditionCategory, ConditionCode, ConditionInfo};
pub use config::{CacheConfig, Config, ProviderConfig};
pub use error::WeatherError;
pub use model::{Coordinate, LocationRecord, QueryKind, WeatherRecord};
pub use provider::{ProviderId, ProviderLimits, WeatherProvider};
pub use store::{Clock, FixedClock, StoreSettings, SystemClock, WeatherStore, store_from_config};
pub use units::{LocaleProvider, TemperatureUnit, UnitPreference};
