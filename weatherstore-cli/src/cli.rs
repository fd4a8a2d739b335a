use anyhow::{Context, anyhow};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use inquire::{Confirm, Password, PasswordDisplayMode, Select};
use weatherstore_core::{
    Config, ConditionCode, Coordinate, ProviderId, TemperatureUnit, UnitPreference, WeatherRecord,
    WeatherStore, condition::describe, store_from_config, units::EnvLocale,
};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weatherstore", version, about = "Coordinate-based weather lookups")]
pub struct Cli {
    /// Temperature units: auto, celsius or fahrenheit. Defaults to the configured preference.
    #[arg(long, global = true)]
    pub units: Option<String>,

    /// Print JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Provider to query instead of the configured default.
    #[arg(long, global = true)]
    pub provider: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Configure credentials and preferences for a specific provider.
    Configure {
        /// Provider short name, e.g. "openmeteo" or "weatherapi".
        provider: String,
    },

    /// Show weather for a location.
    Show {
        /// Location as "LAT,LON", e.g. "47.61,-122.33".
        #[arg(allow_hyphen_values = true)]
        location: String,

        /// Optional date (YYYY-MM-DD); if absent, means "now".
        #[arg(long)]
        date: Option<String>,
    },

    /// Current conditions.
    Current {
        /// Location as "LAT,LON".
        #[arg(allow_hyphen_values = true)]
        location: String,
    },

    /// Hourly forecast.
    Hourly {
        /// Location as "LAT,LON".
        #[arg(allow_hyphen_values = true)]
        location: String,
    },

    /// Daily forecast.
    Daily {
        /// Location as "LAT,LON".
        #[arg(allow_hyphen_values = true)]
        location: String,
    },

    /// Forecast for one future date.
    Forecast {
        /// Location as "LAT,LON".
        #[arg(allow_hyphen_values = true)]
        location: String,
        /// Date (YYYY-MM-DD).
        date: String,
    },

    /// Observed weather for one past date.
    History {
        /// Location as "LAT,LON".
        #[arg(allow_hyphen_values = true)]
        location: String,
        /// Date (YYYY-MM-DD).
        date: String,
    },

    /// Climatological normals for a calendar day.
    Almanac {
        /// Location as "LAT,LON".
        #[arg(allow_hyphen_values = true)]
        location: String,
        /// Date (YYYY-MM-DD).
        date: String,
    },

    /// The condition that dominates the next hours.
    Dominant {
        /// Location as "LAT,LON".
        #[arg(allow_hyphen_values = true)]
        location: String,
        #[arg(long, default_value_t = 12)]
        hours: u32,
    },

    /// List every known weather condition.
    Conditions,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config = Config::load()?;
        let unit = self.unit(&config)?;
        let output = Output { json: self.json, unit };

        match &self.command {
            Command::Configure { provider } => return configure(provider),
            Command::Conditions => return output.conditions(),
            _ => {}
        }

        let store = self.store(&config)?;
        tracing::debug!(provider = store.provider_id(), ?unit, "store ready");

        match self.command {
            Command::Configure { .. } | Command::Conditions => Ok(()),
            Command::Show { location, date } => {
                let coordinate = parse_coordinate(&location)?;
                match date {
                    Some(date) => output.record(&store.weather(coordinate, parse_date(&date)?).await?),
                    None => {
                        let record = store.current_conditions(coordinate).await?;
                        output.record(&record)?;
                        if output.json {
                            return Ok(());
                        }
                        // the timeline is a bonus; a failed forecast still shows current conditions
                        let hourly = store
                            .hourly_forecast(coordinate)
                            .await
                            .inspect_err(|e| tracing::warn!("hourly forecast unavailable: {e}"))
                            .unwrap_or_default();
                        let daily = store
                            .daily_forecast(coordinate)
                            .await
                            .inspect_err(|e| tracing::warn!("daily forecast unavailable: {e}"))
                            .unwrap_or_default();
                        output.timeline(&timeline(&hourly, &daily, Utc::now()))
                    }
                }
            }
            Command::Current { location } => {
                let record = store.current_conditions(parse_coordinate(&location)?).await?;
                output.record(&record)
            }
            Command::Hourly { location } => {
                let records = store.hourly_forecast(parse_coordinate(&location)?).await?;
                output.records(&records, "%a %H:%M UTC")
            }
            Command::Daily { location } => {
                let records = store.daily_forecast(parse_coordinate(&location)?).await?;
                output.records(&records, "%a %Y-%m-%d")
            }
            Command::Forecast { location, date } => {
                let record = store.forecast(parse_coordinate(&location)?, parse_date(&date)?).await?;
                output.record(&record)
            }
            Command::History { location, date } => {
                let record = store.historical(parse_coordinate(&location)?, parse_date(&date)?).await?;
                output.record(&record)
            }
            Command::Almanac { location, date } => {
                let record = store.almanac(parse_coordinate(&location)?, parse_date(&date)?).await?;
                output.record(&record)
            }
            Command::Dominant { location, hours } => {
                let start = Utc::now();
                let end = start + Duration::hours(hours.into());
                let condition = store.dominant_condition(parse_coordinate(&location)?, start, end).await?;
                output.dominant(condition, hours)
            }
        }
    }

    fn unit(&self, config: &Config) -> anyhow::Result<TemperatureUnit> {
        let preference = match self.units.as_deref() {
            Some(units) => UnitPreference::try_from(units)?,
            None => config.units,
        };
        Ok(preference.resolve(&EnvLocale))
    }

    fn store(&self, config: &Config) -> anyhow::Result<WeatherStore> {
        let provider = self.provider.as_deref().map(ProviderId::try_from).transpose()?;
        store_from_config(config, provider)
    }
}

/// Parse "LAT,LON" (whitespace around either part is allowed).
pub fn parse_coordinate(raw: &str) -> anyhow::Result<Coordinate> {
    let (lat, lon) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("Expected a location as \"LAT,LON\", got '{raw}'"))?;
    let latitude: f64 = lat.trim().parse().with_context(|| format!("Invalid latitude '{lat}'"))?;
    let longitude: f64 = lon.trim().parse().with_context(|| format!("Invalid longitude '{lon}'"))?;
    Ok(Coordinate::new(latitude, longitude))
}

pub fn parse_date(raw: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{raw}', expected YYYY-MM-DD"))
}

/// Entries older than this many minutes are left off the timeline.
const TIMELINE_GRACE_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TimelineEntry<'a> {
    Hour(&'a WeatherRecord),
    Sunrise(DateTime<Utc>),
    Sunset(DateTime<Utc>),
}

impl TimelineEntry<'_> {
    fn time(&self) -> DateTime<Utc> {
        match self {
            TimelineEntry::Hour(record) => record.represented_date(),
            TimelineEntry::Sunrise(at) | TimelineEntry::Sunset(at) => *at,
        }
    }
}

/// Hourly records interleaved with the daily sunrise and sunset times,
/// ascending. Entries more than 15 minutes old are dropped, and sun events
/// past the last hour are left out.
fn timeline<'a>(
    hourly: &'a [WeatherRecord],
    daily: &[WeatherRecord],
    now: DateTime<Utc>,
) -> Vec<TimelineEntry<'a>> {
    let cutoff = now - Duration::minutes(TIMELINE_GRACE_MINUTES);
    let Some(last_hour) = hourly.iter().map(WeatherRecord::represented_date).max() else {
        return Vec::new();
    };

    let sun_events = daily.iter().flat_map(|day| {
        [day.sunrise().map(TimelineEntry::Sunrise), day.sunset().map(TimelineEntry::Sunset)]
    });

    let mut entries: Vec<_> = hourly
        .iter()
        .map(TimelineEntry::Hour)
        .chain(sun_events.flatten().filter(|e| e.time() <= last_hour))
        .filter(|e| e.time() >= cutoff)
        .collect();
    entries.sort_by_key(TimelineEntry::time);
    entries
}

fn configure(provider: &str) -> anyhow::Result<()> {
    let id = ProviderId::try_from(provider)?;
    let mut config = Config::load()?;

    if id.requires_api_key() {
        let key = Password::new(&format!("API key for {id}:"))
            .with_display_mode(PasswordDisplayMode::Masked)
            .without_confirmation()
            .with_validator(inquire::required!("An API key is required"))
            .prompt()?;
        config.upsert_provider_api_key(id, key.trim().to_string());
    } else {
        config.providers.entry(id.as_str().to_string()).or_default();
        let geocode = Confirm::new("Look up place names for coordinates (OpenStreetMap Nominatim)?")
            .with_default(config.reverse_geocode)
            .prompt()?;
        config.reverse_geocode = geocode;
    }

    let units = Select::new("Temperature units:", vec!["auto", "celsius", "fahrenheit"]).prompt()?;
    config.units = UnitPreference::try_from(units)?;

    if config.default_provider_id().ok() != Some(id) {
        let make_default = Confirm::new(&format!("Make {id} the default provider?"))
            .with_default(true)
            .prompt()?;
        if make_default {
            config.set_default_provider(id);
        }
    }

    config.save()?;
    println!("Saved configuration to {}", Config::config_file_path()?.display());
    Ok(())
}

struct Output {
    json: bool,
    unit: TemperatureUnit,
}

impl Output {
    fn record(&self, record: &WeatherRecord) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(record)?);
            return Ok(());
        }

        println!("{}", record.location().summary());
        println!("{}", record.represented_date().format("%Y-%m-%d %H:%M UTC"));
        println!("{}", record.natural_language(self.unit));
        if let (Some(rise), Some(set)) = (record.sunrise(), record.sunset()) {
            println!("Sunrise {} / sunset {} UTC", rise.format("%H:%M"), set.format("%H:%M"));
        }
        Ok(())
    }

    fn records(&self, records: &[WeatherRecord], time_format: &str) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(records)?);
            return Ok(());
        }

        if let Some(first) = records.first() {
            println!("{}", first.location().summary());
        }
        for record in records {
            let temperature = record
                .temperature_string(self.unit)
                .or_else(|| record.high_low_string(self.unit))
                .unwrap_or_else(|| "--".to_string());
            let chance = record
                .precipitation_chance()
                .map(|c| format!("{:>3.0}%", c * 100.0))
                .unwrap_or_default();
            println!(
                "{:<18} {:<24} {:>16} {}",
                record.represented_date().format(time_format).to_string(),
                record.condition().short_name(),
                temperature,
                chance
            );
        }
        Ok(())
    }

    fn timeline(&self, entries: &[TimelineEntry<'_>]) -> anyhow::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        println!();
        for entry in entries {
            let at = entry.time().format("%a %H:%M UTC").to_string();
            match entry {
                TimelineEntry::Hour(record) => {
                    let temperature = record.temperature_string(self.unit).unwrap_or_else(|| "--".to_string());
                    println!("{at:<18} {:<24} {temperature:>8}", record.condition().short_name());
                }
                TimelineEntry::Sunrise(_) => println!("{at:<18} Sunrise"),
                TimelineEntry::Sunset(_) => println!("{at:<18} Sunset"),
            }
        }
        Ok(())
    }

    fn dominant(&self, condition: ConditionCode, hours: u32) -> anyhow::Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(&describe(condition.code()))?);
        } else {
            println!("Next {hours} hours: {}", condition.short_name());
        }
        Ok(())
    }

    fn conditions(&self) -> anyhow::Result<()> {
        let catalog: Vec<_> = ConditionCode::all().iter().map(|c| describe(c.code())).collect();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&catalog)?);
            return Ok(());
        }
        for info in catalog {
            println!(
                "{:>2}  {:<28} {:?} (severity {})",
                info.code.code(),
                info.short_name,
                info.category,
                info.code.severity()
            );
        }
        Ok(())
    }
}
