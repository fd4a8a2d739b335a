//! Weather condition catalog.
//!
//! Maps the integer condition codes carried by provider payloads to named
//! conditions, broad categories and a severity rank used when summarizing a
//! forecast range.

use serde::{Deserialize, Serialize};

/// Broad grouping of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionCategory {
    Unavailable,
    Severe,
    Thunderstorm,
    Rain,
    Snow,
    Ice,
    Obscured,
    Wind,
    Temperature,
    Cloudy,
    Clear,
}

/// A named weather condition. The discriminant is the integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionCode {
    #[default]
    NotAvailable = 0,
    Tornado = 1,
    TropicalStorm = 2,
    Hurricane = 3,
    SevereThunderstorms = 4,
    Thunderstorms = 5,
    MixedRainAndSnow = 6,
    MixedRainAndSleet = 7,
    MixedSnowAndSleet = 8,
    FreezingDrizzle = 9,
    Drizzle = 10,
    FreezingRain = 11,
    Showers = 12,
    SnowFlurries = 13,
    LightSnowShowers = 14,
    BlowingSnow = 15,
    Snow = 16,
    Hail = 17,
    Sleet = 18,
    Dust = 19,
    Foggy = 20,
    Haze = 21,
    Smoky = 22,
    Blustery = 23,
    Windy = 24,
    Cold = 25,
    Cloudy = 26,
    MostlyCloudyNight = 27,
    MostlyCloudyDay = 28,
    PartlyCloudyNight = 29,
    PartlyCloudyDay = 30,
    ClearNight = 31,
    Sunny = 32,
    FairNight = 33,
    FairDay = 34,
    MixedRainAndHail = 35,
    Hot = 36,
    IsolatedThunderstorms = 37,
    ScatteredThunderstorms = 38,
    ScatteredShowers = 39,
    HeavySnow = 40,
    ScatteredSnowShowers = 41,
    PartlyCloudy = 42,
    SnowShowers = 43,
    IsolatedThundershowers = 44,
}

/// Conditions at or above this severity outrank any number of milder hours.
pub const HAZARD_SEVERITY: u8 = 7;

const ALL: [ConditionCode; 45] = [
    ConditionCode::NotAvailable,
    ConditionCode::Tornado,
    ConditionCode::TropicalStorm,
    ConditionCode::Hurricane,
    ConditionCode::SevereThunderstorms,
    ConditionCode::Thunderstorms,
    ConditionCode::MixedRainAndSnow,
    ConditionCode::MixedRainAndSleet,
    ConditionCode::MixedSnowAndSleet,
    ConditionCode::FreezingDrizzle,
    ConditionCode::Drizzle,
    ConditionCode::FreezingRain,
    ConditionCode::Showers,
    ConditionCode::SnowFlurries,
    ConditionCode::LightSnowShowers,
    ConditionCode::BlowingSnow,
    ConditionCode::Snow,
    ConditionCode::Hail,
    ConditionCode::Sleet,
    ConditionCode::Dust,
    ConditionCode::Foggy,
    ConditionCode::Haze,
    ConditionCode::Smoky,
    ConditionCode::Blustery,
    ConditionCode::Windy,
    ConditionCode::Cold,
    ConditionCode::Cloudy,
    ConditionCode::MostlyCloudyNight,
    ConditionCode::MostlyCloudyDay,
    ConditionCode::PartlyCloudyNight,
    ConditionCode::PartlyCloudyDay,
    ConditionCode::ClearNight,
    ConditionCode::Sunny,
    ConditionCode::FairNight,
    ConditionCode::FairDay,
    ConditionCode::MixedRainAndHail,
    ConditionCode::Hot,
    ConditionCode::IsolatedThunderstorms,
    ConditionCode::ScatteredThunderstorms,
    ConditionCode::ScatteredShowers,
    ConditionCode::HeavySnow,
    ConditionCode::ScatteredSnowShowers,
    ConditionCode::PartlyCloudy,
    ConditionCode::SnowShowers,
    ConditionCode::IsolatedThundershowers,
];

/// Catalog entry for one condition code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConditionInfo {
    pub code: ConditionCode,
    pub short_name: &'static str,
    pub category: ConditionCategory,
}

/// Look up a raw integer code. Unknown codes describe `NotAvailable`.
pub fn describe(code: u32) -> ConditionInfo {
    let condition = ConditionCode::from_code(code);
    ConditionInfo {
        code: condition,
        short_name: condition.short_name(),
        category: condition.category(),
    }
}

impl ConditionCode {
    /// Every known code in definition order.
    pub const fn all() -> &'static [ConditionCode] {
        &ALL
    }

    pub fn from_code(code: u32) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|idx| ALL.get(idx).copied())
            .unwrap_or(ConditionCode::NotAvailable)
    }

    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn short_name(self) -> &'static str {
        use ConditionCode::*;
        match self {
            NotAvailable => "Not Available",
            Tornado => "Tornado",
            TropicalStorm => "Tropical Storm",
            Hurricane => "Hurricane",
            SevereThunderstorms => "Severe Thunderstorms",
            Thunderstorms => "Thunderstorms",
            MixedRainAndSnow => "Mixed Rain and Snow",
            MixedRainAndSleet => "Mixed Rain and Sleet",
            MixedSnowAndSleet => "Mixed Snow and Sleet",
            FreezingDrizzle => "Freezing Drizzle",
            Drizzle => "Drizzle",
            FreezingRain => "Freezing Rain",
            Showers => "Showers",
            SnowFlurries => "Snow Flurries",
            LightSnowShowers => "Light Snow Showers",
            BlowingSnow => "Blowing Snow",
            Snow => "Snow",
            Hail => "Hail",
            Sleet => "Sleet",
            Dust => "Dust",
            Foggy => "Foggy",
            Haze => "Haze",
            Smoky => "Smoky",
            Blustery => "Blustery",
            Windy => "Windy",
            Cold => "Cold",
            Cloudy => "Cloudy",
            MostlyCloudyNight | MostlyCloudyDay => "Mostly Cloudy",
            PartlyCloudyNight | PartlyCloudyDay | PartlyCloudy => "Partly Cloudy",
            ClearNight => "Clear",
            Sunny => "Sunny",
            FairNight | FairDay => "Fair",
            MixedRainAndHail => "Mixed Rain and Hail",
            Hot => "Hot",
            IsolatedThunderstorms => "Isolated Thunderstorms",
            ScatteredThunderstorms => "Scattered Thunderstorms",
            ScatteredShowers => "Scattered Showers",
            HeavySnow => "Heavy Snow",
            ScatteredSnowShowers => "Scattered Snow Showers",
            SnowShowers => "Snow Showers",
            IsolatedThundershowers => "Isolated Thundershowers",
        }
    }

    pub const fn category(self) -> ConditionCategory {
        use ConditionCode::*;
        match self {
            NotAvailable => ConditionCategory::Unavailable,
            Tornado | TropicalStorm | Hurricane => ConditionCategory::Severe,
            SevereThunderstorms
            | Thunderstorms
            | IsolatedThunderstorms
            | ScatteredThunderstorms
            | IsolatedThundershowers => ConditionCategory::Thunderstorm,
            Drizzle | Showers | ScatteredShowers => ConditionCategory::Rain,
            MixedRainAndSnow
            | SnowFlurries
            | LightSnowShowers
            | BlowingSnow
            | Snow
            | HeavySnow
            | ScatteredSnowShowers
            | SnowShowers => ConditionCategory::Snow,
            MixedRainAndSleet
            | MixedSnowAndSleet
            | FreezingDrizzle
            | FreezingRain
            | Hail
            | Sleet
            | MixedRainAndHail => ConditionCategory::Ice,
            Dust | Foggy | Haze | Smoky => ConditionCategory::Obscured,
            Blustery | Windy => ConditionCategory::Wind,
            Cold | Hot => ConditionCategory::Temperature,
            Cloudy | MostlyCloudyNight | MostlyCloudyDay => ConditionCategory::Cloudy,
            PartlyCloudyNight | PartlyCloudyDay | PartlyCloudy | ClearNight | Sunny
            | FairNight | FairDay => ConditionCategory::Clear,
        }
    }

    /// Rank from 0 (no data) to 10 (life-threatening).
    pub const fn severity(self) -> u8 {
        use ConditionCode::*;
        match self {
            NotAvailable => 0,
            Tornado | Hurricane => 10,
            TropicalStorm => 9,
            SevereThunderstorms => 8,
            Hail | MixedRainAndHail | HeavySnow | BlowingSnow | FreezingRain => 7,
            Thunderstorms
            | ScatteredThunderstorms
            | IsolatedThunderstorms
            | IsolatedThundershowers => 6,
            Snow | SnowShowers | MixedRainAndSnow | MixedRainAndSleet | MixedSnowAndSleet
            | Sleet | FreezingDrizzle => 5,
            Showers | ScatteredShowers | LightSnowShowers | SnowFlurries
            | ScatteredSnowShowers | Drizzle => 4,
            Dust | Foggy | Haze | Smoky | Blustery | Windy | Cold | Hot => 3,
            Cloudy | MostlyCloudyNight | MostlyCloudyDay => 2,
            PartlyCloudyNight | PartlyCloudyDay | PartlyCloudy | FairNight | FairDay
            | ClearNight | Sunny => 1,
        }
    }

    pub const fn is_hazardous(self) -> bool {
        self.severity() >= HAZARD_SEVERITY
    }
}

impl std::fmt::Display for ConditionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_matches_definition_order() {
        for (idx, code) in ConditionCode::all().iter().enumerate() {
            assert_eq!(code.code() as usize, idx);
        }
        assert_eq!(ConditionCode::all().len(), 45);
        assert_eq!(ConditionCode::all().last(), Some(&ConditionCode::IsolatedThundershowers));
    }

    #[test]
    fn from_code_maps_known_codes() {
        assert_eq!(ConditionCode::from_code(1), ConditionCode::Tornado);
        assert_eq!(ConditionCode::from_code(32), ConditionCode::Sunny);
        assert_eq!(ConditionCode::from_code(44), ConditionCode::IsolatedThundershowers);
    }

    #[test]
    fn unknown_codes_resolve_to_not_available() {
        assert_eq!(ConditionCode::from_code(45), ConditionCode::NotAvailable);
        assert_eq!(ConditionCode::from_code(u32::MAX), ConditionCode::NotAvailable);

        let info = describe(9999);
        assert_eq!(info.code, ConditionCode::NotAvailable);
        assert_eq!(info.category, ConditionCategory::Unavailable);
        assert_eq!(info.short_name, "Not Available");
    }

    #[test]
    fn describe_known_code() {
        let info = describe(ConditionCode::Hail.code());
        assert_eq!(info.short_name, "Hail");
        assert_eq!(info.category, ConditionCategory::Ice);
    }

    #[test]
    fn severe_outranks_mild() {
        assert!(ConditionCode::Tornado.severity() > ConditionCode::Sunny.severity());
        assert!(ConditionCode::Hurricane.is_hazardous());
        assert!(ConditionCode::SevereThunderstorms.is_hazardous());
        assert!(!ConditionCode::Cloudy.is_hazardous());
        assert_eq!(ConditionCode::NotAvailable.severity(), 0);
    }

    #[test]
    fn only_not_available_is_unavailable() {
        let unavailable: Vec<_> = ConditionCode::all()
            .iter()
            .filter(|c| c.category() == ConditionCategory::Unavailable)
            .collect();
        assert_eq!(unavailable, vec![&ConditionCode::NotAvailable]);
    }
}
