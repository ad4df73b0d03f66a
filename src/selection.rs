//! The user's selection: climate model, indicator, month and warming level.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Climate model driving the regional simulation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// CNRM-ALADIN forced by CMCC-CM2-SR5.
    #[default]
    Cmcc,
    /// HCLIM43-ALADIN forced by IPSL-CM6A-LR.
    Ipsl,
}

impl Model {
    /// Every model offered by the model menu.
    pub const ALL: [Model; 2] = [Model::Cmcc, Model::Ipsl];

    /// Short key of the model, as used in the UI state.
    pub fn key(self) -> &'static str {
        match self {
            Model::Cmcc => "cmcc",
            Model::Ipsl => "ipsl",
        }
    }

    /// Full name of the driving global model.
    pub fn label(self) -> &'static str {
        match self {
            Model::Cmcc => "CMCC-CM2-SR5",
            Model::Ipsl => "IPSL-CM6A-LR",
        }
    }
}

/// A climate indicator with its own tileset family and colormap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Indicator {
    /// Heating degree-days.
    #[default]
    Dju,
    /// Monthly mean temperature.
    Tas,
    /// Days per month with a minimum temperature below 0°C.
    Tasmin0,
    /// Days per month with a maximum temperature above 30°C.
    Tasmax30,
    /// Mean surface solar radiation.
    Rsds,
    /// Mean wind speed.
    Ws,
}

impl Indicator {
    /// Every indicator offered by the indicator menu.
    pub const ALL: [Indicator; 6] = [
        Indicator::Dju,
        Indicator::Tas,
        Indicator::Tasmin0,
        Indicator::Tasmax30,
        Indicator::Rsds,
        Indicator::Ws,
    ];

    /// Short code used in tileset paths.
    pub fn code(self) -> &'static str {
        match self {
            Indicator::Dju => "dju",
            Indicator::Tas => "tas",
            Indicator::Tasmin0 => "tasmin0",
            Indicator::Tasmax30 => "tasmax30",
            Indicator::Rsds => "rsds",
            Indicator::Ws => "ws",
        }
    }

    /// Menu label.
    pub fn label(self) -> &'static str {
        match self {
            Indicator::Dju => "Heating degree-days",
            Indicator::Tas => "Mean temperature",
            Indicator::Tasmin0 => "Days below 0°C",
            Indicator::Tasmax30 => "Days above 30°C",
            Indicator::Rsds => "Solar radiation",
            Indicator::Ws => "Wind speed",
        }
    }

    /// One sentence describing how the indicator is computed.
    pub fn description(self) -> &'static str {
        match self {
            Indicator::Dju => {
                "Heating demand: sum of the gap between the daily mean temperature and 18°C over the heating season, October to April."
            }
            Indicator::Tas => "Monthly mean of the near-surface air temperature.",
            Indicator::Tasmin0 => "Number of days per month with a minimum temperature below 0°C.",
            Indicator::Tasmax30 => {
                "Number of days per month with a maximum temperature above 30°C."
            }
            Indicator::Rsds => "Solar production: monthly mean of the surface solar radiation.",
            Indicator::Ws => "Wind production: monthly mean of the wind speed.",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A calendar month, 1 to 12.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Month(u8);

impl Month {
    /// January.
    pub const JANUARY: Month = Month(1);

    const NAMES: [&'static str; 12] = [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ];

    /// Creates a month from its number. Returns `None` outside 1..=12.
    pub fn new(number: u8) -> Option<Self> {
        (1..=12).contains(&number).then_some(Self(number))
    }

    /// The month number, 1 to 12.
    pub fn number(self) -> u8 {
        self.0
    }

    /// Zero-padded two digit form used in tileset paths, "01" to "12".
    pub fn padded(self) -> String {
        format!("{:02}", self.0)
    }

    /// English month name.
    pub fn name(self) -> &'static str {
        Self::NAMES[usize::from(self.0 - 1)]
    }
}

impl Default for Month {
    fn default() -> Self {
        Self::JANUARY
    }
}

impl TryFrom<u8> for Month {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Month::new(value).ok_or_else(|| format!("month must be within 1..=12, got {value}"))
    }
}

impl From<Month> for u8 {
    fn from(month: Month) -> Self {
        month.0
    }
}

impl fmt::Display for Month {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

/// Global warming level in °C, the continuous axis of the climate series.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct WarmingLevel(f64);

impl WarmingLevel {
    /// Lowest warming level of the scenario series.
    pub const MIN: f64 = 1.5;
    /// Highest warming level of the scenario series.
    pub const MAX: f64 = 4.0;
    /// Levels at which the series has actual data, labelled on the slider.
    pub const MARKS: [f64; 4] = [1.5, 2.0, 2.7, 4.0];

    /// Creates a warming level, clamped to the supported range.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            return Self(Self::MIN);
        }
        Self(value.clamp(Self::MIN, Self::MAX))
    }

    /// The value in °C.
    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for WarmingLevel {
    fn default() -> Self {
        Self(Self::MIN)
    }
}

impl From<f64> for WarmingLevel {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<WarmingLevel> for f64 {
    fn from(level: WarmingLevel) -> Self {
        level.0
    }
}

impl fmt::Display for WarmingLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{}°C", self.0)
    }
}

/// The four independent user selections.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selection {
    /// Selected climate model.
    pub model: Model,
    /// Selected indicator.
    pub indicator: Indicator,
    /// Selected month.
    pub month: Month,
    /// Selected warming level.
    pub warming_level: WarmingLevel,
}

impl Selection {
    /// Path prefix of the tileset for this selection, `/tilesets/{MODEL}/{indicator}_{month}/`.
    ///
    /// The warming level is not part of the path: it is an axis inside the tileset.
    pub fn tile_url_prefix(&self) -> String {
        format!(
            "/tilesets/{}/{}_{}/",
            self.model.key().to_uppercase(),
            self.indicator.code(),
            self.month.padded()
        )
    }
}

/// Which part of the selection a control changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionChange {
    /// The model menu changed.
    Model,
    /// The indicator menu changed.
    Indicator,
    /// The month slider changed.
    Month,
    /// The warming-level slider changed.
    WarmingLevel,
}

impl SelectionChange {
    /// Whether the change selects a different tileset, as opposed to moving along its axis.
    pub fn needs_new_layer(self) -> bool {
        !matches!(self, SelectionChange::WarmingLevel)
    }
}
