use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::NdviError;

static DATE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9]{4}-(0[1-9]|1[0-2])-(0[1-9]|[1-2][0-9]|3[0-1])$")
        .expect("date pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
pub enum Satellite {
    #[default]
    #[serde(rename = "landsat-8")]
    #[value(name = "landsat-8")]
    Landsat8,
    #[serde(rename = "sentinel-1")]
    #[value(name = "sentinel-1")]
    Sentinel1,
    #[serde(rename = "sentinel-2")]
    #[value(name = "sentinel-2")]
    Sentinel2,
}

impl Satellite {
    pub const ALL: [Satellite; 3] = [
        Satellite::Landsat8,
        Satellite::Sentinel1,
        Satellite::Sentinel2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Satellite::Landsat8 => "landsat-8",
            Satellite::Sentinel1 => "sentinel-1",
            Satellite::Sentinel2 => "sentinel-2",
        }
    }

    /// Revisit interval of the platform in days.
    pub fn interval_days(&self) -> u32 {
        match self {
            Satellite::Landsat8 => 16,
            Satellite::Sentinel1 => 12,
            Satellite::Sentinel2 => 10,
        }
    }

    fn allowed_values() -> String {
        Self::ALL
            .iter()
            .map(|satellite| satellite.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Satellite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Satellite {
    type Err = NdviError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|satellite| satellite.as_str() == value)
            .ok_or_else(|| NdviError::InvalidSatellite {
                value: value.to_string(),
                allowed: Self::allowed_values(),
            })
    }
}

/// Calendar date in `YYYY-MM-DD` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IsoDate(NaiveDate);

impl IsoDate {
    pub fn new(date: NaiveDate) -> Self {
        Self(date)
    }

    pub fn date(&self) -> NaiveDate {
        self.0
    }

    pub fn matches_pattern(value: &str) -> bool {
        DATE_PATTERN.is_match(value)
    }
}

impl fmt::Display for IsoDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for IsoDate {
    type Err = NdviError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !Self::matches_pattern(trimmed) {
            return Err(NdviError::InvalidDate(value.to_string()));
        }
        NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
            .map(Self)
            .map_err(|_| NdviError::InvalidDate(value.to_string()))
    }
}

impl Serialize for IsoDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IsoDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Output raster size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
        }
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Dimensions {
    type Err = NdviError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || NdviError::InvalidDimensions(value.to_string());
        let (width, height) = value.trim().split_once('x').ok_or_else(invalid)?;
        let width: u32 = width.parse().map_err(|_| invalid())?;
        let height: u32 = height.parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: IsoDate,
    pub to: IsoDate,
}

/// One request for an NDVI image series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    pub start: IsoDate,
    pub end: IsoDate,
    pub satellite: Satellite,
    pub dimensions: Dimensions,
    /// `dimensions` exactly as received; this text, not the parsed value,
    /// goes into the cache key.
    pub dimensions_text: String,
    pub province: Option<String>,
}

impl SeriesRequest {
    pub fn new(start: IsoDate, end: IsoDate) -> Self {
        Self {
            start,
            end,
            satellite: Satellite::default(),
            dimensions: Dimensions::default(),
            dimensions_text: Dimensions::default().to_string(),
            province: None,
        }
    }

    pub fn with_satellite(mut self, satellite: Satellite) -> Self {
        self.satellite = satellite;
        self
    }

    pub fn with_dimensions(mut self, dimensions: Dimensions) -> Self {
        self.dimensions = dimensions;
        self.dimensions_text = dimensions.to_string();
        self
    }

    /// Parses `value` as `WxH` and keeps the original text for the cache key.
    pub fn with_dimensions_text(mut self, value: &str) -> Result<Self, NdviError> {
        self.dimensions = value.parse()?;
        self.dimensions_text = value.to_string();
        Ok(self)
    }

    pub fn with_province(mut self, province: Option<String>) -> Self {
        self.province = province.filter(|value| !value.trim().is_empty());
        self
    }
}
