use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::{ProviderId, Symbol, UtcDateTime, ValidationError};

/// Which column of a provider's bar data a series tracks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesField {
    Open,
    High,
    Low,
    #[default]
    Close,
    AdjustedClose,
    Volume,
    /// Single-valued series such as published yields.
    Value,
}

impl SeriesField {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::High => "high",
            Self::Low => "low",
            Self::Close => "close",
            Self::AdjustedClose => "adjusted_close",
            Self::Volume => "volume",
            Self::Value => "value",
        }
    }
}

impl Display for SeriesField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SeriesField {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "high" => Ok(Self::High),
            "low" => Ok(Self::Low),
            "close" => Ok(Self::Close),
            "adjusted_close" | "adjclose" => Ok(Self::AdjustedClose),
            "volume" => Ok(Self::Volume),
            "value" | "yield" => Ok(Self::Value),
            other => Err(ValidationError::InvalidField {
                value: other.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl Display for Granularity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" | "1d" => Ok(Self::Daily),
            "weekly" | "1wk" => Ok(Self::Weekly),
            "monthly" | "1mo" => Ok(Self::Monthly),
            other => Err(ValidationError::InvalidGranularity {
                value: other.to_owned(),
            }),
        }
    }
}

/// Units the provider quotes values in; normalized series are always decimal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueUnit {
    #[default]
    Decimal,
    Percent,
}

impl FromStr for ValueUnit {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "decimal" => Ok(Self::Decimal),
            "percent" => Ok(Self::Percent),
            other => Err(ValidationError::InvalidUnit {
                value: other.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesId {
    pub symbol: Symbol,
    pub field: SeriesField,
    pub granularity: Granularity,
}

impl SeriesId {
    pub fn new(symbol: Symbol, field: SeriesField, granularity: Granularity) -> Self {
        Self {
            symbol,
            field,
            granularity,
        }
    }
}

impl Display for SeriesId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.field, self.granularity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub ts: UtcDateTime,
    pub value: f64,
}

/// Ordered time series with strictly increasing timestamps and finite values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SeriesParts")]
pub struct Series {
    id: SeriesId,
    source: ProviderId,
    fetched_at: UtcDateTime,
    observations: Vec<Observation>,
}

#[derive(Deserialize)]
struct SeriesParts {
    id: SeriesId,
    source: ProviderId,
    fetched_at: UtcDateTime,
    observations: Vec<Observation>,
}

impl TryFrom<SeriesParts> for Series {
    type Error = ValidationError;

    fn try_from(parts: SeriesParts) -> Result<Self, Self::Error> {
        Self::new(parts.id, parts.source, parts.fetched_at, parts.observations)
    }
}

impl Series {
    pub fn new(
        id: SeriesId,
        source: ProviderId,
        fetched_at: UtcDateTime,
        observations: Vec<Observation>,
    ) -> Result<Self, ValidationError> {
        if observations.iter().any(|obs| !obs.value.is_finite()) {
            return Err(ValidationError::NonFiniteValue { field: "value" });
        }
        if let Some(index) = observations
            .windows(2)
            .position(|pair| pair[1].ts <= pair[0].ts)
        {
            return Err(ValidationError::SeriesNotIncreasing { index: index + 1 });
        }

        Ok(Self {
            id,
            source,
            fetched_at,
            observations,
        })
    }

    pub fn id(&self) -> &SeriesId {
        &self.id
    }

    pub fn source(&self) -> ProviderId {
        self.source
    }

    pub fn fetched_at(&self) -> UtcDateTime {
        self.fetched_at
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn last(&self) -> Option<&Observation> {
        self.observations.last()
    }

    /// Latest observation dated on or before `date`.
    pub fn value_on_or_before(&self, date: Date) -> Option<&Observation> {
        self.observations
            .iter()
            .rev()
            .find(|obs| obs.ts.date() <= date)
    }

    /// Observations whose calendar date falls inside `[start, end]`.
    pub fn restrict(&self, start: Option<Date>, end: Option<Date>) -> Self {
        let observations = self
            .observations
            .iter()
            .filter(|obs| start.is_none_or(|start| obs.ts.date() >= start))
            .filter(|obs| end.is_none_or(|end| obs.ts.date() <= end))
            .copied()
            .collect();

        Self {
            id: self.id.clone(),
            source: self.source,
            fetched_at: self.fetched_at,
            observations,
        }
    }
}

/// One series to fetch from one provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesRequest {
    pub provider: ProviderId,
    pub symbol: Symbol,
    #[serde(default)]
    pub field: SeriesField,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(
        default,
        with = "ferroquant_kernel::dates::iso::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub start: Option<Date>,
    #[serde(
        default,
        with = "ferroquant_kernel::dates::iso::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub end: Option<Date>,
    #[serde(default)]
    pub unit: ValueUnit,
}

impl SeriesRequest {
    pub fn new(provider: ProviderId, symbol: Symbol) -> Self {
        Self {
            provider,
            symbol,
            field: SeriesField::default(),
            granularity: Granularity::default(),
            start: None,
            end: None,
            unit: ValueUnit::default(),
        }
    }

    pub fn with_field(mut self, field: SeriesField) -> Self {
        self.field = field;
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_range(mut self, start: Option<Date>, end: Option<Date>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    pub fn with_unit(mut self, unit: ValueUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn series_id(&self) -> SeriesId {
        SeriesId::new(self.symbol.clone(), self.field, self.granularity)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(ValidationError::InvertedRange {
                    start: start.to_string(),
                    end: end.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Display for SeriesRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.provider, self.series_id())
    }
}
