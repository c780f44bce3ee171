use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Market data providers known to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Yahoo,
    Polygon,
    Alphavantage,
}

impl ProviderId {
    pub const ALL: [Self; 3] = [Self::Yahoo, Self::Polygon, Self::Alphavantage];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::Polygon => "polygon",
            Self::Alphavantage => "alphavantage",
        }
    }

    /// Suffix of the `FERROQUANT_<NAME>_API_KEY` environment variable.
    pub const fn env_name(self) -> &'static str {
        match self {
            Self::Yahoo => "YAHOO",
            Self::Polygon => "POLYGON",
            Self::Alphavantage => "ALPHAVANTAGE",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "yahoo" => Ok(Self::Yahoo),
            "polygon" => Ok(Self::Polygon),
            "alphavantage" | "alpha_vantage" => Ok(Self::Alphavantage),
            other => Err(ValidationError::InvalidSource {
                value: other.to_owned(),
            }),
        }
    }
}
