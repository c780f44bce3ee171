//! Typed tool inputs, decoded after schema validation.

use ferroquant_core::{Granularity, ProviderId, SeriesField, SeriesRequest, Symbol, ValueUnit};
use ferroquant_kernel::{DayCount, FinancialProfile, InstrumentSpec, Interpolation, Pillar, Tenor};
use ferroquant_store::EntryKind;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::Date;

use crate::error::ServiceError;

/// Decodes a schema-valid input into its typed form.
pub fn decode<T: DeserializeOwned>(input: Value) -> Result<T, ServiceError> {
    serde_json::from_value(input).map_err(|error| ServiceError::invalid("/", error.to_string()))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetSeriesInput {
    pub requests: Vec<SeriesRequest>,
    #[serde(default)]
    pub refresh: bool,
}

/// One curve pillar sourced from market data: the latest value of a series
/// becomes the zero rate at `as_of + tenor`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenorQuote {
    pub tenor: Tenor,
    pub provider: ProviderId,
    pub symbol: Symbol,
    #[serde(default)]
    pub field: SeriesField,
    #[serde(default)]
    pub granularity: Granularity,
    #[serde(default)]
    pub unit: ValueUnit,
}

impl TenorQuote {
    pub fn series_request(&self) -> SeriesRequest {
        SeriesRequest::new(self.provider, self.symbol.clone())
            .with_field(self.field)
            .with_granularity(self.granularity)
            .with_unit(self.unit)
    }
}

/// A curve described either by explicit pillars or by market quotes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curve_id: Option<String>,
    #[serde(
        default,
        with = "ferroquant_kernel::dates::iso::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub as_of: Option<Date>,
    #[serde(default)]
    pub interpolation: Interpolation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_count: Option<DayCount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pillars: Vec<Pillar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub market: Vec<TenorQuote>,
}

impl CurveInput {
    /// Exactly one of `pillars` and `market` must be given.
    pub fn check(&self, input_path: &str) -> Result<(), ServiceError> {
        match (self.pillars.is_empty(), self.market.is_empty()) {
            (false, true) | (true, false) => Ok(()),
            (true, true) => Err(ServiceError::invalid(
                input_path,
                "either 'pillars' or 'market' is required",
            )),
            (false, false) => Err(ServiceError::invalid(
                input_path,
                "'pillars' and 'market' are mutually exclusive",
            )),
        }
    }

    pub fn is_market(&self) -> bool {
        !self.market.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetDiscountCurveInput {
    #[serde(flatten)]
    pub curve: CurveInput,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountFactorInput {
    pub curve: CurveInput,
    #[serde(with = "iso_dates")]
    pub dates: Vec<Date>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInstrumentInput {
    pub instrument: InstrumentSpec,
    pub curve: CurveInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bump_size: Option<f64>,
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateCacheInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<EntryKind>,
    #[serde(default)]
    pub purge_expired: bool,
}

impl InvalidateCacheInput {
    pub fn check(&self) -> Result<(), ServiceError> {
        if self.key.is_none() && self.prefix.is_none() && self.kind.is_none() && !self.purge_expired {
            return Err(ServiceError::invalid(
                "/",
                "one of 'key', 'prefix', 'kind' or 'purge_expired' is required",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeProfileInput {
    pub profile: FinancialProfile,
}

mod iso_dates {
    use ferroquant_kernel::{format_date, parse_date};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S>(dates: &[Date], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(dates.iter().map(|date| format_date(*date)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Date>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|value| parse_date(value).map_err(D::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::date;

    use super::*;

    #[test]
    fn decodes_market_curve_with_defaults() {
        let input: GetDiscountCurveInput = decode(json!({
            "curve_id": "ust",
            "market": [
                { "tenor": "3M", "provider": "alphavantage", "symbol": "UST3M", "field": "value" },
                { "tenor": "10Y", "provider": "yahoo", "symbol": "^TNX", "unit": "percent" }
            ],
            "refresh": true
        }))
        .unwrap();

        assert!(input.refresh);
        assert!(input.curve.is_market());
        assert_eq!(input.curve.interpolation, Interpolation::Linear);
        assert!(input.curve.check("/").is_ok());

        let request = input.curve.market[1].series_request();
        assert_eq!(request.provider, ProviderId::Yahoo);
        assert_eq!(request.symbol.as_str(), "^TNX");
        assert_eq!(request.unit, ValueUnit::Percent);
        assert_eq!(request.field, SeriesField::Close);
    }

    #[test]
    fn curve_needs_exactly_one_source() {
        let empty: CurveInput = decode(json!({})).unwrap();
        assert!(empty.check("/curve").is_err());

        let both: CurveInput = decode(json!({
            "pillars": [{ "date": "2024-01-01", "rate": 0.03 }],
            "market": [{ "tenor": "1Y", "provider": "yahoo", "symbol": "RATE1Y" }]
        }))
        .unwrap();
        let ServiceError::Validation { violations } = both.check("/curve").unwrap_err() else {
            panic!("expected validation error");
        };
        assert_eq!(violations[0].path, "/curve");
    }

    #[test]
    fn decodes_discount_factor_dates() {
        let input: DiscountFactorInput = decode(json!({
            "curve": { "pillars": [{ "date": "2024-01-01", "rate": 0.03 }] },
            "dates": ["2024-07-02", "2025-01-01"]
        }))
        .unwrap();
        assert_eq!(input.dates, [date!(2024 - 07 - 02), date!(2025 - 01 - 01)]);

        let encoded = serde_json::to_value(&input).unwrap();
        assert_eq!(encoded["dates"], json!(["2024-07-02", "2025-01-01"]));
    }

    #[test]
    fn invalidate_requires_a_target() {
        assert!(InvalidateCacheInput::default().check().is_err());
        let by_kind: InvalidateCacheInput = decode(json!({ "kind": "curve" })).unwrap();
        assert_eq!(by_kind.kind, Some(EntryKind::Curve));
        assert!(by_kind.check().is_ok());
    }
}
