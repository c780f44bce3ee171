//! Turns provider payloads into canonical [`Series`].
//!
//! Rows whose value is null, non-numeric (Alpha Vantage uses `"."`) or not finite
//! are dropped and counted. Rows are sorted by timestamp and, when a timestamp
//! repeats, the last occurrence wins; the discarded duplicates are counted too.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    NormalizeError, Observation, ProviderId, Series, SeriesField, SeriesId, UtcDateTime, ValueUnit,
};

/// Payload layouts the normalizer understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSchema {
    /// Yahoo `v8/finance/chart`.
    YahooChart,
    /// Polygon `v2/aggs`.
    PolygonAggregates,
    /// Alpha Vantage `TIME_SERIES_DAILY` / `WEEKLY` / `MONTHLY`.
    AlphaVantageTimeSeries,
    /// Alpha Vantage `TREASURY_YIELD`, quoted in percent.
    AlphaVantageTreasuryYield,
    /// A serialized [`Series`].
    Canonical,
}

impl ProviderSchema {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::YahooChart => "yahoo_chart",
            Self::PolygonAggregates => "polygon_aggregates",
            Self::AlphaVantageTimeSeries => "alphavantage_time_series",
            Self::AlphaVantageTreasuryYield => "alphavantage_treasury_yield",
            Self::Canonical => "canonical",
        }
    }
}

impl Display for ProviderSchema {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Undecoded provider response plus the context needed to label it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPayload {
    pub schema: ProviderSchema,
    pub series_id: SeriesId,
    pub source: ProviderId,
    pub unit: ValueUnit,
    pub received_at: UtcDateTime,
    pub body: String,
}

impl RawPayload {
    pub fn normalize(&self) -> Result<Normalized, NormalizeError> {
        normalize(self, self.schema)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub series: Series,
    pub dropped_rows: usize,
}

pub fn normalize(raw: &RawPayload, schema: ProviderSchema) -> Result<Normalized, NormalizeError> {
    let root: Value = serde_json::from_str(&raw.body)
        .map_err(|error| NormalizeError::malformed(schema, format!("body is not JSON: {error}")))?;

    let rows = match schema {
        ProviderSchema::Canonical => {
            let series = serde_json::from_value::<Series>(root).map_err(|error| {
                NormalizeError::malformed(schema, format!("not a canonical series: {error}"))
            })?;
            return Ok(Normalized {
                series,
                dropped_rows: 0,
            });
        }
        ProviderSchema::YahooChart => yahoo_rows(&root, raw.series_id.field),
        ProviderSchema::PolygonAggregates => polygon_rows(&root, raw.series_id.field),
        ProviderSchema::AlphaVantageTimeSeries => alphavantage_rows(&root, raw.series_id.field),
        ProviderSchema::AlphaVantageTreasuryYield => treasury_rows(&root),
    }
    .map_err(|reason| NormalizeError::malformed(schema, reason))?;

    let percent = schema == ProviderSchema::AlphaVantageTreasuryYield || raw.unit == ValueUnit::Percent;
    let scale = if percent { 0.01 } else { 1.0 };

    let mut dropped_rows = 0;
    let mut by_timestamp = BTreeMap::new();
    for (ts, value) in rows {
        match (ts, value.filter(|value| value.is_finite())) {
            (Some(ts), Some(value)) => {
                if by_timestamp.insert(ts, value * scale).is_some() {
                    dropped_rows += 1;
                }
            }
            _ => dropped_rows += 1,
        }
    }

    let observations = by_timestamp
        .into_iter()
        .map(|(ts, value)| Observation { ts, value })
        .collect();
    let series = Series::new(raw.series_id.clone(), raw.source, raw.received_at, observations)
        .map_err(|error| NormalizeError::malformed(schema, error.to_string()))?;

    Ok(Normalized {
        series,
        dropped_rows,
    })
}

type Row = (Option<UtcDateTime>, Option<f64>);

/// Numbers may arrive as JSON numbers or as strings.
fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, String> {
    value
        .as_object()
        .ok_or_else(|| format!("expected {what} to be an object"))
}

fn yahoo_rows(root: &Value, field: SeriesField) -> Result<Vec<Row>, String> {
    let chart = root
        .get("chart")
        .ok_or_else(|| String::from("missing 'chart'"))?;
    if let Some(error) = chart.get("error").filter(|error| !error.is_null()) {
        return Err(format!("provider reported error: {error}"));
    }

    let result = chart
        .get("result")
        .and_then(Value::as_array)
        .and_then(|results| results.first())
        .ok_or_else(|| String::from("missing 'chart.result[0]'"))?;
    let Some(timestamps) = result.get("timestamp").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let indicators = result
        .get("indicators")
        .ok_or_else(|| String::from("missing 'indicators'"))?;

    let values = match field {
        SeriesField::AdjustedClose => indicators
            .get("adjclose")
            .and_then(|adj| adj.get(0))
            .and_then(|adj| adj.get("adjclose")),
        other => {
            let column = match other {
                SeriesField::Open => "open",
                SeriesField::High => "high",
                SeriesField::Low => "low",
                SeriesField::Volume => "volume",
                _ => "close",
            };
            indicators
                .get("quote")
                .and_then(|quote| quote.get(0))
                .and_then(|quote| quote.get(column))
        }
    }
    .and_then(Value::as_array)
    .ok_or_else(|| format!("missing '{field}' values"))?;

    Ok(timestamps
        .iter()
        .enumerate()
        .map(|(index, ts)| {
            let ts = ts.as_i64().and_then(UtcDateTime::from_unix_seconds);
            (ts, values.get(index).and_then(coerce_number))
        })
        .collect())
}

fn polygon_rows(root: &Value, field: SeriesField) -> Result<Vec<Row>, String> {
    let root = object(root, "aggregates response")?;
    let Some(results) = root.get("results") else {
        return if root.contains_key("status") {
            Ok(Vec::new())
        } else {
            Err(String::from("missing 'results'"))
        };
    };
    let results = results
        .as_array()
        .ok_or_else(|| String::from("expected 'results' to be an array"))?;

    let column = match field {
        SeriesField::Open => "o",
        SeriesField::High => "h",
        SeriesField::Low => "l",
        SeriesField::Volume => "v",
        SeriesField::Close | SeriesField::AdjustedClose | SeriesField::Value => "c",
    };

    Ok(results
        .iter()
        .map(|bar| {
            let ts = bar
                .get("t")
                .and_then(Value::as_i64)
                .and_then(UtcDateTime::from_unix_millis);
            (ts, bar.get(column).and_then(coerce_number))
        })
        .collect())
}

fn alphavantage_rows(root: &Value, field: SeriesField) -> Result<Vec<Row>, String> {
    let root = object(root, "time series response")?;
    let Some(series) = root
        .iter()
        .find(|(key, _)| key.contains("Time Series"))
        .map(|(_, value)| value)
    else {
        let notice = ["Error Message", "Note", "Information"]
            .iter()
            .find_map(|key| root.get(*key).and_then(Value::as_str));
        return Err(match notice {
            Some(notice) => format!("provider notice: {notice}"),
            None => String::from("missing 'Time Series' section"),
        });
    };
    let series = object(series, "'Time Series' section")?;

    let column = match field {
        SeriesField::Open => "open",
        SeriesField::High => "high",
        SeriesField::Low => "low",
        SeriesField::Volume => "volume",
        SeriesField::AdjustedClose => "adjusted close",
        SeriesField::Close | SeriesField::Value => "close",
    };

    Ok(series
        .iter()
        .map(|(date, bar)| {
            let ts = ferroquant_kernel::parse_date(date)
                .ok()
                .map(UtcDateTime::start_of_day);
            let value = bar.as_object().and_then(|bar| {
                bar.iter()
                    .find(|(key, _)| key.split_once(". ").map(|(_, name)| name) == Some(column))
                    .and_then(|(_, value)| coerce_number(value))
            });
            (ts, value)
        })
        .collect())
}

fn treasury_rows(root: &Value) -> Result<Vec<Row>, String> {
    let data = root
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| match root.get("Information").and_then(Value::as_str) {
            Some(notice) => format!("provider notice: {notice}"),
            None => String::from("missing 'data' array"),
        })?;

    Ok(data
        .iter()
        .map(|point| {
            let ts = point
                .get("date")
                .and_then(Value::as_str)
                .and_then(|date| ferroquant_kernel::parse_date(date).ok())
                .map(UtcDateTime::start_of_day);
            (ts, point.get("value").and_then(coerce_number))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{Granularity, Symbol};

    fn raw(schema: ProviderSchema, field: SeriesField, unit: ValueUnit, body: Value) -> RawPayload {
        RawPayload {
            schema,
            series_id: SeriesId::new(Symbol::parse("SPY").unwrap(), field, Granularity::Daily),
            source: ProviderId::Yahoo,
            unit,
            received_at: UtcDateTime::parse("2024-01-10T00:00:00Z").unwrap(),
            body: body.to_string(),
        }
    }

    #[test]
    fn yahoo_chart_drops_nulls_and_sorts() {
        let body = json!({
            "chart": {
                "result": [{
                    "timestamp": [1704292200, 1704205800, 1704378600],
                    "indicators": {"quote": [{"close": [471.5, 472.65, null]}]}
                }],
                "error": null
            }
        });
        let normalized = raw(ProviderSchema::YahooChart, SeriesField::Close, ValueUnit::Decimal, body)
            .normalize()
            .unwrap();

        assert_eq!(normalized.dropped_rows, 1);
        let values = normalized
            .series
            .observations()
            .iter()
            .map(|obs| obs.value)
            .collect::<Vec<_>>();
        assert_eq!(values, vec![472.65, 471.5]);
    }

    #[test]
    fn yahoo_yield_index_in_percent_becomes_decimal() {
        let body = json!({
            "chart": {
                "result": [{
                    "timestamp": [1704205800],
                    "indicators": {"quote": [{"close": [3.95]}]}
                }],
                "error": null
            }
        });
        let normalized = raw(ProviderSchema::YahooChart, SeriesField::Close, ValueUnit::Percent, body)
            .normalize()
            .unwrap();
        assert!((normalized.series.observations()[0].value - 0.0395).abs() < 1e-15);
    }

    #[test]
    fn yahoo_error_object_is_malformed() {
        let body = json!({"chart": {"result": null, "error": {"code": "Not Found"}}});
        let err = raw(ProviderSchema::YahooChart, SeriesField::Close, ValueUnit::Decimal, body)
            .normalize()
            .expect_err("error payload");
        assert!(matches!(err, NormalizeError::MalformedPayload { .. }));
    }

    #[test]
    fn polygon_duplicates_keep_last_occurrence() {
        let body = json!({
            "status": "OK",
            "results": [
                {"t": 1704171600000_i64, "c": 185.64},
                {"t": 1704258000000_i64, "c": 184.25},
                {"t": 1704171600000_i64, "c": 185.70}
            ]
        });
        let normalized = raw(ProviderSchema::PolygonAggregates, SeriesField::Close, ValueUnit::Decimal, body)
            .normalize()
            .unwrap();

        assert_eq!(normalized.dropped_rows, 1);
        assert_eq!(normalized.series.len(), 2);
        assert_eq!(normalized.series.observations()[0].value, 185.70);
    }

    #[test]
    fn polygon_without_results_is_empty() {
        let body = json!({"status": "OK", "resultsCount": 0});
        let normalized = raw(ProviderSchema::PolygonAggregates, SeriesField::Close, ValueUnit::Decimal, body)
            .normalize()
            .unwrap();
        assert!(normalized.series.is_empty());
    }

    #[test]
    fn alphavantage_time_series_coerces_strings() {
        let body = json!({
            "Meta Data": {"2. Symbol": "IBM"},
            "Time Series (Daily)": {
                "2024-01-03": {"1. open": "160.00", "4. close": "158.45"},
                "2024-01-02": {"1. open": "161.00", "4. close": "not-a-number"}
            }
        });
        let normalized = raw(ProviderSchema::AlphaVantageTimeSeries, SeriesField::Close, ValueUnit::Decimal, body)
            .normalize()
            .unwrap();

        assert_eq!(normalized.dropped_rows, 1);
        assert_eq!(normalized.series.observations()[0].value, 158.45);
    }

    #[test]
    fn alphavantage_notice_is_malformed() {
        let body = json!({"Note": "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute."});
        let err = raw(ProviderSchema::AlphaVantageTimeSeries, SeriesField::Close, ValueUnit::Decimal, body)
            .normalize()
            .expect_err("notice payload");
        assert!(err.to_string().contains("provider notice"));
    }

    #[test]
    fn treasury_yield_drops_dots_and_converts_percent() {
        let body = json!({
            "name": "10-Year Treasury Constant Maturity Rate",
            "interval": "daily",
            "unit": "percent",
            "data": [
                {"date": "2024-01-03", "value": "3.91"},
                {"date": "2024-01-01", "value": "."},
                {"date": "2024-01-02", "value": "3.95"}
            ]
        });
        let normalized = raw(ProviderSchema::AlphaVantageTreasuryYield, SeriesField::Value, ValueUnit::Decimal, body)
            .normalize()
            .unwrap();

        assert_eq!(normalized.dropped_rows, 1);
        let values = normalized
            .series
            .observations()
            .iter()
            .map(|obs| obs.value)
            .collect::<Vec<_>>();
        assert!((values[0] - 0.0395).abs() < 1e-15);
        assert!((values[1] - 0.0391).abs() < 1e-15);
    }

    #[test]
    fn rejects_non_json_body() {
        let mut payload = raw(ProviderSchema::PolygonAggregates, SeriesField::Close, ValueUnit::Decimal, Value::Null);
        payload.body = String::from("<html>502 Bad Gateway</html>");
        assert!(matches!(
            payload.normalize(),
            Err(NormalizeError::MalformedPayload {
                schema: ProviderSchema::PolygonAggregates,
                ..
            })
        ));
    }

    #[test]
    fn canonical_normalization_is_idempotent() {
        let body = json!({
            "status": "OK",
            "results": [
                {"t": 1704258000000_i64, "c": 184.25},
                {"t": 1704171600000_i64, "c": 185.64}
            ]
        });
        let first = raw(ProviderSchema::PolygonAggregates, SeriesField::Close, ValueUnit::Decimal, body)
            .normalize()
            .unwrap();

        let mut canonical = raw(ProviderSchema::Canonical, SeriesField::Close, ValueUnit::Decimal, Value::Null);
        canonical.body = serde_json::to_string(&first.series).unwrap();
        let second = canonical.normalize().unwrap();

        assert_eq!(second.series, first.series);
        assert_eq!(second.dropped_rows, 0);
    }
}
