//! # Tool Registry
//!
//! The operations the analytics service exposes, each with the JSON schema its
//! input must satisfy and the schema of the `data` it returns.
//!
//! | Tool | Description |
//! |------|-------------|
//! | `get_series` | normalized series for one or more provider requests |
//! | `build_curve` | discount curve from explicit pillars |
//! | `get_discount_curve` | discount curve from market quotes per tenor |
//! | `discount_factor` | discount factors and zero rates at dates |
//! | `price_instrument` | present value and bump-and-reprice sensitivities |
//! | `invalidate_cache` | explicit refresh of cached entries |
//! | `analyze_financial_profile` | household savings, debt and risk-capacity ratios |

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::ServiceError;
use crate::schema::validate_against_schema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    GetSeries,
    BuildCurve,
    GetDiscountCurve,
    DiscountFactor,
    PriceInstrument,
    InvalidateCache,
    AnalyzeFinancialProfile,
}

impl ToolName {
    pub const ALL: [Self; 7] = [
        Self::GetSeries,
        Self::BuildCurve,
        Self::GetDiscountCurve,
        Self::DiscountFactor,
        Self::PriceInstrument,
        Self::InvalidateCache,
        Self::AnalyzeFinancialProfile,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetSeries => "get_series",
            Self::BuildCurve => "build_curve",
            Self::GetDiscountCurve => "get_discount_curve",
            Self::DiscountFactor => "discount_factor",
            Self::PriceInstrument => "price_instrument",
            Self::InvalidateCache => "invalidate_cache",
            Self::AnalyzeFinancialProfile => "analyze_financial_profile",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name.trim())
    }
}

impl Display for ToolName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a tool-serving transport needs to advertise one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub description: &'static str,
    pub input_schema: Value,
    pub output_schema: Value,
}

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: ToolName::ALL.into_iter().map(describe).collect(),
        }
    }

    pub fn list(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        let tool = ToolName::from_name(name)?;
        self.tools.iter().find(|descriptor| descriptor.name == tool)
    }

    /// Resolves `name` and checks `input` against its schema, reporting every
    /// offending field.
    pub fn validate_input(&self, name: &str, input: &Value) -> Result<ToolName, ServiceError> {
        let descriptor = self
            .get(name)
            .ok_or_else(|| ServiceError::UnknownTool(name.to_owned()))?;

        validate_against_schema(input, &descriptor.input_schema)
            .map_err(|violations| ServiceError::Validation { violations })?;
        Ok(descriptor.name)
    }
}

fn describe(name: ToolName) -> ToolDescriptor {
    let (description, input_schema, output_schema) = match name {
        ToolName::GetSeries => (
            "Fetch normalized market data series. Each request resolves independently; \
             failed requests are reported per item while the others still return data.",
            json!({
                "type": "object",
                "required": ["requests"],
                "additionalProperties": false,
                "properties": {
                    "requests": { "type": "array", "minItems": 1, "items": series_request_schema() },
                    "refresh": { "type": "boolean" }
                }
            }),
            json!({
                "type": "object",
                "required": ["items"],
                "properties": {
                    "items": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["request", "cache_hit", "stale"],
                            "properties": {
                                "request": series_request_schema(),
                                "series": series_schema(),
                                "dropped_rows": { "type": "integer", "minimum": 0 },
                                "cache_hit": { "type": "boolean" },
                                "stale": { "type": "boolean" },
                                "error": { "type": "object" }
                            }
                        }
                    }
                }
            }),
        ),
        ToolName::BuildCurve => (
            "Build a discount curve from explicit (date, zero rate) pillars.",
            curve_input_schema(CurveFields::Pillars, false),
            curve_output_schema(),
        ),
        ToolName::GetDiscountCurve => (
            "Build a discount curve from market quotes, one series per tenor, using the \
             latest observation on or before the reference date.",
            curve_input_schema(CurveFields::Market, true),
            curve_output_schema(),
        ),
        ToolName::DiscountFactor => (
            "Discount factors and continuously compounded zero rates at the given dates.",
            json!({
                "type": "object",
                "required": ["curve", "dates"],
                "additionalProperties": false,
                "properties": {
                    "curve": curve_input_schema(CurveFields::Either, false),
                    "dates": { "type": "array", "minItems": 1, "items": date_schema() },
                    "refresh": { "type": "boolean" }
                }
            }),
            json!({
                "type": "object",
                "required": ["curve_id", "snapshot_hash", "as_of", "points"],
                "properties": {
                    "curve_id": { "type": "string" },
                    "snapshot_hash": { "type": "string" },
                    "as_of": date_schema(),
                    "points": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "required": ["date", "year_fraction", "discount_factor", "zero_rate"],
                            "properties": {
                                "date": date_schema(),
                                "year_fraction": { "type": "number" },
                                "discount_factor": { "type": "number" },
                                "zero_rate": { "type": "number" }
                            }
                        }
                    }
                }
            }),
        ),
        ToolName::PriceInstrument => (
            "Present value of an instrument against a curve, with one-sided bump-and-reprice \
             sensitivities per pillar and for a parallel shift.",
            json!({
                "type": "object",
                "required": ["instrument", "curve"],
                "additionalProperties": false,
                "properties": {
                    "instrument": instrument_schema(),
                    "curve": curve_input_schema(CurveFields::Either, false),
                    "bump_size": { "type": "number", "exclusiveMinimum": 0 },
                    "refresh": { "type": "boolean" }
                }
            }),
            json!({
                "type": "object",
                "required": [
                    "instrument_type", "instrument_fingerprint", "curve_id", "curve_snapshot_hash",
                    "present_value", "sensitivities", "parallel_dv01", "bump_size", "computed_at",
                    "curve_cache_hit"
                ],
                "properties": {
                    "instrument_type": { "type": "string" },
                    "instrument_fingerprint": { "type": "string" },
                    "curve_id": { "type": "string" },
                    "curve_snapshot_hash": { "type": "string" },
                    "present_value": { "type": "number" },
                    "sensitivities": { "type": "object" },
                    "parallel_dv01": { "type": "number" },
                    "bump_size": { "type": "number" },
                    "computed_at": { "type": "string" },
                    "curve_cache_hit": { "type": "boolean" }
                }
            }),
        ),
        ToolName::InvalidateCache => (
            "Drop cached entries by exact key, key prefix or entity kind, and optionally \
             purge everything past its TTL.",
            json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "key": { "type": "string", "minLength": 1 },
                    "prefix": { "type": "string", "minLength": 1 },
                    "kind": { "type": "string", "enum": ["series", "curve", "valuation"] },
                    "purge_expired": { "type": "boolean" }
                }
            }),
            json!({
                "type": "object",
                "required": ["removed", "purged", "stats"],
                "properties": {
                    "removed": { "type": "integer", "minimum": 0 },
                    "purged": { "type": "integer", "minimum": 0 },
                    "stats": { "type": "object" }
                }
            }),
        ),
        ToolName::AnalyzeFinancialProfile => (
            "Score a household's finances: savings rate, debt-to-income, emergency-fund \
             cover, a 0-100 health score, risk capacity, spending by category and goal timelines.",
            json!({
                "type": "object",
                "required": ["profile"],
                "additionalProperties": false,
                "properties": { "profile": profile_schema() }
            }),
            json!({
                "type": "object",
                "required": [
                    "financial_health_score", "savings_rate", "debt_to_income_ratio",
                    "emergency_fund_months", "risk_capacity_score", "spending_breakdown",
                    "financial_priorities", "improvement_areas", "budget"
                ],
                "properties": {
                    "financial_health_score": { "type": "integer", "minimum": 0, "maximum": 100 },
                    "savings_rate": { "type": "number" },
                    "debt_to_income_ratio": { "type": "number", "minimum": 0 },
                    "emergency_fund_months": { "type": "number", "minimum": 0 },
                    "risk_capacity_score": { "type": "number", "minimum": 0.1, "maximum": 1 },
                    "spending_breakdown": {
                        "type": "object",
                        "additionalProperties": {
                            "type": "object",
                            "required": ["amount", "percentage"],
                            "properties": {
                                "amount": { "type": "number", "minimum": 0 },
                                "percentage": { "type": "number", "minimum": 0, "maximum": 100 }
                            }
                        }
                    },
                    "financial_priorities": { "type": "array", "items": { "type": "string" } },
                    "improvement_areas": { "type": "array", "items": { "type": "string" } },
                    "budget": {
                        "type": "object",
                        "required": [
                            "monthly_income", "monthly_expenses", "monthly_surplus",
                            "emergency_fund_target", "discretionary_spending", "savings_timeline"
                        ],
                        "properties": {
                            "monthly_income": { "type": "number" },
                            "monthly_expenses": { "type": "number" },
                            "monthly_surplus": { "type": "number" },
                            "emergency_fund_target": { "type": "number" },
                            "discretionary_spending": { "type": "number" },
                            "savings_timeline": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "required": ["goal_type", "target_amount", "months_to_target"],
                                    "properties": {
                                        "goal_type": goal_kind_schema(),
                                        "target_amount": { "type": "number" },
                                        "months_to_target": { "type": ["integer", "null"] }
                                    }
                                }
                            }
                        }
                    }
                }
            }),
        ),
    };

    ToolDescriptor {
        name,
        description,
        input_schema,
        output_schema,
    }
}

fn profile_schema() -> Value {
    let amount = json!({ "type": "number", "minimum": 0 });
    json!({
        "type": "object",
        "additionalProperties": false,
        "properties": {
            "age": { "type": "integer", "minimum": 0, "maximum": 130 },
            "annual_income": amount,
            "monthly_expenses": { "type": "object", "additionalProperties": amount },
            "current_savings": amount,
            "current_debt": amount,
            "dependents": { "type": "integer", "minimum": 0 },
            "employment_stability": {
                "type": "string",
                "enum": ["stable", "moderate", "unstable"]
            },
            "investment_goals": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["goal_type"],
                    "additionalProperties": false,
                    "properties": {
                        "goal_type": goal_kind_schema(),
                        "target_amount": amount,
                        "timeline_years": { "type": "integer", "minimum": 0 }
                    }
                }
            }
        }
    })
}

fn goal_kind_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["retirement", "education", "home_purchase", "emergency_fund", "wealth_building"]
    })
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CurveFields {
    Pillars,
    Market,
    Either,
}

fn curve_input_schema(fields: CurveFields, refresh: bool) -> Value {
    let mut properties = json!({
        "curve_id": { "type": "string", "minLength": 1 },
        "as_of": date_schema(),
        "interpolation": { "type": "string", "enum": ["linear", "log_linear", "cubic"] },
        "day_count": day_count_schema()
    });
    let pillars = json!({ "type": "array", "minItems": 1, "items": pillar_schema() });
    let market = json!({ "type": "array", "minItems": 1, "items": tenor_quote_schema() });

    let required = match fields {
        CurveFields::Pillars => {
            properties["pillars"] = pillars;
            json!(["pillars"])
        }
        CurveFields::Market => {
            properties["market"] = market;
            json!(["market"])
        }
        CurveFields::Either => {
            properties["pillars"] = pillars;
            properties["market"] = market;
            json!([])
        }
    };
    if refresh {
        properties["refresh"] = json!({ "type": "boolean" });
    }

    json!({
        "type": "object",
        "required": required,
        "additionalProperties": false,
        "properties": properties
    })
}

fn curve_output_schema() -> Value {
    json!({
        "type": "object",
        "required": ["curve", "snapshot_hash"],
        "properties": {
            "curve": {
                "type": "object",
                "required": ["curve_id", "as_of", "interpolation", "day_count", "pillars"],
                "properties": {
                    "curve_id": { "type": "string" },
                    "as_of": date_schema(),
                    "interpolation": { "type": "string" },
                    "day_count": day_count_schema(),
                    "pillars": { "type": "array", "items": pillar_schema() }
                }
            },
            "snapshot_hash": { "type": "string" }
        }
    })
}

fn series_request_schema() -> Value {
    json!({
        "type": "object",
        "required": ["provider", "symbol"],
        "additionalProperties": false,
        "properties": {
            "provider": provider_schema(),
            "symbol": { "type": "string", "minLength": 1 },
            "field": field_schema(),
            "granularity": granularity_schema(),
            "start": date_schema(),
            "end": date_schema(),
            "unit": unit_schema()
        }
    })
}

fn series_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "source", "fetched_at", "observations"],
        "properties": {
            "source": provider_schema(),
            "fetched_at": { "type": "string" },
            "observations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["ts", "value"],
                    "properties": {
                        "ts": { "type": "string" },
                        "value": { "type": "number" }
                    }
                }
            }
        }
    })
}

fn tenor_quote_schema() -> Value {
    json!({
        "type": "object",
        "required": ["tenor", "provider", "symbol"],
        "additionalProperties": false,
        "properties": {
            "tenor": { "type": "string", "format": "tenor" },
            "provider": provider_schema(),
            "symbol": { "type": "string", "minLength": 1 },
            "field": field_schema(),
            "granularity": granularity_schema(),
            "unit": unit_schema()
        }
    })
}

fn pillar_schema() -> Value {
    json!({
        "type": "object",
        "required": ["date", "rate"],
        "additionalProperties": false,
        "properties": {
            "date": date_schema(),
            "rate": { "type": "number" }
        }
    })
}

fn instrument_schema() -> Value {
    json!({
        "type": "object",
        "required": ["instrument_type", "notional", "start", "maturity"],
        "additionalProperties": false,
        "properties": {
            "instrument_type": { "type": "string", "minLength": 1 },
            "notional": { "type": "number" },
            "start": date_schema(),
            "maturity": date_schema(),
            "rate": { "type": "number" },
            "frequency": {
                "type": "string",
                "enum": ["annual", "semi_annual", "quarterly", "monthly"]
            },
            "day_count": day_count_schema(),
            "curve_id": { "type": "string" }
        }
    })
}

fn date_schema() -> Value {
    json!({ "type": "string", "format": "date" })
}

fn provider_schema() -> Value {
    json!({ "type": "string", "enum": ["yahoo", "polygon", "alphavantage"] })
}

fn field_schema() -> Value {
    json!({
        "type": "string",
        "enum": ["open", "high", "low", "close", "adjusted_close", "volume", "value"]
    })
}

fn granularity_schema() -> Value {
    json!({ "type": "string", "enum": ["daily", "weekly", "monthly"] })
}

fn unit_schema() -> Value {
    json!({ "type": "string", "enum": ["decimal", "percent"] })
}

fn day_count_schema() -> Value {
    json!({ "type": "string", "enum": ["act365f", "act360", "30/360"] })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_every_tool_once() {
        let registry = ToolRegistry::new();
        let names = registry
            .list()
            .iter()
            .map(|tool| tool.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            [
                "get_series",
                "build_curve",
                "get_discount_curve",
                "discount_factor",
                "price_instrument",
                "invalidate_cache",
                "analyze_financial_profile"
            ]
        );
        assert!(registry
            .list()
            .iter()
            .all(|tool| tool.input_schema["type"] == "object" && !tool.description.is_empty()));
    }

    #[test]
    fn profile_amounts_must_be_non_negative() {
        let registry = ToolRegistry::new();
        let ok = json!({
            "profile": {
                "annual_income": 90000,
                "monthly_expenses": { "housing": 2000, "dining": 250.5 },
                "investment_goals": [{ "goal_type": "education", "timeline_years": 10 }]
            }
        });
        assert_eq!(
            registry.validate_input("analyze_financial_profile", &ok).unwrap(),
            ToolName::AnalyzeFinancialProfile
        );

        let bad = json!({
            "profile": {
                "monthly_expenses": { "dining": -5 },
                "employment_stability": "freelance",
                "investment_goals": [{ "goal_type": "yacht" }]
            }
        });
        let ServiceError::Validation { violations } = registry
            .validate_input("analyze_financial_profile", &bad)
            .unwrap_err()
        else {
            panic!("expected a validation error");
        };
        let paths = violations
            .iter()
            .map(|violation| violation.path.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            [
                "/profile/employment_stability",
                "/profile/investment_goals/0/goal_type",
                "/profile/monthly_expenses/dining"
            ]
        );
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let error = ToolRegistry::new()
            .validate_input("execute_trade", &json!({}))
            .unwrap_err();
        assert!(matches!(error, ServiceError::UnknownTool(name) if name == "execute_trade"));
    }

    #[test]
    fn build_curve_requires_pillars_and_rejects_market() {
        let registry = ToolRegistry::new();
        let ok = json!({ "pillars": [{ "date": "2024-01-01", "rate": 0.03 }] });
        assert_eq!(registry.validate_input("build_curve", &ok).unwrap(), ToolName::BuildCurve);

        let bad = json!({
            "market": [{ "tenor": "1Y", "provider": "yahoo", "symbol": "RATE1Y" }]
        });
        let ServiceError::Validation { violations } =
            registry.validate_input("build_curve", &bad).unwrap_err()
        else {
            panic!("expected validation error");
        };
        let paths = violations.iter().map(|v| v.path.as_str()).collect::<Vec<_>>();
        assert_eq!(paths, ["/pillars", "/market"]);
    }

    #[test]
    fn price_instrument_reports_all_offending_fields() {
        let input = json!({
            "instrument": {
                "instrument_type": "fixed_rate_bond",
                "notional": "1m",
                "start": "2024-01-01",
                "maturity": "2029-02-30"
            },
            "curve": { "market": [{ "tenor": "6X", "provider": "bloomberg", "symbol": "RATE6M" }] },
            "bump_size": -0.0001
        });

        let ServiceError::Validation { violations } = ToolRegistry::new()
            .validate_input("price_instrument", &input)
            .unwrap_err()
        else {
            panic!("expected validation error");
        };
        let paths = violations.iter().map(|v| v.path.as_str()).collect::<Vec<_>>();
        for expected in [
            "/instrument/notional",
            "/instrument/maturity",
            "/curve/market/0/tenor",
            "/curve/market/0/provider",
            "/bump_size",
        ] {
            assert!(paths.contains(&expected), "missing {expected} in {paths:?}");
        }
    }
}
