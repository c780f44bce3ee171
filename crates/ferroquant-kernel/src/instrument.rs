use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::daycount::DayCount;
use crate::hash::content_hash;
use crate::schedule::Frequency;
use crate::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    ZeroCouponBond,
    FixedRateBond,
    /// Payer swap: pays fixed, receives floating projected off the discount curve.
    InterestRateSwap,
    /// Long FRA: receives the floating rate against the contract rate.
    ForwardRateAgreement,
    Deposit,
}

impl InstrumentKind {
    pub const ALL: [Self; 5] = [
        Self::ZeroCouponBond,
        Self::FixedRateBond,
        Self::InterestRateSwap,
        Self::ForwardRateAgreement,
        Self::Deposit,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ZeroCouponBond => "zero_coupon_bond",
            Self::FixedRateBond => "fixed_rate_bond",
            Self::InterestRateSwap => "interest_rate_swap",
            Self::ForwardRateAgreement => "forward_rate_agreement",
            Self::Deposit => "deposit",
        }
    }

    pub const fn requires_rate(self) -> bool {
        !matches!(self, Self::ZeroCouponBond)
    }
}

impl Display for InstrumentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstrumentKind {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| KernelError::UnsupportedInstrument(value.to_owned()))
    }
}

/// Instrument terms as supplied by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    pub instrument_type: String,
    pub notional: f64,
    #[serde(with = "crate::dates::iso")]
    pub start: Date,
    #[serde(with = "crate::dates::iso")]
    pub maturity: Date,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Frequency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_count: Option<DayCount>,
    #[serde(default)]
    pub curve_id: String,
}

impl InstrumentSpec {
    /// Resolves the instrument kind and checks the terms it needs.
    pub fn validate(&self) -> Result<InstrumentKind, KernelError> {
        let kind = self.instrument_type.parse::<InstrumentKind>()?;

        if !self.notional.is_finite() {
            return Err(KernelError::instrument("notional must be finite"));
        }
        if self.maturity <= self.start {
            return Err(KernelError::instrument(format!(
                "maturity {} must be after start {}",
                self.maturity, self.start
            )));
        }
        match self.rate {
            Some(rate) if !rate.is_finite() => {
                return Err(KernelError::instrument("rate must be finite"));
            }
            None if kind.requires_rate() => {
                return Err(KernelError::instrument(format!("{kind} requires a rate")));
            }
            _ => {}
        }

        Ok(kind)
    }

    pub fn accrual_day_count(&self) -> DayCount {
        self.day_count.unwrap_or_default()
    }

    pub fn fingerprint(&self) -> Result<String, KernelError> {
        content_hash(self)
            .map_err(|error| KernelError::instrument(format!("instrument is not serializable: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use time::macros::date;

    use super::*;

    fn swap() -> InstrumentSpec {
        InstrumentSpec {
            instrument_type: String::from("interest_rate_swap"),
            notional: 1_000_000.0,
            start: date!(2024 - 01 - 01),
            maturity: date!(2029 - 01 - 01),
            rate: Some(0.04),
            frequency: Some(Frequency::SemiAnnual),
            day_count: None,
            curve_id: String::from("usd"),
        }
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let spec = InstrumentSpec {
            instrument_type: String::from("credit_default_swap"),
            ..swap()
        };
        assert_eq!(
            spec.validate(),
            Err(KernelError::UnsupportedInstrument(String::from("credit_default_swap")))
        );
    }

    #[test]
    fn rate_bearing_kinds_need_a_rate() {
        let spec = InstrumentSpec { rate: None, ..swap() };
        assert!(matches!(spec.validate(), Err(KernelError::InvalidInstrument(_))));

        let zero = InstrumentSpec {
            instrument_type: String::from("zero_coupon_bond"),
            rate: None,
            ..swap()
        };
        assert_eq!(zero.validate(), Ok(InstrumentKind::ZeroCouponBond));
    }

    #[test]
    fn maturity_must_follow_start() {
        let spec = InstrumentSpec {
            maturity: date!(2024 - 01 - 01),
            ..swap()
        };
        assert!(matches!(spec.validate(), Err(KernelError::InvalidInstrument(_))));
    }

    #[test]
    fn deserializes_from_tool_input() {
        let spec: InstrumentSpec = serde_json::from_value(json!({
            "instrument_type": "fixed_rate_bond",
            "notional": 100.0,
            "start": "2024-01-01",
            "maturity": "2026-01-01",
            "rate": 0.05,
            "frequency": "semi_annual"
        }))
        .unwrap();
        assert_eq!(spec.frequency, Some(Frequency::SemiAnnual));
        assert_eq!(spec.accrual_day_count(), DayCount::Act365Fixed);
        assert_eq!(spec.validate(), Ok(InstrumentKind::FixedRateBond));
    }

    #[test]
    fn fingerprint_tracks_terms() {
        let base = swap();
        assert_eq!(base.fingerprint().unwrap(), swap().fingerprint().unwrap());
        let other = InstrumentSpec { rate: Some(0.041), ..swap() };
        assert_ne!(base.fingerprint().unwrap(), other.fingerprint().unwrap());
    }
}
