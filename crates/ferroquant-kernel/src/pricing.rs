use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::curve::Curve;
use crate::dates::format_date;
use crate::instrument::{InstrumentKind, InstrumentSpec};
use crate::schedule::generate_schedule;
use crate::KernelError;

/// One basis point.
pub const DEFAULT_BUMP_SIZE: f64 = 0.0001;
pub const PARALLEL_KEY: &str = "parallel";

/// Present value and bump-and-reprice sensitivities.
///
/// Each sensitivity is `pv(bumped) - pv` for a one-sided upward shift of
/// `bump_size` in the named pillar's zero rate (`"pillar:YYYY-MM-DD"`) or in all
/// pillars at once (`"parallel"`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
    pub instrument_type: InstrumentKind,
    pub instrument_fingerprint: String,
    pub curve_id: String,
    pub curve_snapshot_hash: String,
    pub present_value: f64,
    pub sensitivities: BTreeMap<String, f64>,
    pub parallel_dv01: f64,
    pub bump_size: f64,
}

pub fn pillar_key(pillar_date: time::Date) -> String {
    format!("pillar:{}", format_date(pillar_date))
}

pub fn price_instrument(
    spec: &InstrumentSpec,
    curve: &Curve,
    bump_size: f64,
) -> Result<Valuation, KernelError> {
    if !bump_size.is_finite() || bump_size <= 0.0 {
        return Err(KernelError::InvalidBumpSize(bump_size));
    }
    let kind = spec.validate()?;
    let pv = present_value(spec, kind, curve)?;

    let mut sensitivities = BTreeMap::new();
    for (index, pillar) in curve.pillars().iter().enumerate() {
        let bumped = curve.bump_pillar(index, bump_size)?;
        sensitivities.insert(pillar_key(pillar.date), present_value(spec, kind, &bumped)? - pv);
    }
    let parallel_dv01 = present_value(spec, kind, &curve.bump_parallel(bump_size)?)? - pv;
    sensitivities.insert(String::from(PARALLEL_KEY), parallel_dv01);

    Ok(Valuation {
        instrument_type: kind,
        instrument_fingerprint: spec.fingerprint()?,
        curve_id: curve.curve_id().to_owned(),
        curve_snapshot_hash: curve.snapshot_hash().to_owned(),
        present_value: pv,
        sensitivities,
        parallel_dv01,
        bump_size,
    })
}

/// Present value of an instrument whose terms passed [`InstrumentSpec::validate`].
pub fn present_value(
    spec: &InstrumentSpec,
    kind: InstrumentKind,
    curve: &Curve,
) -> Result<f64, KernelError> {
    let notional = spec.notional;
    let rate = spec.rate.unwrap_or_default();
    let day_count = spec.accrual_day_count();
    let df_start = curve.discount_factor(spec.start);
    let df_maturity = curve.discount_factor(spec.maturity);
    let tau = day_count.year_fraction(spec.start, spec.maturity);

    let pv = match kind {
        InstrumentKind::ZeroCouponBond => notional * df_maturity,
        InstrumentKind::Deposit => notional * (1.0 + rate * tau) * df_maturity - notional * df_start,
        InstrumentKind::ForwardRateAgreement => {
            notional * (df_start - df_maturity) - notional * rate * tau * df_maturity
        }
        InstrumentKind::FixedRateBond => {
            notional * rate * annuity(spec, curve)? + notional * df_maturity
        }
        InstrumentKind::InterestRateSwap => {
            let floating = notional * (df_start - df_maturity);
            let fixed = notional * rate * annuity(spec, curve)?;
            floating - fixed
        }
    };

    Ok(pv)
}

/// Sum of accrual fractions weighted by payment-date discount factors.
fn annuity(spec: &InstrumentSpec, curve: &Curve) -> Result<f64, KernelError> {
    let day_count = spec.accrual_day_count();
    let periods = generate_schedule(spec.start, spec.maturity, spec.frequency.unwrap_or_default())?;

    Ok(periods
        .iter()
        .map(|period| day_count.year_fraction(period.start, period.end) * curve.discount_factor(period.end))
        .sum())
}
