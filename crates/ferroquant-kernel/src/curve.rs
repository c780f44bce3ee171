use serde::{Deserialize, Serialize};
use time::Date;

use crate::daycount::DayCount;
use crate::hash::content_hash;
use crate::interpolation::{self, Interpolation};
use crate::KernelError;

pub const DEFAULT_CURVE_ID: &str = "adhoc";

/// A `(date, rate)` anchor; `rate` is a continuously compounded zero rate in decimal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pillar {
    #[serde(with = "crate::dates::iso")]
    pub date: Date,
    pub rate: f64,
}

impl Pillar {
    pub fn new(date: Date, rate: f64) -> Self {
        Self { date, rate }
    }
}

/// Serialized form of a [`Curve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveDefinition {
    pub curve_id: String,
    #[serde(with = "crate::dates::iso")]
    pub as_of: Date,
    pub interpolation: Interpolation,
    pub day_count: DayCount,
    pub pillars: Vec<Pillar>,
}

/// Immutable discount curve.
///
/// Discount factors are `exp(-z(t) * t)` where `z` is the continuously compounded
/// zero rate and `t` the day-count year fraction from `as_of`. Before the first
/// pillar and after the last one the boundary zero rate is held flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CurveDefinition", into = "CurveDefinition")]
pub struct Curve {
    definition: CurveDefinition,
    times: Vec<f64>,
    rates: Vec<f64>,
    log_discounts: Vec<f64>,
    second_derivatives: Vec<f64>,
    snapshot_hash: String,
}

#[derive(Debug, Clone)]
pub struct CurveBuilder {
    curve_id: Option<String>,
    as_of: Option<Date>,
    day_count: DayCount,
    interpolation: Interpolation,
    pillars: Vec<Pillar>,
}

impl CurveBuilder {
    pub fn new(pillars: Vec<Pillar>) -> Self {
        Self {
            curve_id: None,
            as_of: None,
            day_count: DayCount::default(),
            interpolation: Interpolation::default(),
            pillars,
        }
    }

    pub fn curve_id(mut self, curve_id: impl Into<String>) -> Self {
        self.curve_id = Some(curve_id.into());
        self
    }

    /// Reference date; defaults to the first pillar date.
    pub fn as_of(mut self, as_of: Date) -> Self {
        self.as_of = Some(as_of);
        self
    }

    pub fn day_count(mut self, day_count: DayCount) -> Self {
        self.day_count = day_count;
        self
    }

    pub fn interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    pub fn build(self) -> Result<Curve, KernelError> {
        let first = self
            .pillars
            .first()
            .ok_or_else(|| KernelError::curve("at least one pillar is required"))?;
        let as_of = self.as_of.unwrap_or(first.date);

        Curve::from_definition(CurveDefinition {
            curve_id: self
                .curve_id
                .unwrap_or_else(|| String::from(DEFAULT_CURVE_ID)),
            as_of,
            interpolation: self.interpolation,
            day_count: self.day_count,
            pillars: self.pillars,
        })
    }
}

/// Builds a curve anchored at its first pillar with the default day count.
pub fn build_curve(pillars: Vec<Pillar>, interpolation: Interpolation) -> Result<Curve, KernelError> {
    CurveBuilder::new(pillars).interpolation(interpolation).build()
}

pub fn discount_factor(curve: &Curve, date: Date) -> f64 {
    curve.discount_factor(date)
}

impl Curve {
    fn from_definition(definition: CurveDefinition) -> Result<Self, KernelError> {
        validate_pillars(&definition)?;

        let day_count = definition.day_count;
        let times = definition
            .pillars
            .iter()
            .map(|pillar| day_count.year_fraction(definition.as_of, pillar.date))
            .collect::<Vec<_>>();
        if times.windows(2).any(|pair| pair[1] <= pair[0]) {
            return Err(KernelError::curve(format!(
                "pillar year fractions under {day_count} must be strictly increasing"
            )));
        }

        let rates = definition
            .pillars
            .iter()
            .map(|pillar| pillar.rate)
            .collect::<Vec<_>>();
        let log_discounts = rates
            .iter()
            .zip(times.iter())
            .map(|(rate, t)| -rate * t)
            .collect::<Vec<_>>();
        let second_derivatives = match definition.interpolation {
            Interpolation::Cubic => interpolation::natural_spline_second_derivatives(&times, &rates),
            Interpolation::Linear | Interpolation::LogLinear => vec![0.0; rates.len()],
        };
        let snapshot_hash = content_hash(&definition)
            .map_err(|error| KernelError::curve(format!("curve is not serializable: {error}")))?;

        Ok(Self {
            definition,
            times,
            rates,
            log_discounts,
            second_derivatives,
            snapshot_hash,
        })
    }

    pub fn curve_id(&self) -> &str {
        &self.definition.curve_id
    }

    pub fn as_of(&self) -> Date {
        self.definition.as_of
    }

    pub fn pillars(&self) -> &[Pillar] {
        &self.definition.pillars
    }

    pub fn interpolation(&self) -> Interpolation {
        self.definition.interpolation
    }

    pub fn day_count(&self) -> DayCount {
        self.definition.day_count
    }

    pub fn definition(&self) -> &CurveDefinition {
        &self.definition
    }

    /// FNV-1a hash of the canonical JSON definition.
    pub fn snapshot_hash(&self) -> &str {
        &self.snapshot_hash
    }

    pub fn year_fraction(&self, date: Date) -> f64 {
        self.definition.day_count.year_fraction(self.definition.as_of, date)
    }

    pub fn zero_rate(&self, date: Date) -> f64 {
        self.zero_rate_at(self.year_fraction(date))
    }

    pub fn discount_factor(&self, date: Date) -> f64 {
        self.discount_factor_at(self.year_fraction(date))
    }

    /// Continuously compounded forward rate between two dates.
    pub fn forward_rate(&self, start: Date, end: Date) -> Result<f64, KernelError> {
        let t1 = self.year_fraction(start);
        let t2 = self.year_fraction(end);
        if t2 <= t1 {
            return Err(KernelError::InvalidDateRange { start, end });
        }

        let df1 = self.discount_factor_at(t1);
        let df2 = self.discount_factor_at(t2);
        Ok((df1.ln() - df2.ln()) / (t2 - t1))
    }

    /// Same curve with the rate of pillar `index` shifted by `bump`.
    pub fn bump_pillar(&self, index: usize, bump: f64) -> Result<Self, KernelError> {
        if index >= self.definition.pillars.len() {
            return Err(KernelError::curve(format!("pillar index {index} out of range")));
        }
        let mut definition = self.definition.clone();
        definition.pillars[index].rate += bump;
        Self::from_definition(definition)
    }

    pub fn bump_parallel(&self, bump: f64) -> Result<Self, KernelError> {
        let mut definition = self.definition.clone();
        for pillar in &mut definition.pillars {
            pillar.rate += bump;
        }
        Self::from_definition(definition)
    }

    fn zero_rate_at(&self, t: f64) -> f64 {
        let last = self.times.len() - 1;
        if last == 0 || t <= self.times[0] {
            return self.rates[0];
        }
        if t >= self.times[last] {
            return self.rates[last];
        }

        match self.definition.interpolation {
            Interpolation::Linear => interpolation::linear(&self.times, &self.rates, t),
            Interpolation::Cubic => {
                interpolation::cubic(&self.times, &self.rates, &self.second_derivatives, t)
            }
            Interpolation::LogLinear => {
                -interpolation::linear(&self.times, &self.log_discounts, t) / t
            }
        }
    }

    fn discount_factor_at(&self, t: f64) -> f64 {
        let last = self.times.len() - 1;
        if self.definition.interpolation == Interpolation::LogLinear
            && last > 0
            && t > self.times[0]
            && t < self.times[last]
        {
            return interpolation::linear(&self.times, &self.log_discounts, t).exp();
        }

        let z = self.zero_rate_at(t);
        (-z * t).exp()
    }
}

fn validate_pillars(definition: &CurveDefinition) -> Result<(), KernelError> {
    if definition.pillars.is_empty() {
        return Err(KernelError::curve("at least one pillar is required"));
    }

    for (index, pillar) in definition.pillars.iter().enumerate() {
        if !pillar.rate.is_finite() {
            return Err(KernelError::curve(format!(
                "pillar {index} ({}) rate must be finite",
                pillar.date
            )));
        }
        if pillar.date < definition.as_of {
            return Err(KernelError::curve(format!(
                "pillar {} precedes curve as_of {}",
                pillar.date, definition.as_of
            )));
        }
    }

    if let Some(pair) = definition
        .pillars
        .windows(2)
        .find(|pair| pair[1].date <= pair[0].date)
    {
        return Err(KernelError::curve(format!(
            "pillar dates must be strictly increasing: {} is not after {}",
            pair[1].date, pair[0].date
        )));
    }

    Ok(())
}

impl TryFrom<CurveDefinition> for Curve {
    type Error = KernelError;

    fn try_from(value: CurveDefinition) -> Result<Self, Self::Error> {
        Self::from_definition(value)
    }
}

impl From<Curve> for CurveDefinition {
    fn from(value: Curve) -> Self {
        value.definition
    }
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use time::macros::date;

    use super::*;

    fn sample_pillars() -> Vec<Pillar> {
        vec![
            Pillar::new(date!(2024 - 01 - 01), 0.030),
            Pillar::new(date!(2024 - 07 - 01), 0.032),
            Pillar::new(date!(2025 - 01 - 01), 0.035),
            Pillar::new(date!(2027 - 01 - 01), 0.038),
            Pillar::new(date!(2034 - 01 - 01), 0.041),
        ]
    }

    #[test]
    fn linear_midpoint_blends_zero_rates() {
        let curve = build_curve(
            vec![
                Pillar::new(date!(2024 - 01 - 01), 0.03),
                Pillar::new(date!(2025 - 01 - 01), 0.035),
            ],
            Interpolation::Linear,
        )
        .unwrap();

        let t: f64 = 183.0 / 365.0;
        let z: f64 = 0.03 + 0.005 * (183.0 / 366.0);
        assert_abs_diff_eq!(curve.discount_factor(date!(2024 - 07 - 02)), (-z * t).exp(), epsilon = 1e-12);
        assert_abs_diff_eq!(curve.zero_rate(date!(2024 - 07 - 02)), 0.0325, epsilon = 1e-12);
    }

    #[test]
    fn discount_factor_reproduces_pillars_for_every_scheme() {
        for scheme in [Interpolation::Linear, Interpolation::LogLinear, Interpolation::Cubic] {
            let curve = build_curve(sample_pillars(), scheme).unwrap();
            for pillar in curve.pillars() {
                let t = curve.year_fraction(pillar.date);
                assert_eq!(curve.discount_factor(pillar.date), (-pillar.rate * t).exp(), "{scheme}");
            }
        }
    }

    #[test]
    fn extrapolates_flat_zero_rates() {
        let curve = build_curve(sample_pillars(), Interpolation::Cubic).unwrap();
        assert_relative_eq!(curve.zero_rate(date!(2040 - 06 - 30)), 0.041, epsilon = 1e-15);

        let anchored = CurveBuilder::new(sample_pillars()[1..].to_vec())
            .as_of(date!(2024 - 01 - 01))
            .build()
            .unwrap();
        assert_relative_eq!(anchored.zero_rate(date!(2024 - 03 - 01)), 0.032, epsilon = 1e-15);
    }

    #[test]
    fn cubic_stays_within_neighbouring_pillar_rates() {
        let cubic = build_curve(sample_pillars(), Interpolation::Cubic).unwrap();
        let rate = cubic.zero_rate(date!(2026 - 01 - 01));
        assert!(rate > 0.033 && rate < 0.040, "rate {rate}");
    }

    #[test]
    fn rejects_invalid_pillars() {
        assert!(matches!(
            build_curve(Vec::new(), Interpolation::Linear),
            Err(KernelError::InvalidCurveInput(_))
        ));

        let unordered = vec![
            Pillar::new(date!(2025 - 01 - 01), 0.03),
            Pillar::new(date!(2024 - 01 - 01), 0.03),
        ];
        assert!(matches!(
            build_curve(unordered, Interpolation::Linear),
            Err(KernelError::InvalidCurveInput(_))
        ));

        let duplicate = vec![
            Pillar::new(date!(2024 - 01 - 01), 0.03),
            Pillar::new(date!(2024 - 01 - 01), 0.031),
        ];
        assert!(build_curve(duplicate, Interpolation::Linear).is_err());

        let non_finite = vec![Pillar::new(date!(2024 - 01 - 01), f64::NAN)];
        assert!(build_curve(non_finite, Interpolation::Linear).is_err());

        let before_as_of = CurveBuilder::new(sample_pillars())
            .as_of(date!(2024 - 02 - 01))
            .build();
        assert!(matches!(before_as_of, Err(KernelError::InvalidCurveInput(_))));
    }

    #[test]
    fn forward_rate_is_consistent_with_discount_factors() {
        let curve = build_curve(sample_pillars(), Interpolation::LogLinear).unwrap();
        let (d1, d2) = (date!(2025 - 01 - 01), date!(2027 - 01 - 01));
        let forward = curve.forward_rate(d1, d2).unwrap();
        let tau = curve.year_fraction(d2) - curve.year_fraction(d1);
        assert_relative_eq!(
            curve.discount_factor(d1) * (-forward * tau).exp(),
            curve.discount_factor(d2),
            epsilon = 1e-14
        );
        assert!(matches!(
            curve.forward_rate(d2, d1),
            Err(KernelError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn serde_round_trip_preserves_snapshot_hash() {
        let curve = CurveBuilder::new(sample_pillars())
            .curve_id("usd-treasury")
            .interpolation(Interpolation::Cubic)
            .build()
            .unwrap();

        let json = serde_json::to_value(&curve).unwrap();
        assert_eq!(json["as_of"], "2024-01-01");
        assert_eq!(json["interpolation"], "cubic");

        let restored: Curve = serde_json::from_value(json).unwrap();
        assert_eq!(restored, curve);
        assert_eq!(restored.snapshot_hash(), curve.snapshot_hash());
    }

    #[test]
    fn bumped_curve_changes_hash_and_discounting() {
        let curve = build_curve(sample_pillars(), Interpolation::Linear).unwrap();
        let bumped = curve.bump_pillar(2, 0.0001).unwrap();
        assert_ne!(bumped.snapshot_hash(), curve.snapshot_hash());
        assert!(bumped.discount_factor(date!(2025 - 01 - 01)) < curve.discount_factor(date!(2025 - 01 - 01)));
        assert_eq!(
            bumped.discount_factor(date!(2034 - 01 - 01)),
            curve.discount_factor(date!(2034 - 01 - 01))
        );
    }
}
