use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::KernelError;

/// Interpolation scheme used between curve pillars.
///
/// `Linear` and `Cubic` interpolate continuously compounded zero rates;
/// `LogLinear` interpolates the logarithm of discount factors. A natural cubic
/// spline over two pillars is a straight line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    LogLinear,
    Cubic,
}

impl Interpolation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::LogLinear => "log_linear",
            Self::Cubic => "cubic",
        }
    }
}

impl Display for Interpolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interpolation {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(Self::Linear),
            "log_linear" | "loglinear" => Ok(Self::LogLinear),
            "cubic" | "cubic_spline" => Ok(Self::Cubic),
            _ => Err(KernelError::curve(format!(
                "unknown interpolation '{value}', expected one of linear, log_linear, cubic"
            ))),
        }
    }
}

/// Index `i` such that `xs[i] <= x < xs[i + 1]`, clamped to the last segment.
pub(crate) fn find_segment(xs: &[f64], x: f64) -> usize {
    let last = xs.len().saturating_sub(2);
    match xs.binary_search_by(|candidate| candidate.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal)) {
        Ok(i) => i.min(last),
        Err(i) => i.saturating_sub(1).min(last),
    }
}

pub(crate) fn linear(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let i = find_segment(xs, x);
    let weight = (x - xs[i]) / (xs[i + 1] - xs[i]);
    ys[i] + (ys[i + 1] - ys[i]) * weight
}

/// Second derivatives of the natural cubic spline through `(xs, ys)`.
pub(crate) fn natural_spline_second_derivatives(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let mut y2s = vec![0.0; n];
    if n < 3 {
        return y2s;
    }
    let mut u = vec![0.0; n - 1];

    for i in 1..n - 1 {
        let sig = (xs[i] - xs[i - 1]) / (xs[i + 1] - xs[i - 1]);
        let p = sig * y2s[i - 1] + 2.0;
        y2s[i] = (sig - 1.0) / p;
        let slope_delta =
            (ys[i + 1] - ys[i]) / (xs[i + 1] - xs[i]) - (ys[i] - ys[i - 1]) / (xs[i] - xs[i - 1]);
        u[i] = (6.0 * slope_delta / (xs[i + 1] - xs[i - 1]) - sig * u[i - 1]) / p;
    }

    y2s[n - 1] = 0.0;
    for i in (0..n - 1).rev() {
        y2s[i] = y2s[i] * y2s[i + 1] + u[i];
    }

    y2s
}

pub(crate) fn cubic(xs: &[f64], ys: &[f64], y2s: &[f64], x: f64) -> f64 {
    let i = find_segment(xs, x);
    let h = xs[i + 1] - xs[i];
    let a = (xs[i + 1] - x) / h;
    let b = (x - xs[i]) / h;

    a * ys[i] + b * ys[i + 1] + ((a * a * a - a) * y2s[i] + (b * b * b - b) * y2s[i + 1]) * (h * h) / 6.0
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn segment_lookup_clamps_to_last_interval() {
        let xs = [0.0, 1.0, 2.0];
        assert_eq!(find_segment(&xs, 0.0), 0);
        assert_eq!(find_segment(&xs, 1.5), 1);
        assert_eq!(find_segment(&xs, 2.0), 1);
    }

    #[test]
    fn spline_passes_through_knots() {
        let xs = [0.0, 1.0, 2.0, 3.0];
        let ys = [0.0, 1.0, 4.0, 9.0];
        let y2s = natural_spline_second_derivatives(&xs, &ys);

        for (x, y) in xs.iter().zip(ys.iter()) {
            assert_relative_eq!(cubic(&xs, &ys, &y2s, *x), *y, epsilon = 1e-12);
        }
        assert_eq!(y2s[0], 0.0);
        assert_eq!(y2s[3], 0.0);
    }

    #[test]
    fn two_point_spline_is_linear() {
        let xs = [0.0, 2.0];
        let ys = [1.0, 3.0];
        let y2s = natural_spline_second_derivatives(&xs, &ys);
        assert_relative_eq!(cubic(&xs, &ys, &y2s, 0.5), linear(&xs, &ys, 0.5), epsilon = 1e-15);
    }

    #[test]
    fn parses_names() {
        assert_eq!("LogLinear".parse::<Interpolation>().unwrap(), Interpolation::LogLinear);
        assert!("akima".parse::<Interpolation>().is_err());
    }
}
