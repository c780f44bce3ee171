use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::dates::is_end_of_month;
use crate::KernelError;

/// Convention converting a date interval into a year fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DayCount {
    #[default]
    #[serde(rename = "act365f")]
    Act365Fixed,
    #[serde(rename = "act360")]
    Act360,
    /// US bond basis.
    #[serde(rename = "30/360")]
    Thirty360,
}

impl DayCount {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Act365Fixed => "act365f",
            Self::Act360 => "act360",
            Self::Thirty360 => "30/360",
        }
    }

    /// Signed year fraction between `start` and `end`.
    pub fn year_fraction(self, start: Date, end: Date) -> f64 {
        match self {
            Self::Act365Fixed => actual_days(start, end) as f64 / 365.0,
            Self::Act360 => actual_days(start, end) as f64 / 360.0,
            Self::Thirty360 => thirty_360_days(start, end) as f64 / 360.0,
        }
    }
}

fn actual_days(start: Date, end: Date) -> i64 {
    (end - start).whole_days()
}

fn thirty_360_days(start: Date, end: Date) -> i64 {
    let (y1, m1, mut d1) = (
        i64::from(start.year()),
        i64::from(u8::from(start.month())),
        i64::from(start.day()),
    );
    let (y2, m2, mut d2) = (
        i64::from(end.year()),
        i64::from(u8::from(end.month())),
        i64::from(end.day()),
    );

    let start_feb_eom = start.month() == time::Month::February && is_end_of_month(start);
    if start_feb_eom || d1 == 31 {
        d1 = 30;
    }
    let end_feb_eom = end.month() == time::Month::February && is_end_of_month(end);
    if (start_feb_eom && end_feb_eom) || (d2 == 31 && d1 >= 30) {
        d2 = 30;
    }

    360 * (y2 - y1) + 30 * (m2 - m1) + (d2 - d1)
}

impl Display for DayCount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DayCount {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "act365f" | "act/365f" | "act/365" => Ok(Self::Act365Fixed),
            "act360" | "act/360" => Ok(Self::Act360),
            "30/360" | "30360" | "thirty360" => Ok(Self::Thirty360),
            _ => Err(KernelError::curve(format!(
                "unknown day count '{value}', expected one of act365f, act360, 30/360"
            ))),
        }
    }
}
