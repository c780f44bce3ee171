use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::dates::{add_months, days_in_month, is_end_of_month};
use crate::KernelError;

/// Coupon frequency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    #[default]
    Annual,
    SemiAnnual,
    Quarterly,
    Monthly,
}

impl Frequency {
    pub const fn months(self) -> i32 {
        match self {
            Self::Annual => 12,
            Self::SemiAnnual => 6,
            Self::Quarterly => 3,
            Self::Monthly => 1,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::SemiAnnual => "semi_annual",
            Self::Quarterly => "quarterly",
            Self::Monthly => "monthly",
        }
    }
}

impl Display for Frequency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "annual" | "1y" => Ok(Self::Annual),
            "semi_annual" | "semiannual" | "6m" => Ok(Self::SemiAnnual),
            "quarterly" | "3m" => Ok(Self::Quarterly),
            "monthly" | "1m" => Ok(Self::Monthly),
            _ => Err(KernelError::instrument(format!(
                "unknown frequency '{value}', expected one of annual, semi_annual, quarterly, monthly"
            ))),
        }
    }
}

/// Accrual period; the cash flow is paid on `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: Date,
    pub end: Date,
}

/// Rolls backward from `maturity` in whole periods; any stub sits at the front.
///
/// A maturity on a month end keeps rolled dates on month ends, otherwise the day
/// is clamped to the target month's length.
pub fn generate_schedule(
    start: Date,
    maturity: Date,
    frequency: Frequency,
) -> Result<Vec<Period>, KernelError> {
    if maturity <= start {
        return Err(KernelError::InvalidDateRange {
            start,
            end: maturity,
        });
    }

    let snap_to_month_end = is_end_of_month(maturity);
    let mut dates = vec![maturity];
    let mut step = 1;
    loop {
        let mut rolled = add_months(maturity, -frequency.months() * step)?;
        if snap_to_month_end {
            let last_day = days_in_month(rolled.year(), rolled.month());
            rolled = rolled.replace_day(last_day).map_err(|_| KernelError::InvalidDate {
                value: rolled.to_string(),
            })?;
        }
        if rolled <= start {
            break;
        }
        dates.push(rolled);
        step += 1;
    }
    dates.push(start);
    dates.reverse();

    Ok(dates
        .windows(2)
        .map(|pair| Period {
            start: pair[0],
            end: pair[1],
        })
        .collect())
}
