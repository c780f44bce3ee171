use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::{Date, Duration};

use crate::dates::add_months;
use crate::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TenorUnit {
    Day,
    Week,
    Month,
    Year,
}

impl TenorUnit {
    const fn suffix(self) -> char {
        match self {
            Self::Day => 'D',
            Self::Week => 'W',
            Self::Month => 'M',
            Self::Year => 'Y',
        }
    }
}

/// Time to maturity written as `<count><unit>`, e.g. `3M` or `10Y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tenor {
    pub count: u32,
    pub unit: TenorUnit,
}

impl Tenor {
    pub const fn new(count: u32, unit: TenorUnit) -> Self {
        Self { count, unit }
    }

    /// Date `self` after `date`; month and year tenors clamp to the month end.
    pub fn add_to(self, date: Date) -> Result<Date, KernelError> {
        let count = i32::try_from(self.count).map_err(|_| self.overflow(date))?;
        let shifted = match self.unit {
            TenorUnit::Day => date.checked_add(Duration::days(i64::from(count))),
            TenorUnit::Week => date.checked_add(Duration::weeks(i64::from(count))),
            TenorUnit::Month => Some(add_months(date, count)?),
            TenorUnit::Year => Some(add_months(date, count.saturating_mul(12))?),
        };
        shifted.ok_or_else(|| self.overflow(date))
    }

    fn overflow(self, date: Date) -> KernelError {
        KernelError::InvalidDate {
            value: format!("{date} + {self}"),
        }
    }
}

impl Display for Tenor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.count, self.unit.suffix())
    }
}

impl FromStr for Tenor {
    type Err = KernelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_uppercase();
        let invalid = || KernelError::InvalidTenor(value.to_owned());

        let unit = match normalized.chars().last() {
            Some('D') => TenorUnit::Day,
            Some('W') => TenorUnit::Week,
            Some('M') => TenorUnit::Month,
            Some('Y') => TenorUnit::Year,
            _ => return Err(invalid()),
        };
        let count = normalized[..normalized.len() - 1]
            .parse::<u32>()
            .map_err(|_| invalid())?;
        if count == 0 {
            return Err(invalid());
        }

        Ok(Self::new(count, unit))
    }
}

impl TryFrom<String> for Tenor {
    type Error = KernelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Tenor> for String {
    fn from(value: Tenor) -> Self {
        value.to_string()
    }
}
