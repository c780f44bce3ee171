//! Calendar helpers shared by curves and schedules.

use time::macros::format_description;
use time::{Date, Month};

use crate::KernelError;

const ISO_DATE: &[time::format_description::BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]");

/// Parses a `YYYY-MM-DD` calendar date.
pub fn parse_date(input: &str) -> Result<Date, KernelError> {
    Date::parse(input.trim(), ISO_DATE).map_err(|_| KernelError::InvalidDate {
        value: input.to_owned(),
    })
}

pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

pub fn days_in_month(year: i32, month: Month) -> u8 {
    match month {
        Month::January
        | Month::March
        | Month::May
        | Month::July
        | Month::August
        | Month::October
        | Month::December => 31,
        Month::April | Month::June | Month::September | Month::November => 30,
        Month::February => {
            if time::util::is_leap_year(year) {
                29
            } else {
                28
            }
        }
    }
}

pub fn is_end_of_month(date: Date) -> bool {
    date.day() == days_in_month(date.year(), date.month())
}

/// Shifts `date` by whole months, clamping the day to the target month's length.
pub fn add_months(date: Date, months: i32) -> Result<Date, KernelError> {
    let index = date.year() * 12 + i32::from(u8::from(date.month())) - 1 + months;
    let year = index.div_euclid(12);
    let month_number = (index.rem_euclid(12) + 1) as u8;
    let month = Month::try_from(month_number).map_err(|_| KernelError::InvalidDate {
        value: format!("{year}-{month_number:02}"),
    })?;
    let day = date.day().min(days_in_month(year, month));

    Date::from_calendar_date(year, month, day).map_err(|_| KernelError::InvalidDate {
        value: format!("{year}-{month_number:02}-{day:02}"),
    })
}

/// Serde adapter for `YYYY-MM-DD` dates.
pub mod iso {
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};
    use time::Date;

    pub fn serialize<S>(date: &Date, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_date(*date))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Date, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        super::parse_date(&value).map_err(D::Error::custom)
    }

    pub mod option {
        use serde::de::Error as DeError;
        use serde::{Deserialize, Deserializer, Serializer};
        use time::Date;

        pub fn serialize<S>(date: &Option<Date>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match date {
                Some(date) => serializer.serialize_some(&super::super::format_date(*date)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Date>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|value| super::super::parse_date(&value).map_err(D::Error::custom))
                .transpose()
        }
    }
}
