//! # Domain Models
//!
//! Canonical market data types shared by the adapters, the normalizer and the
//! analytics service. Construction validates every invariant, so a [`Series`]
//! in hand is always strictly ordered with finite values.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Series`] | Ordered observations for one symbol/field/granularity |
//! | [`SeriesRequest`] | One series to fetch from one provider |
//! | [`Symbol`] | Validated ticker or index code |
//! | [`UtcDateTime`] | UTC timestamp |

mod series;
mod symbol;
mod timestamp;

pub use series::{
    Granularity, Observation, Series, SeriesField, SeriesId, SeriesRequest, ValueUnit,
};
pub use symbol::Symbol;
pub use timestamp::UtcDateTime;
