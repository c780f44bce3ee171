//! Pure numeric kernel: day counts, discount curves, schedules, bump-and-reprice
//! valuation and household financial-profile ratios.
//!
//! Every function here is synchronous and side-effect free; identical inputs give
//! bit-identical outputs.

pub mod curve;
pub mod dates;
pub mod daycount;
pub mod error;
pub mod hash;
pub mod instrument;
pub mod interpolation;
pub mod pricing;
pub mod profile;
pub mod schedule;
pub mod tenor;

pub use curve::{build_curve, discount_factor, Curve, CurveBuilder, CurveDefinition, Pillar};
pub use dates::{format_date, parse_date};
pub use daycount::DayCount;
pub use error::KernelError;
pub use instrument::{InstrumentKind, InstrumentSpec};
pub use interpolation::Interpolation;
pub use pricing::{price_instrument, Valuation, DEFAULT_BUMP_SIZE};
pub use profile::{
    analyze_profile, BudgetSummary, CategoryShare, EmploymentStability, FinancialProfile, GoalKind,
    GoalTimeline, InvestmentGoal, ProfileAnalysis, SpendingCategory,
};
pub use schedule::{generate_schedule, Frequency, Period};
pub use tenor::{Tenor, TenorUnit};
