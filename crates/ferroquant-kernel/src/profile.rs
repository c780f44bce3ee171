//! Household financial-profile ratios: savings rate, debt load, emergency-fund
//! cover, a 0-100 health score and a 0.1-1.0 risk capacity.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::KernelError;

/// Months of expenses an emergency fund should cover.
pub const EMERGENCY_FUND_TARGET_MONTHS: f64 = 6.0;
const DEFAULT_AGE: u32 = 30;
/// Goals at or under this horizon are listed as short-term priorities.
const SHORT_TERM_YEARS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmploymentStability {
    Stable,
    #[default]
    Moderate,
    Unstable,
}

impl EmploymentStability {
    const fn risk_factor(self) -> f64 {
        match self {
            Self::Stable => 1.0,
            Self::Moderate => 0.8,
            Self::Unstable => 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalKind {
    Retirement,
    Education,
    HomePurchase,
    EmergencyFund,
    WealthBuilding,
}

impl GoalKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retirement => "retirement",
            Self::Education => "education",
            Self::HomePurchase => "home_purchase",
            Self::EmergencyFund => "emergency_fund",
            Self::WealthBuilding => "wealth_building",
        }
    }
}

impl Display for GoalKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvestmentGoal {
    pub goal_type: GoalKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<f64>,
    #[serde(default)]
    pub timeline_years: u32,
}

/// A household's income, spending and balance sheet. Amounts are in one
/// currency; `current_debt` is the yearly debt service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialProfile {
    #[serde(default = "default_age")]
    pub age: u32,
    #[serde(default)]
    pub annual_income: f64,
    /// Monthly spend per expense name, e.g. `housing` or `dining`.
    #[serde(default)]
    pub monthly_expenses: BTreeMap<String, f64>,
    #[serde(default)]
    pub current_savings: f64,
    #[serde(default)]
    pub current_debt: f64,
    #[serde(default)]
    pub dependents: u32,
    #[serde(default)]
    pub employment_stability: EmploymentStability,
    #[serde(default)]
    pub investment_goals: Vec<InvestmentGoal>,
}

const fn default_age() -> u32 {
    DEFAULT_AGE
}

impl FinancialProfile {
    pub fn validate(&self) -> Result<(), KernelError> {
        non_negative("annual_income", self.annual_income)?;
        non_negative("current_savings", self.current_savings)?;
        non_negative("current_debt", self.current_debt)?;
        for (name, amount) in &self.monthly_expenses {
            non_negative(&format!("monthly_expenses/{name}"), *amount)?;
        }
        for (index, goal) in self.investment_goals.iter().enumerate() {
            if let Some(target) = goal.target_amount {
                non_negative(&format!("investment_goals/{index}/target_amount"), target)?;
            }
        }
        Ok(())
    }

    pub fn monthly_income(&self) -> f64 {
        self.annual_income / 12.0
    }

    pub fn total_monthly_expenses(&self) -> f64 {
        self.monthly_expenses.values().sum()
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), KernelError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(KernelError::InvalidProfile {
            field: field.to_owned(),
            message: format!("must be a finite non-negative amount, got {value}"),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpendingCategory {
    Essential,
    Lifestyle,
    Financial,
    Other,
}

impl SpendingCategory {
    pub const ALL: [Self; 4] = [Self::Essential, Self::Lifestyle, Self::Financial, Self::Other];

    /// Category of an expense name. Unrecognized names fall under `Other`.
    pub fn of(expense: &str) -> Self {
        match expense.trim().to_ascii_lowercase().as_str() {
            "housing" | "utilities" | "groceries" | "insurance" | "transportation" => Self::Essential,
            "dining" | "entertainment" | "shopping" | "subscriptions" => Self::Lifestyle,
            "debt_payments" | "savings" | "investments" => Self::Financial,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryShare {
    pub amount: f64,
    /// Share of total monthly expenses, in percent to one decimal.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalTimeline {
    pub goal_type: GoalKind,
    pub target_amount: f64,
    /// `None` when nothing is left over each month.
    pub months_to_target: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub monthly_income: f64,
    pub monthly_expenses: f64,
    pub monthly_surplus: f64,
    pub emergency_fund_target: f64,
    pub discretionary_spending: f64,
    pub savings_timeline: Vec<GoalTimeline>,
}

/// Ratios are reported in percent; thresholds are applied before rounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileAnalysis {
    pub financial_health_score: u8,
    pub savings_rate: f64,
    pub debt_to_income_ratio: f64,
    pub emergency_fund_months: f64,
    pub risk_capacity_score: f64,
    /// Empty when there are no expenses.
    pub spending_breakdown: BTreeMap<SpendingCategory, CategoryShare>,
    pub financial_priorities: Vec<String>,
    pub improvement_areas: Vec<String>,
    pub budget: BudgetSummary,
}

pub fn analyze_profile(profile: &FinancialProfile) -> Result<ProfileAnalysis, KernelError> {
    profile.validate()?;

    let monthly_income = profile.monthly_income();
    let monthly_expenses = profile.total_monthly_expenses();
    let savings_rate = ratio(monthly_income - monthly_expenses, monthly_income);
    let debt_to_income = ratio(profile.current_debt / 12.0, monthly_income);
    let emergency_months = ratio(profile.current_savings, monthly_expenses);

    let spending_breakdown = spending_breakdown(&profile.monthly_expenses, monthly_expenses);
    let discretionary_spending = spending_breakdown
        .get(&SpendingCategory::Lifestyle)
        .map_or(0.0, |share| share.amount);

    Ok(ProfileAnalysis {
        financial_health_score: health_score(savings_rate, debt_to_income, emergency_months),
        savings_rate: round_to(savings_rate * 100.0, 2),
        debt_to_income_ratio: round_to(debt_to_income * 100.0, 2),
        emergency_fund_months: round_to(emergency_months, 1),
        risk_capacity_score: risk_capacity(
            profile.age,
            profile.dependents,
            profile.employment_stability,
            savings_rate,
        ),
        spending_breakdown,
        financial_priorities: priorities(profile, monthly_expenses),
        improvement_areas: improvement_areas(savings_rate, debt_to_income, emergency_months),
        budget: BudgetSummary {
            monthly_income,
            monthly_expenses,
            monthly_surplus: monthly_income - monthly_expenses,
            emergency_fund_target: monthly_expenses * EMERGENCY_FUND_TARGET_MONTHS,
            discretionary_spending,
            savings_timeline: savings_timeline(
                &profile.investment_goals,
                monthly_income - monthly_expenses,
            ),
        },
    })
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10_f64.powi(places);
    (value * scale).round() / scale
}

/// Savings rate earns up to 40 points; debt load and emergency cover up to 30 each.
pub fn health_score(savings_rate: f64, debt_to_income: f64, emergency_months: f64) -> u8 {
    let savings = match savings_rate {
        rate if rate >= 0.20 => 40,
        rate if rate >= 0.15 => 30,
        rate if rate >= 0.10 => 20,
        rate if rate >= 0.05 => 10,
        _ => 0,
    };
    let debt = match debt_to_income {
        dti if dti <= 0.10 => 30,
        dti if dti <= 0.20 => 20,
        dti if dti <= 0.30 => 10,
        _ => 0,
    };
    let cushion = match emergency_months {
        months if months >= 6.0 => 30,
        months if months >= 3.0 => 20,
        months if months >= 1.0 => 10,
        _ => 0,
    };
    (savings + debt + cushion).min(100)
}

/// Weighted blend of horizon, household, job security and saving habit,
/// clamped to `[0.1, 1.0]`.
pub fn risk_capacity(
    age: u32,
    dependents: u32,
    employment: EmploymentStability,
    savings_rate: f64,
) -> f64 {
    let horizon = ((65.0 - f64::from(age)) / 40.0).max(0.0);
    let household = (1.0 - f64::from(dependents) * 0.15).max(0.0);
    let saving = (savings_rate * 2.0).min(1.0);

    let blended =
        horizon * 0.3 + household * 0.2 + employment.risk_factor() * 0.3 + saving * 0.2;
    blended.clamp(0.1, 1.0)
}

fn spending_breakdown(
    expenses: &BTreeMap<String, f64>,
    total: f64,
) -> BTreeMap<SpendingCategory, CategoryShare> {
    if total <= 0.0 {
        return BTreeMap::new();
    }

    let mut amounts = SpendingCategory::ALL
        .into_iter()
        .map(|category| (category, 0.0))
        .collect::<BTreeMap<_, f64>>();
    for (name, amount) in expenses {
        *amounts.entry(SpendingCategory::of(name)).or_default() += amount;
    }

    amounts
        .into_iter()
        .map(|(category, amount)| {
            let share = CategoryShare {
                amount,
                percentage: round_to(amount / total * 100.0, 1),
            };
            (category, share)
        })
        .collect()
}

fn priorities(profile: &FinancialProfile, monthly_expenses: f64) -> Vec<String> {
    let mut priorities = Vec::new();

    if profile.current_savings < monthly_expenses * 3.0 {
        priorities.push(String::from("Build emergency fund (3-6 months expenses)"));
    }
    if profile.current_debt > 0.0 {
        priorities.push(String::from("Reduce high-interest debt"));
    }
    let plans_retirement = profile
        .investment_goals
        .iter()
        .any(|goal| goal.goal_type == GoalKind::Retirement);
    if profile.age > 25 && !plans_retirement {
        priorities.push(String::from("Start retirement planning"));
    }
    priorities.extend(
        profile
            .investment_goals
            .iter()
            .filter(|goal| goal.timeline_years <= SHORT_TERM_YEARS)
            .map(|goal| format!("Short-term goal: {}", goal.goal_type)),
    );

    priorities
}

fn improvement_areas(savings_rate: f64, debt_to_income: f64, emergency_months: f64) -> Vec<String> {
    let mut areas = Vec::new();
    if savings_rate < 0.10 {
        areas.push(String::from("Increase savings rate to at least 10%"));
    }
    if debt_to_income > 0.30 {
        areas.push(String::from("Reduce debt-to-income ratio below 30%"));
    }
    if emergency_months < 3.0 {
        areas.push(String::from("Build emergency fund to 3-6 months of expenses"));
    }
    areas
}

fn savings_timeline(goals: &[InvestmentGoal], monthly_surplus: f64) -> Vec<GoalTimeline> {
    goals
        .iter()
        .filter_map(|goal| {
            let target_amount = goal.target_amount?;
            let months_to_target = (monthly_surplus > 0.0).then(|| {
                let months = (target_amount / monthly_surplus).ceil();
                if months >= f64::from(u32::MAX) {
                    u32::MAX
                } else {
                    months as u32
                }
            });
            Some(GoalTimeline {
                goal_type: goal.goal_type,
                target_amount,
                months_to_target,
            })
        })
        .collect()
}
