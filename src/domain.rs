use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Minimum spacing between two materialized payments of one installment.
///
/// A calendar approximation of "one month"; months of different lengths drift.
pub const INSTALLMENT_INTERVAL_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallmentStatus {
    Active,
    Cancelled,
    Completed,
}

impl InstallmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for InstallmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallmentStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(Self::Active),
            "CANCELLED" => Ok(Self::Cancelled),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(LedgerError::validation(format!(
                "unknown installment status '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    /// Only ever moved through increment/decrement deltas.
    pub current_balance: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseType {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseSubcategory {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expense_type_id: Uuid,
    pub name: String,
}

/// One row of the expense table.
///
/// The same shape holds three roles: a regular expense, an installment master
/// (`is_installment`), and a generated payment record (`is_system_generated`
/// with `parent_installment_id` pointing at its master).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub expense_type_id: Uuid,
    pub expense_subcategory_id: Option<Uuid>,
    pub name: String,
    pub amount: Decimal,
    pub date: NaiveDate,
    pub description: Option<String>,

    pub is_installment: bool,
    pub installment_duration: Option<u32>,
    pub installment_start_date: Option<NaiveDate>,
    pub remaining_installments: Option<u32>,
    pub monthly_amount: Option<Decimal>,
    pub last_processed_date: Option<NaiveDate>,
    pub installment_status: Option<InstallmentStatus>,

    pub is_system_generated: bool,
    pub parent_installment_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Expense {
    /// The amount this row charges against its account per application.
    pub fn effective_amount(&self) -> Decimal {
        if self.is_installment {
            self.monthly_amount.unwrap_or(self.amount)
        } else {
            self.amount
        }
    }

    pub fn payments_made(&self) -> u32 {
        match (self.installment_duration, self.remaining_installments) {
            (Some(duration), Some(remaining)) => duration.saturating_sub(remaining),
            _ => 0,
        }
    }

    pub fn role(&self) -> &'static str {
        if self.is_installment {
            "installment"
        } else if self.is_system_generated {
            "payment"
        } else {
            "expense"
        }
    }
}

/// Input for creating an expense.
///
/// Regular expenses carry `date`; installments carry `installment_duration`
/// and `installment_start_date`.
#[derive(Debug, Clone, Default)]
pub struct NewExpense {
    pub name: String,
    pub amount: Decimal,
    pub account_id: Uuid,
    pub expense_type_id: Uuid,
    pub expense_subcategory_id: Option<Uuid>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub is_installment: bool,
    pub installment_duration: Option<u32>,
    pub installment_start_date: Option<NaiveDate>,
    /// Rows produced by the engine itself never touch balances.
    pub is_system_generated: bool,
}

/// Partial update; `None` leaves the stored column untouched.
#[derive(Debug, Clone, Default)]
pub struct ExpensePatch {
    pub name: Option<String>,
    pub amount: Option<Decimal>,
    pub account_id: Option<Uuid>,
    pub expense_type_id: Option<Uuid>,
    pub expense_subcategory_id: Option<Uuid>,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
    pub is_installment: Option<bool>,
    pub installment_duration: Option<u32>,
    pub installment_start_date: Option<NaiveDate>,
}

impl ExpensePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.amount.is_none()
            && self.account_id.is_none()
            && self.expense_type_id.is_none()
            && self.expense_subcategory_id.is_none()
            && self.date.is_none()
            && self.description.is_none()
            && self.is_installment.is_none()
            && self.installment_duration.is_none()
            && self.installment_start_date.is_none()
    }
}

/// Plain decimal division; the remainder is not redistributed.
pub fn monthly_amount(amount: Decimal, duration: u32) -> Decimal {
    amount / Decimal::from(duration)
}

pub fn payment_label(name: &str, paid: u32, duration: u32) -> String {
    format!("{name} (Payment {paid}/{duration})")
}

/// Whole days from `from` to `to`; negative when `to` is earlier.
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

pub fn display_amount(amount: Decimal) -> Decimal {
    amount.round_dp(2)
}

pub fn parse_amount(raw: &str, field: &str) -> LedgerResult<Decimal> {
    raw.trim()
        .parse::<Decimal>()
        .map_err(|_| LedgerError::validation(format!("invalid decimal for {field}: {raw}")))
}

pub fn parse_date(raw: &str, field: &str) -> LedgerResult<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        LedgerError::validation(format!("invalid date for {field}: {raw} (expected YYYY-MM-DD)"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn monthly_amount_is_plain_division() {
        assert_eq!(monthly_amount(Decimal::from(1200), 12), Decimal::from(100));

        let m = monthly_amount(Decimal::from(100), 3);
        assert_eq!(m, Decimal::from(100) / Decimal::from(3));
        // No rounding at storage time: three payments don't add back up exactly.
        assert_ne!(m * Decimal::from(3), Decimal::from(100));
        assert_eq!(display_amount(m).to_string(), "33.33");
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!(
            "active".parse::<InstallmentStatus>().unwrap(),
            InstallmentStatus::Active
        );
        assert_eq!(
            "COMPLETED".parse::<InstallmentStatus>().unwrap(),
            InstallmentStatus::Completed
        );
        assert!("paused".parse::<InstallmentStatus>().is_err());
        assert_eq!(InstallmentStatus::Cancelled.to_string(), "CANCELLED");
    }

    #[test]
    fn days_between_counts_whole_days() {
        assert_eq!(days_between(d("2026-01-01"), d("2026-01-31")), 30);
        assert_eq!(days_between(d("2026-02-01"), d("2026-03-01")), 28);
        assert_eq!(days_between(d("2026-03-10"), d("2026-03-01")), -9);
    }

    #[test]
    fn label_format() {
        assert_eq!(payment_label("Laptop", 2, 12), "Laptop (Payment 2/12)");
    }

    #[test]
    fn parse_amount_reports_validation_error() {
        assert_eq!(parse_amount(" 12.50 ", "amount").unwrap().to_string(), "12.50");
        let err = parse_amount("12,5x", "amount").unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(parse_date("2026-13-01", "date").is_err());
    }
}
