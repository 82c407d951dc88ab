use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{self, Db};
use crate::domain::{
    Account, Expense, ExpensePatch, ExpenseSubcategory, ExpenseType, InstallmentStatus,
    NewExpense, monthly_amount, payment_label,
};
use crate::error::{LedgerError, LedgerResult};
use crate::hooks::{LedgerObserver, notify};

#[derive(Debug, Clone)]
pub struct Created {
    pub expense: Expense,
    /// Present when an installment's first payment fell due at creation.
    pub first_payment: Option<Expense>,
}

enum Schedule {
    Once(NaiveDate),
    Installment { duration: u32, start: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Installment master soft-cancelled; row and payments kept.
    Cancelled,
    Deleted,
}

impl DeleteOutcome {
    pub fn to_json(self) -> serde_json::Value {
        match self {
            Self::Cancelled => serde_json::json!({ "cancelled": true }),
            Self::Deleted => serde_json::json!({ "deleted": true }),
        }
    }
}

/// User-scoped entry point for expense writes.
pub struct Ledger<'a> {
    db: &'a Db,
    user_id: Uuid,
    observer: &'a dyn LedgerObserver,
}

impl<'a> Ledger<'a> {
    pub fn new(db: &'a Db, user_id: Uuid, observer: &'a dyn LedgerObserver) -> Self {
        Self {
            db,
            user_id,
            observer,
        }
    }

    pub fn add_account(&self, name: &str, opening_balance: Decimal) -> LedgerResult<Account> {
        let name = required_name(name, "account name")?;
        let tx = self.db.write_tx()?;
        if db::find_account_by_name(&tx, self.user_id, &name)?.is_some() {
            return Err(LedgerError::validation(format!(
                "account '{name}' already exists"
            )));
        }
        let account = Account {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            name,
            current_balance: opening_balance,
            created_at: Utc::now(),
        };
        db::insert_account(&tx, &account)?;
        tx.commit()?;
        Ok(account)
    }

    pub fn add_expense_type(&self, name: &str) -> LedgerResult<ExpenseType> {
        let name = required_name(name, "expense type name")?;
        let tx = self.db.write_tx()?;
        if db::find_expense_type_by_name(&tx, self.user_id, &name)?.is_some() {
            return Err(LedgerError::validation(format!(
                "expense type '{name}' already exists"
            )));
        }
        let ty = ExpenseType {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            name,
        };
        db::insert_expense_type(&tx, &ty)?;
        tx.commit()?;
        Ok(ty)
    }

    pub fn add_subcategory(
        &self,
        expense_type_id: Uuid,
        name: &str,
    ) -> LedgerResult<ExpenseSubcategory> {
        let name = required_name(name, "subcategory name")?;
        let tx = self.db.write_tx()?;
        if db::find_expense_type(&tx, self.user_id, expense_type_id)?.is_none() {
            return Err(LedgerError::not_found(format!(
                "expense type {expense_type_id}"
            )));
        }
        if db::find_subcategory_by_name(&tx, self.user_id, expense_type_id, &name)?.is_some() {
            return Err(LedgerError::validation(format!(
                "subcategory '{name}' already exists"
            )));
        }
        let sub = ExpenseSubcategory {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            expense_type_id,
            name,
        };
        db::insert_subcategory(&tx, &sub)?;
        tx.commit()?;
        Ok(sub)
    }

    /// Records a regular expense or opens an installment plan.
    ///
    /// An installment whose start date is on or before `today` has its first
    /// payment materialized inside the same transaction.
    pub fn create_expense(&self, input: NewExpense, today: NaiveDate) -> LedgerResult<Created> {
        let name = required_name(&input.name, "name")?;
        if input.amount <= Decimal::ZERO {
            return Err(LedgerError::validation("amount must be greater than zero"));
        }

        let schedule = if input.is_installment {
            let (Some(duration), Some(start)) =
                (input.installment_duration, input.installment_start_date)
            else {
                return Err(LedgerError::validation(
                    "installment expenses require installment_duration and installment_start_date",
                ));
            };
            if duration == 0 {
                return Err(LedgerError::validation(
                    "installment_duration must be greater than zero",
                ));
            }
            Schedule::Installment { duration, start }
        } else {
            let Some(date) = input.date else {
                return Err(LedgerError::validation("date is required for a regular expense"));
            };
            Schedule::Once(date)
        };

        let tx = self.db.write_tx()?;
        self.check_references(
            &tx,
            input.account_id,
            input.expense_type_id,
            input.expense_subcategory_id,
        )?;

        let mut expense = Expense {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            account_id: input.account_id,
            expense_type_id: input.expense_type_id,
            expense_subcategory_id: input.expense_subcategory_id,
            name,
            amount: input.amount,
            date: today,
            description: input.description,
            is_installment: false,
            installment_duration: None,
            installment_start_date: None,
            remaining_installments: None,
            monthly_amount: None,
            last_processed_date: None,
            installment_status: None,
            is_system_generated: input.is_system_generated,
            parent_installment_id: None,
            created_at: Utc::now(),
        };

        let (duration, start) = match schedule {
            Schedule::Once(date) => {
                expense.date = date;
                db::insert_expense(&tx, &expense)?;
                if !expense.is_system_generated {
                    db::decrement_balance(&tx, expense.account_id, expense.amount)?;
                }
                tx.commit()?;

                info!(
                    expense_id = %expense.id,
                    account_id = %expense.account_id,
                    amount = %expense.amount,
                    "recorded expense"
                );
                notify(self.observer, expense.account_id, expense.date);
                return Ok(Created {
                    expense,
                    first_payment: None,
                });
            }
            Schedule::Installment { duration, start } => (duration, start),
        };

        let monthly = monthly_amount(expense.amount, duration);
        expense.date = start;
        expense.is_installment = true;
        expense.installment_duration = Some(duration);
        expense.installment_start_date = Some(start);
        expense.remaining_installments = Some(duration);
        expense.monthly_amount = Some(monthly);
        expense.installment_status = Some(InstallmentStatus::Active);
        db::insert_expense(&tx, &expense)?;

        let mut first_payment = None;
        if start <= today {
            if !expense.is_system_generated {
                db::decrement_balance(&tx, expense.account_id, monthly)?;
            }

            let remaining = duration - 1;
            let status = if remaining == 0 {
                InstallmentStatus::Completed
            } else {
                InstallmentStatus::Active
            };
            db::advance_installment(&tx, expense.id, remaining, start, status)?;
            expense.remaining_installments = Some(remaining);
            expense.last_processed_date = Some(start);
            expense.installment_status = Some(status);

            let payment = payment_record(&expense, 1, start);
            db::insert_expense(&tx, &payment)?;
            first_payment = Some(payment);
        }
        tx.commit()?;

        info!(
            expense_id = %expense.id,
            account_id = %expense.account_id,
            amount = %expense.amount,
            months = duration,
            charged_now = first_payment.is_some(),
            "opened installment"
        );
        notify(self.observer, expense.account_id, start);
        Ok(Created {
            expense,
            first_payment,
        })
    }

    /// Applies a partial update, moving balance deltas for amount and
    /// account changes in the same transaction as the row write.
    ///
    /// Turning a regular expense into an installment refunds the old amount
    /// and then follows the creation rules: payment 1 is materialized when the
    /// start date is on or before `today`, otherwise nothing is charged yet.
    pub fn update_expense(
        &self,
        id: Uuid,
        patch: ExpensePatch,
        today: NaiveDate,
    ) -> LedgerResult<Expense> {
        if let Some(name) = patch.name.as_deref() {
            required_name(name, "name")?;
        }
        if matches!(patch.amount, Some(a) if a <= Decimal::ZERO) {
            return Err(LedgerError::validation("amount must be greater than zero"));
        }
        if patch.installment_duration == Some(0) {
            return Err(LedgerError::validation(
                "installment_duration must be greater than zero",
            ));
        }

        let tx = self.db.write_tx()?;
        let Some(existing) = db::find_expense(&tx, self.user_id, id)? else {
            return Err(LedgerError::not_found(format!("expense {id}")));
        };

        let mut next = existing.clone();
        if let Some(name) = patch.name {
            next.name = name.trim().to_string();
        }
        if let Some(amount) = patch.amount {
            next.amount = amount;
        }
        if let Some(account_id) = patch.account_id {
            next.account_id = account_id;
        }
        if let Some(type_id) = patch.expense_type_id {
            if type_id != existing.expense_type_id {
                next.expense_subcategory_id = None;
            }
            next.expense_type_id = type_id;
        }
        if let Some(sub_id) = patch.expense_subcategory_id {
            next.expense_subcategory_id = Some(sub_id);
        }
        if let Some(description) = patch.description {
            next.description = Some(description).filter(|d| !d.trim().is_empty());
        }
        if let Some(date) = patch.date {
            next.date = date;
        }
        self.check_references(
            &tx,
            next.account_id,
            next.expense_type_id,
            next.expense_subcategory_id,
        )?;

        let converting = !existing.is_installment && patch.is_installment == Some(true);
        let mut first_payment_on = None;
        if patch.is_installment.unwrap_or(existing.is_installment) {
            let duration = patch
                .installment_duration
                .or(existing.installment_duration)
                .ok_or_else(|| LedgerError::validation("installment_duration is required"))?;
            let start = patch
                .installment_start_date
                .or(existing.installment_start_date)
                .ok_or_else(|| LedgerError::validation("installment_start_date is required"))?;

            if existing.is_installment {
                let remaining = duration.saturating_sub(existing.payments_made());
                next.remaining_installments = Some(remaining);
                if remaining == 0 && existing.installment_status == Some(InstallmentStatus::Active)
                {
                    next.installment_status = Some(InstallmentStatus::Completed);
                }
            } else if start <= today {
                let remaining = duration - 1;
                next.remaining_installments = Some(remaining);
                next.last_processed_date = Some(start);
                next.installment_status = Some(if remaining == 0 {
                    InstallmentStatus::Completed
                } else {
                    InstallmentStatus::Active
                });
                first_payment_on = Some(start);
            } else {
                next.remaining_installments = Some(duration);
                next.last_processed_date = None;
                next.installment_status = Some(InstallmentStatus::Active);
            }
            if patch.installment_start_date.is_some() || !existing.is_installment {
                next.date = start;
            }
            next.is_installment = true;
            next.installment_duration = Some(duration);
            next.installment_start_date = Some(start);
            next.monthly_amount = Some(monthly_amount(next.amount, duration));
        } else {
            if patch.installment_duration.is_some() || patch.installment_start_date.is_some() {
                return Err(LedgerError::validation(
                    "installment fields require an installment expense",
                ));
            }
            next.is_installment = false;
            next.installment_duration = None;
            next.installment_start_date = None;
            next.remaining_installments = None;
            next.monthly_amount = None;
            next.last_processed_date = None;
            next.installment_status = None;
        }

        let old_effective = existing.effective_amount();
        // A deferred conversion owes nothing until the sweep reaches it.
        let new_effective = if converting && first_payment_on.is_none() {
            Decimal::ZERO
        } else {
            next.effective_amount()
        };
        if next.account_id != existing.account_id {
            db::increment_balance(&tx, existing.account_id, old_effective)?;
            db::decrement_balance(&tx, next.account_id, new_effective)?;
        } else if new_effective != old_effective {
            // One write of the difference; no intermediate reversed balance.
            db::decrement_balance(&tx, next.account_id, new_effective - old_effective)?;
        }

        db::update_expense_row(&tx, &next)?;
        if let Some(start) = first_payment_on {
            db::insert_expense(&tx, &payment_record(&next, 1, start))?;
        }
        tx.commit()?;

        info!(
            expense_id = %next.id,
            old_account_id = %existing.account_id,
            account_id = %next.account_id,
            old_effective = %old_effective,
            new_effective = %new_effective,
            "updated expense"
        );
        Ok(next)
    }

    /// Cancels an installment master; hard-deletes anything else.
    pub fn delete_expense(&self, id: Uuid) -> LedgerResult<DeleteOutcome> {
        let tx = self.db.write_tx()?;
        let Some(existing) = db::find_expense(&tx, self.user_id, id)? else {
            return Err(LedgerError::not_found(format!("expense {id}")));
        };

        if existing.is_installment {
            db::set_installment_status(&tx, self.user_id, id, InstallmentStatus::Cancelled)?;
            tx.commit()?;
            info!(
                expense_id = %id,
                remaining = existing.remaining_installments.unwrap_or(0),
                "cancelled installment"
            );
            return Ok(DeleteOutcome::Cancelled);
        }

        if existing.is_system_generated {
            // Not reconciled against the master: the charge and the consumed
            // installment count both stay as they are.
            warn!(
                expense_id = %id,
                parent_installment_id = ?existing.parent_installment_id,
                amount = %existing.amount,
                "deleting generated payment without reversing its balance effect"
            );
        } else {
            db::increment_balance(&tx, existing.account_id, existing.amount)?;
        }
        db::delete_expense_row(&tx, self.user_id, id)?;
        tx.commit()?;

        info!(expense_id = %id, account_id = %existing.account_id, "deleted expense");
        Ok(DeleteOutcome::Deleted)
    }

    fn check_references(
        &self,
        conn: &Connection,
        account_id: Uuid,
        expense_type_id: Uuid,
        expense_subcategory_id: Option<Uuid>,
    ) -> LedgerResult<()> {
        if db::find_account(conn, self.user_id, account_id)?.is_none() {
            return Err(LedgerError::not_found(format!("account {account_id}")));
        }
        if db::find_expense_type(conn, self.user_id, expense_type_id)?.is_none() {
            return Err(LedgerError::not_found(format!(
                "expense type {expense_type_id}"
            )));
        }
        if let Some(sub_id) = expense_subcategory_id {
            let Some(sub) = db::find_subcategory(conn, self.user_id, sub_id)? else {
                return Err(LedgerError::not_found(format!("subcategory {sub_id}")));
            };
            if sub.expense_type_id != expense_type_id {
                return Err(LedgerError::validation("subcategory mismatch"));
            }
        }
        Ok(())
    }
}

/// Builds the generated child row for payment number `paid` of `master`.
pub(crate) fn payment_record(master: &Expense, paid: u32, date: NaiveDate) -> Expense {
    let duration = master.installment_duration.unwrap_or(paid);
    let monthly = master.effective_amount();
    Expense {
        id: Uuid::new_v4(),
        user_id: master.user_id,
        account_id: master.account_id,
        expense_type_id: master.expense_type_id,
        expense_subcategory_id: master.expense_subcategory_id,
        name: payment_label(&master.name, paid, duration),
        amount: monthly,
        date,
        description: master.description.clone(),
        is_installment: false,
        installment_duration: None,
        installment_start_date: None,
        remaining_installments: None,
        monthly_amount: None,
        last_processed_date: None,
        installment_status: None,
        is_system_generated: true,
        parent_installment_id: Some(master.id),
        created_at: Utc::now(),
    }
}

fn required_name(raw: &str, field: &str) -> LedgerResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LedgerError::validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::hooks::NoopObserver;

    pub struct Fixture {
        pub db: Db,
        pub user: Uuid,
        pub account: Uuid,
        pub other_account: Uuid,
        pub ty: Uuid,
        pub sub: Uuid,
    }

    pub fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    pub fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    pub fn fixture() -> Fixture {
        let db = Db::open_in_memory().unwrap();
        let user = Uuid::new_v4();
        let (account, other_account, ty, sub) = {
            let ledger = Ledger::new(&db, user, &NoopObserver);
            let account = ledger.add_account("Checking", dec("5000")).unwrap().id;
            let other = ledger.add_account("Card", dec("1000")).unwrap().id;
            let ty = ledger.add_expense_type("Electronics").unwrap().id;
            let sub = ledger.add_subcategory(ty, "Laptops").unwrap().id;
            (account, other, ty, sub)
        };
        Fixture {
            db,
            user,
            account,
            other_account,
            ty,
            sub,
        }
    }

    impl Fixture {
        pub fn ledger(&self) -> Ledger<'_> {
            Ledger::new(&self.db, self.user, &NoopObserver)
        }

        pub fn balance(&self, account: Uuid) -> Decimal {
            db::find_account(self.db.conn(), self.user, account)
                .unwrap()
                .unwrap()
                .current_balance
        }

        pub fn expense(&self, id: Uuid) -> Option<Expense> {
            db::find_expense(self.db.conn(), self.user, id).unwrap()
        }

        pub fn payments(&self, master: Uuid) -> Vec<Expense> {
            db::list_payments(self.db.conn(), self.user, master).unwrap()
        }

        pub fn regular(&self, name: &str, amount: &str, date: &str) -> NewExpense {
            NewExpense {
                name: name.to_string(),
                amount: dec(amount),
                account_id: self.account,
                expense_type_id: self.ty,
                date: Some(day(date)),
                ..NewExpense::default()
            }
        }

        pub fn installment(&self, name: &str, amount: &str, months: u32, start: &str) -> NewExpense {
            NewExpense {
                name: name.to_string(),
                amount: dec(amount),
                account_id: self.account,
                expense_type_id: self.ty,
                is_installment: true,
                installment_duration: Some(months),
                installment_start_date: Some(day(start)),
                ..NewExpense::default()
            }
        }
    }
}
