use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{self, Db};
use crate::domain::{Expense, INSTALLMENT_INTERVAL_DAYS, InstallmentStatus, days_between};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::payment_record;

/// Per-master outcome of one sweep run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SweepItem {
    Charged {
        id: Uuid,
        days_since_last_processed: i64,
        payment_id: Uuid,
        remaining_installments: u32,
        completed: bool,
    },
    Skipped {
        id: Uuid,
        days_since_last_processed: i64,
        reason: String,
    },
    Failed {
        id: Uuid,
        error: String,
    },
}

impl SweepItem {
    pub fn id(&self) -> Uuid {
        match self {
            Self::Charged { id, .. } | Self::Skipped { id, .. } | Self::Failed { id, .. } => *id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub today: NaiveDate,
    /// Number of masters the selection returned; every one has a result.
    pub processed_count: usize,
    pub results: Vec<SweepItem>,
}

impl SweepReport {
    pub fn charged(&self) -> usize {
        self.count(|item| matches!(item, SweepItem::Charged { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|item| matches!(item, SweepItem::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|item| matches!(item, SweepItem::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&SweepItem) -> bool) -> usize {
        self.results.iter().filter(|item| pred(item)).count()
    }
}

/// Materializes at most one due payment per active installment.
///
/// Each master gets its own transaction; a failure there is reported in the
/// results and the run moves on. Only a failing selection query aborts.
pub fn process_installments(db: &Db, today: NaiveDate) -> LedgerResult<SweepReport> {
    let due = db::select_due_installments(db.conn(), today)?;
    info!(%today, selected = due.len(), "installment sweep started");

    let mut results = Vec::with_capacity(due.len());
    for master in &due {
        let item = match process_one(db, master, today) {
            Ok(item) => item,
            Err(err) => {
                warn!(installment_id = %master.id, error = %err, "installment sweep item failed");
                SweepItem::Failed {
                    id: master.id,
                    error: err.to_string(),
                }
            }
        };
        results.push(item);
    }

    let report = SweepReport {
        today,
        processed_count: results.len(),
        results,
    };
    info!(
        %today,
        charged = report.charged(),
        skipped = report.skipped(),
        failed = report.failed(),
        "installment sweep finished"
    );
    Ok(report)
}

/// Charges one master if it is still due.
///
/// `selected` comes from the selection query and may be stale. Eligibility is
/// decided on the row as re-read under the write lock.
fn process_one(db: &Db, selected: &Expense, today: NaiveDate) -> LedgerResult<SweepItem> {
    let tx = db.write_tx()?;
    let Some(master) = db::find_installment(&tx, selected.id)? else {
        return Err(LedgerError::not_found(format!("installment {}", selected.id)));
    };

    let (Some(start), Some(duration), Some(remaining_before), Some(monthly)) = (
        master.installment_start_date,
        master.installment_duration,
        master.remaining_installments,
        master.monthly_amount,
    ) else {
        return Err(LedgerError::Internal(format!(
            "installment {} is missing schedule fields",
            master.id
        )));
    };

    let anchor = master.last_processed_date.map_or(start, |last| last.max(start));
    let days = days_between(anchor, today);
    if master.installment_status != Some(InstallmentStatus::Active)
        || remaining_before == 0
        || start > today
    {
        debug!(
            installment_id = %master.id,
            status = ?master.installment_status,
            "installment no longer eligible"
        );
        return Ok(SweepItem::Skipped {
            id: master.id,
            days_since_last_processed: days,
            reason: "not active".to_string(),
        });
    }
    if days < INSTALLMENT_INTERVAL_DAYS {
        debug!(installment_id = %master.id, days, "installment not due");
        return Ok(SweepItem::Skipped {
            id: master.id,
            days_since_last_processed: days,
            reason: "not due".to_string(),
        });
    }

    let remaining = remaining_before - 1;
    let status = if remaining_before == 1 {
        InstallmentStatus::Completed
    } else {
        InstallmentStatus::Active
    };
    let paid = duration - remaining;

    db::decrement_balance(&tx, master.account_id, monthly)?;
    db::advance_installment(&tx, master.id, remaining, today, status)?;
    let payment = payment_record(&master, paid, today);
    db::insert_expense(&tx, &payment)?;
    tx.commit()?;

    info!(
        installment_id = %master.id,
        payment_id = %payment.id,
        account_id = %master.account_id,
        amount = %monthly,
        remaining,
        "installment payment materialized"
    );
    Ok(SweepItem::Charged {
        id: master.id,
        days_since_last_processed: days,
        payment_id: payment.id,
        remaining_installments: remaining,
        completed: status == InstallmentStatus::Completed,
    })
}

/// Checks an `Authorization` header value against the configured secret.
///
/// With no secret configured every request is rejected.
pub fn authorize_sweep(authorization: Option<&str>, secret: Option<&str>) -> LedgerResult<()> {
    let secret = secret.map(str::trim).filter(|s| !s.is_empty());
    let presented = authorization
        .map(str::trim)
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim);

    match (secret, presented) {
        (Some(secret), Some(token)) if constant_time_eq(secret.as_bytes(), token.as_bytes()) => {
            Ok(())
        }
        _ => Err(LedgerError::Unauthorized),
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::test_support::*;
    use chrono::Duration;

    const DAY0: &str = "2026-01-10";

    fn after(days: i64) -> NaiveDate {
        day(DAY0) + Duration::days(days)
    }

    #[test]
    fn second_payment_after_thirty_five_days() {
        let fx = fixture();
        let master = fx
            .ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, DAY0), day(DAY0))
            .unwrap()
            .expense;

        let report = process_installments(&fx.db, after(35)).unwrap();
        assert_eq!(report.processed_count, 1);
        assert_eq!(report.charged(), 1);
        match &report.results[0] {
            SweepItem::Charged {
                id,
                days_since_last_processed,
                remaining_installments,
                completed,
                ..
            } => {
                assert_eq!(*id, master.id);
                assert_eq!(*days_since_last_processed, 35);
                assert_eq!(*remaining_installments, 10);
                assert!(!completed);
            }
            other => panic!("unexpected sweep item: {other:?}"),
        }

        let stored = fx.expense(master.id).unwrap();
        assert_eq!(stored.remaining_installments, Some(10));
        assert_eq!(stored.last_processed_date, Some(after(35)));

        let payments = fx.payments(master.id);
        assert_eq!(payments.len(), 2);
        assert_eq!(payments[1].name, "Laptop (Payment 2/12)");
        assert_eq!(payments[1].date, after(35));
        assert_eq!(payments[1].amount, dec("100"));
        assert_eq!(fx.balance(fx.account), dec("4800"));
    }

    #[test]
    fn rerun_on_same_day_does_not_double_charge() {
        let fx = fixture();
        let master = fx
            .ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, DAY0), day(DAY0))
            .unwrap()
            .expense;

        process_installments(&fx.db, after(31)).unwrap();
        let second = process_installments(&fx.db, after(31)).unwrap();

        assert_eq!(second.charged(), 0);
        assert_eq!(
            second.results,
            vec![SweepItem::Skipped {
                id: master.id,
                days_since_last_processed: 0,
                reason: "not due".to_string(),
            }]
        );
        assert_eq!(fx.payments(master.id).len(), 2);
        assert_eq!(fx.balance(fx.account), dec("4800"));
    }

    #[test]
    fn overlapping_run_with_stale_selection_charges_once() {
        let fx = fixture();
        let master = fx
            .ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, DAY0), day(DAY0))
            .unwrap()
            .expense;

        let selected = db::select_due_installments(fx.db.conn(), after(31)).unwrap();
        assert_eq!(selected.len(), 1);

        // Another run charges the master after the selection was read.
        let first = process_installments(&fx.db, after(31)).unwrap();
        assert_eq!(first.charged(), 1);

        let item = process_one(&fx.db, &selected[0], after(31)).unwrap();
        assert_eq!(
            item,
            SweepItem::Skipped {
                id: master.id,
                days_since_last_processed: 0,
                reason: "not due".to_string(),
            }
        );
        assert_eq!(fx.payments(master.id).len(), 2);
        assert_eq!(fx.expense(master.id).unwrap().remaining_installments, Some(10));
        assert_eq!(fx.balance(fx.account), dec("4800"));
    }

    #[test]
    fn cancel_after_selection_is_respected() {
        let fx = fixture();
        let master = fx
            .ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, DAY0), day(DAY0))
            .unwrap()
            .expense;

        let selected = db::select_due_installments(fx.db.conn(), after(31)).unwrap();
        fx.ledger().delete_expense(master.id).unwrap();

        let item = process_one(&fx.db, &selected[0], after(31)).unwrap();
        assert!(matches!(item, SweepItem::Skipped { ref reason, .. } if reason == "not active"));

        let stored = fx.expense(master.id).unwrap();
        assert_eq!(stored.installment_status, Some(InstallmentStatus::Cancelled));
        assert_eq!(stored.remaining_installments, Some(11));
        assert_eq!(fx.payments(master.id).len(), 1);
        assert_eq!(fx.balance(fx.account), dec("4900"));
    }

    #[test]
    fn advancing_a_cancelled_master_is_refused() {
        let fx = fixture();
        let master = fx
            .ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, DAY0), day(DAY0))
            .unwrap()
            .expense;
        fx.ledger().delete_expense(master.id).unwrap();

        let err = db::advance_installment(
            fx.db.conn(),
            master.id,
            10,
            after(31),
            InstallmentStatus::Active,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "internal");
        assert_eq!(
            fx.expense(master.id).unwrap().installment_status,
            Some(InstallmentStatus::Cancelled)
        );
    }

    #[test]
    fn not_due_before_thirty_days() {
        let fx = fixture();
        fx.ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, DAY0), day(DAY0))
            .unwrap();

        let report = process_installments(&fx.db, after(29)).unwrap();
        assert_eq!(report.skipped(), 1);
        assert_eq!(fx.balance(fx.account), dec("4900"));

        let report = process_installments(&fx.db, after(30)).unwrap();
        assert_eq!(report.charged(), 1);
    }

    #[test]
    fn completes_exactly_when_last_installment_is_paid() {
        let fx = fixture();
        let master = fx
            .ledger()
            .create_expense(fx.installment("Chair", "300", 3, DAY0), day(DAY0))
            .unwrap()
            .expense;

        process_installments(&fx.db, after(30)).unwrap();
        let mid = fx.expense(master.id).unwrap();
        assert_eq!(mid.remaining_installments, Some(1));
        assert_eq!(mid.installment_status, Some(InstallmentStatus::Active));

        let report = process_installments(&fx.db, after(60)).unwrap();
        assert!(matches!(
            report.results[0],
            SweepItem::Charged { completed: true, remaining_installments: 0, .. }
        ));
        let done = fx.expense(master.id).unwrap();
        assert_eq!(done.remaining_installments, Some(0));
        assert_eq!(done.installment_status, Some(InstallmentStatus::Completed));
        assert_eq!(fx.payments(master.id).last().unwrap().name, "Chair (Payment 3/3)");

        let report = process_installments(&fx.db, after(120)).unwrap();
        assert_eq!(report.processed_count, 0);
        assert_eq!(fx.balance(fx.account), dec("4700"));
    }

    #[test]
    fn cancelled_and_future_installments_are_not_selected() {
        let fx = fixture();
        let cancelled = fx
            .ledger()
            .create_expense(fx.installment("Bike", "600", 6, DAY0), day(DAY0))
            .unwrap()
            .expense;
        fx.ledger().delete_expense(cancelled.id).unwrap();
        fx.ledger()
            .create_expense(fx.installment("Trip", "900", 3, "2026-06-01"), day(DAY0))
            .unwrap();

        let report = process_installments(&fx.db, after(40)).unwrap();
        assert_eq!(report.processed_count, 0);
        assert_eq!(fx.payments(cancelled.id).len(), 1);
    }

    #[test]
    fn deferred_installment_is_measured_from_its_start_date() {
        let fx = fixture();
        let master = fx
            .ledger()
            .create_expense(fx.installment("Trip", "900", 3, "2026-01-20"), day(DAY0))
            .unwrap()
            .expense;

        let report = process_installments(&fx.db, day("2026-01-20")).unwrap();
        assert_eq!(report.skipped(), 1);

        let report = process_installments(&fx.db, day("2026-02-19")).unwrap();
        assert_eq!(report.charged(), 1);
        assert_eq!(fx.payments(master.id)[0].name, "Trip (Payment 1/3)");
        assert_eq!(fx.balance(fx.account), dec("4700"));
    }

    #[test]
    fn one_failing_item_does_not_abort_the_batch() {
        let fx = fixture();
        let on_checking = fx
            .ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, DAY0), day(DAY0))
            .unwrap()
            .expense;
        let mut card_input = fx.installment("Camera", "800", 4, DAY0);
        card_input.account_id = fx.other_account;
        let on_card = fx.ledger().create_expense(card_input, day(DAY0)).unwrap().expense;

        fx.db
            .conn()
            .execute_batch(&format!(
                "CREATE TRIGGER freeze_card BEFORE UPDATE ON accounts WHEN OLD.id = '{}' BEGIN SELECT RAISE(ABORT, 'card frozen'); END;",
                fx.other_account
            ))
            .unwrap();

        let report = process_installments(&fx.db, after(30)).unwrap();
        assert_eq!(report.processed_count, 2);
        assert_eq!(report.charged(), 1);
        assert_eq!(report.failed(), 1);

        let failed = report
            .results
            .iter()
            .find(|item| matches!(item, SweepItem::Failed { .. }))
            .unwrap();
        assert_eq!(failed.id(), on_card.id);

        // The failed item's transaction left nothing behind.
        assert_eq!(fx.expense(on_card.id).unwrap().remaining_installments, Some(3));
        assert_eq!(fx.payments(on_card.id).len(), 1);
        assert_eq!(fx.balance(fx.other_account), dec("800"));

        assert_eq!(fx.expense(on_checking.id).unwrap().remaining_installments, Some(10));
        assert_eq!(fx.balance(fx.account), dec("4800"));
    }

    #[test]
    fn report_serializes_with_status_tags() {
        let fx = fixture();
        fx.ledger()
            .create_expense(fx.installment("Laptop", "1200", 12, DAY0), day(DAY0))
            .unwrap();
        let report = process_installments(&fx.db, after(3)).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["processed_count"], 1);
        assert_eq!(json["results"][0]["status"], "skipped");
        assert_eq!(json["results"][0]["days_since_last_processed"], 3);
    }

    #[test]
    fn bearer_secret_must_match() {
        assert!(authorize_sweep(Some("Bearer s3cret"), Some("s3cret")).is_ok());
        assert!(authorize_sweep(Some("  Bearer s3cret  "), Some("s3cret")).is_ok());
        assert!(authorize_sweep(Some("Bearer nope"), Some("s3cret")).is_err());
        assert!(authorize_sweep(Some("s3cret"), Some("s3cret")).is_err());
        assert!(authorize_sweep(None, Some("s3cret")).is_err());
        assert!(matches!(
            authorize_sweep(Some("Bearer "), Some("")),
            Err(LedgerError::Unauthorized)
        ));
        assert!(authorize_sweep(Some("Bearer x"), None).is_err());
    }
}
