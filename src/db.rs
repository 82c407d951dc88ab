use crate::config::AppPaths;
use crate::domain::{Account, Expense, ExpenseSubcategory, ExpenseType, InstallmentStatus};
use crate::error::{LedgerError, LedgerResult};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params};
use rust_decimal::Decimal;
use std::fs;
use std::path::PathBuf;
use uuid::Uuid;

pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(paths: &AppPaths) -> Result<(Self, PathBuf)> {
        fs::create_dir_all(&paths.data_dir)
            .with_context(|| format!("Failed to create data dir {}", paths.data_dir.display()))?;

        let db_path = paths.data_dir.join("paydown.sqlite3");
        let conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open DB {}", db_path.display()))?;

        let db = Self { conn };
        db.migrate()
            .with_context(|| format!("Failed to migrate DB {}", db_path.display()))?;
        Ok((db, db_path))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> LedgerResult<Self> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                current_balance TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, name)
            );

            CREATE TABLE IF NOT EXISTS expense_types (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                UNIQUE (user_id, name)
            );

            CREATE TABLE IF NOT EXISTS expense_subcategories (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                expense_type_id TEXT NOT NULL REFERENCES expense_types(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                UNIQUE (expense_type_id, name)
            );

            -- parent_installment_id is a weak reference: no FK, no cascade.
            CREATE TABLE IF NOT EXISTS expenses (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                account_id TEXT NOT NULL REFERENCES accounts(id),
                expense_type_id TEXT NOT NULL REFERENCES expense_types(id),
                expense_subcategory_id TEXT REFERENCES expense_subcategories(id),
                name TEXT NOT NULL,
                amount TEXT NOT NULL,
                date TEXT NOT NULL,
                description TEXT,
                is_installment INTEGER NOT NULL DEFAULT 0,
                installment_duration INTEGER,
                installment_start_date TEXT,
                remaining_installments INTEGER,
                monthly_amount TEXT,
                last_processed_date TEXT,
                installment_status TEXT
                    CHECK (installment_status IN ('ACTIVE', 'CANCELLED', 'COMPLETED')),
                is_system_generated INTEGER NOT NULL DEFAULT 0,
                parent_installment_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_expenses_user_date ON expenses(user_id, date);
            CREATE INDEX IF NOT EXISTS idx_expenses_due
                ON expenses(is_installment, installment_status, installment_start_date);
            CREATE INDEX IF NOT EXISTS idx_expenses_parent ON expenses(parent_installment_id);
            "#,
        )
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Opens a write transaction that takes the database write lock up front,
    /// so balance read-modify-write cannot interleave with another writer.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    pub fn write_tx(&self) -> LedgerResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}

// ---- accounts ----

pub fn insert_account(conn: &Connection, account: &Account) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO accounts (id, user_id, name, current_balance, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            account.id.to_string(),
            account.user_id.to_string(),
            account.name,
            account.current_balance.to_string(),
            account.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

const ACCOUNT_COLUMNS: &str = "id, user_id, name, current_balance, created_at";

fn read_account(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn account_from_raw(raw: (String, String, String, String, String)) -> LedgerResult<Account> {
    let (id, user_id, name, balance, created_at) = raw;
    Ok(Account {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        name,
        current_balance: balance.parse::<Decimal>()?,
        created_at: parse_timestamp(&created_at)?,
    })
}

pub fn find_account(conn: &Connection, user_id: Uuid, id: Uuid) -> LedgerResult<Option<Account>> {
    let raw = conn
        .query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1 AND id = ?2"),
            params![user_id.to_string(), id.to_string()],
            read_account,
        )
        .optional()?;
    raw.map(account_from_raw).transpose()
}

pub fn find_account_by_name(
    conn: &Connection,
    user_id: Uuid,
    name: &str,
) -> LedgerResult<Option<Account>> {
    let raw = conn
        .query_row(
            &format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1 AND name = ?2"),
            params![user_id.to_string(), name],
            read_account,
        )
        .optional()?;
    raw.map(account_from_raw).transpose()
}

pub fn list_accounts(conn: &Connection, user_id: Uuid) -> LedgerResult<Vec<Account>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE user_id = ?1 ORDER BY name ASC"
    ))?;
    let rows = stmt.query_map(params![user_id.to_string()], read_account)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(account_from_raw(row?)?);
    }
    Ok(out)
}

pub fn increment_balance(conn: &Connection, account_id: Uuid, amount: Decimal) -> LedgerResult<()> {
    adjust_balance(conn, account_id, amount)
}

pub fn decrement_balance(conn: &Connection, account_id: Uuid, amount: Decimal) -> LedgerResult<()> {
    adjust_balance(conn, account_id, -amount)
}

// Balances are TEXT decimals, so the delta is applied in Rust. Callers hold an
// immediate transaction, which makes the read and the write one unit.
fn adjust_balance(conn: &Connection, account_id: Uuid, delta: Decimal) -> LedgerResult<()> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT current_balance FROM accounts WHERE id = ?1",
            params![account_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let Some(raw) = raw else {
        return Err(LedgerError::not_found(format!("account {account_id}")));
    };

    let next = raw.parse::<Decimal>()? + delta;
    conn.execute(
        "UPDATE accounts SET current_balance = ?1 WHERE id = ?2",
        params![next.to_string(), account_id.to_string()],
    )?;
    Ok(())
}

// ---- expense types ----

pub fn insert_expense_type(conn: &Connection, ty: &ExpenseType) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO expense_types (id, user_id, name) VALUES (?1, ?2, ?3)",
        params![ty.id.to_string(), ty.user_id.to_string(), ty.name],
    )?;
    Ok(())
}

fn expense_type_from_raw(raw: (String, String, String)) -> LedgerResult<ExpenseType> {
    let (id, user_id, name) = raw;
    Ok(ExpenseType {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        name,
    })
}

pub fn find_expense_type(
    conn: &Connection,
    user_id: Uuid,
    id: Uuid,
) -> LedgerResult<Option<ExpenseType>> {
    let raw = conn
        .query_row(
            "SELECT id, user_id, name FROM expense_types WHERE user_id = ?1 AND id = ?2",
            params![user_id.to_string(), id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    raw.map(expense_type_from_raw).transpose()
}

pub fn find_expense_type_by_name(
    conn: &Connection,
    user_id: Uuid,
    name: &str,
) -> LedgerResult<Option<ExpenseType>> {
    let raw = conn
        .query_row(
            "SELECT id, user_id, name FROM expense_types WHERE user_id = ?1 AND name = ?2",
            params![user_id.to_string(), name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    raw.map(expense_type_from_raw).transpose()
}

pub fn list_expense_types(conn: &Connection, user_id: Uuid) -> LedgerResult<Vec<ExpenseType>> {
    let mut stmt = conn
        .prepare("SELECT id, user_id, name FROM expense_types WHERE user_id = ?1 ORDER BY name ASC")?;
    let rows = stmt.query_map(params![user_id.to_string()], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(expense_type_from_raw(row?)?);
    }
    Ok(out)
}

pub fn insert_subcategory(conn: &Connection, sub: &ExpenseSubcategory) -> LedgerResult<()> {
    conn.execute(
        "INSERT INTO expense_subcategories (id, user_id, expense_type_id, name) VALUES (?1, ?2, ?3, ?4)",
        params![
            sub.id.to_string(),
            sub.user_id.to_string(),
            sub.expense_type_id.to_string(),
            sub.name,
        ],
    )?;
    Ok(())
}

fn subcategory_from_raw(raw: (String, String, String, String)) -> LedgerResult<ExpenseSubcategory> {
    let (id, user_id, expense_type_id, name) = raw;
    Ok(ExpenseSubcategory {
        id: Uuid::parse_str(&id)?,
        user_id: Uuid::parse_str(&user_id)?,
        expense_type_id: Uuid::parse_str(&expense_type_id)?,
        name,
    })
}

pub fn find_subcategory(
    conn: &Connection,
    user_id: Uuid,
    id: Uuid,
) -> LedgerResult<Option<ExpenseSubcategory>> {
    let raw = conn
        .query_row(
            "SELECT id, user_id, expense_type_id, name FROM expense_subcategories WHERE user_id = ?1 AND id = ?2",
            params![user_id.to_string(), id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    raw.map(subcategory_from_raw).transpose()
}

pub fn find_subcategory_by_name(
    conn: &Connection,
    user_id: Uuid,
    expense_type_id: Uuid,
    name: &str,
) -> LedgerResult<Option<ExpenseSubcategory>> {
    let raw = conn
        .query_row(
            r#"
            SELECT id, user_id, expense_type_id, name
            FROM expense_subcategories
            WHERE user_id = ?1 AND expense_type_id = ?2 AND name = ?3
            "#,
            params![user_id.to_string(), expense_type_id.to_string(), name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .optional()?;
    raw.map(subcategory_from_raw).transpose()
}

// ---- expenses ----

const EXPENSE_COLUMNS: &str = r#"
    id, user_id, account_id, expense_type_id, expense_subcategory_id,
    name, amount, date, description,
    is_installment, installment_duration, installment_start_date,
    remaining_installments, monthly_amount, last_processed_date, installment_status,
    is_system_generated, parent_installment_id, created_at
"#;

struct RawExpense {
    id: String,
    user_id: String,
    account_id: String,
    expense_type_id: String,
    expense_subcategory_id: Option<String>,
    name: String,
    amount: String,
    date: String,
    description: Option<String>,
    is_installment: bool,
    installment_duration: Option<u32>,
    installment_start_date: Option<String>,
    remaining_installments: Option<u32>,
    monthly_amount: Option<String>,
    last_processed_date: Option<String>,
    installment_status: Option<String>,
    is_system_generated: bool,
    parent_installment_id: Option<String>,
    created_at: String,
}

impl RawExpense {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            account_id: row.get(2)?,
            expense_type_id: row.get(3)?,
            expense_subcategory_id: row.get(4)?,
            name: row.get(5)?,
            amount: row.get(6)?,
            date: row.get(7)?,
            description: row.get(8)?,
            is_installment: row.get(9)?,
            installment_duration: row.get(10)?,
            installment_start_date: row.get(11)?,
            remaining_installments: row.get(12)?,
            monthly_amount: row.get(13)?,
            last_processed_date: row.get(14)?,
            installment_status: row.get(15)?,
            is_system_generated: row.get(16)?,
            parent_installment_id: row.get(17)?,
            created_at: row.get(18)?,
        })
    }

    fn into_expense(self) -> LedgerResult<Expense> {
        Ok(Expense {
            id: Uuid::parse_str(&self.id)?,
            user_id: Uuid::parse_str(&self.user_id)?,
            account_id: Uuid::parse_str(&self.account_id)?,
            expense_type_id: Uuid::parse_str(&self.expense_type_id)?,
            expense_subcategory_id: parse_opt_uuid(self.expense_subcategory_id)?,
            name: self.name,
            amount: self.amount.parse::<Decimal>()?,
            date: parse_day(&self.date)?,
            description: self.description,
            is_installment: self.is_installment,
            installment_duration: self.installment_duration,
            installment_start_date: parse_opt_day(self.installment_start_date)?,
            remaining_installments: self.remaining_installments,
            monthly_amount: self
                .monthly_amount
                .map(|m| m.parse::<Decimal>())
                .transpose()?,
            last_processed_date: parse_opt_day(self.last_processed_date)?,
            installment_status: self
                .installment_status
                .map(|s| s.parse::<InstallmentStatus>())
                .transpose()
                .map_err(|e| LedgerError::Internal(e.to_string()))?,
            is_system_generated: self.is_system_generated,
            parent_installment_id: parse_opt_uuid(self.parent_installment_id)?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn collect_expenses(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> LedgerResult<Vec<Expense>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, RawExpense::from_row)?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?.into_expense()?);
    }
    Ok(out)
}

pub fn insert_expense(conn: &Connection, e: &Expense) -> LedgerResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO expenses ({EXPENSE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
        ),
        params![
            e.id.to_string(),
            e.user_id.to_string(),
            e.account_id.to_string(),
            e.expense_type_id.to_string(),
            e.expense_subcategory_id.map(|id| id.to_string()),
            e.name,
            e.amount.to_string(),
            e.date.to_string(),
            e.description,
            e.is_installment,
            e.installment_duration,
            e.installment_start_date.map(|d| d.to_string()),
            e.remaining_installments,
            e.monthly_amount.map(|m| m.to_string()),
            e.last_processed_date.map(|d| d.to_string()),
            e.installment_status.map(|s| s.as_str()),
            e.is_system_generated,
            e.parent_installment_id.map(|id| id.to_string()),
            e.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Rewrites every mutable column of an existing row.
pub fn update_expense_row(conn: &Connection, e: &Expense) -> LedgerResult<()> {
    let changed = conn.execute(
        r#"
        UPDATE expenses SET
            account_id = ?3,
            expense_type_id = ?4,
            expense_subcategory_id = ?5,
            name = ?6,
            amount = ?7,
            date = ?8,
            description = ?9,
            is_installment = ?10,
            installment_duration = ?11,
            installment_start_date = ?12,
            remaining_installments = ?13,
            monthly_amount = ?14,
            last_processed_date = ?15,
            installment_status = ?16
        WHERE id = ?1 AND user_id = ?2
        "#,
        params![
            e.id.to_string(),
            e.user_id.to_string(),
            e.account_id.to_string(),
            e.expense_type_id.to_string(),
            e.expense_subcategory_id.map(|id| id.to_string()),
            e.name,
            e.amount.to_string(),
            e.date.to_string(),
            e.description,
            e.is_installment,
            e.installment_duration,
            e.installment_start_date.map(|d| d.to_string()),
            e.remaining_installments,
            e.monthly_amount.map(|m| m.to_string()),
            e.last_processed_date.map(|d| d.to_string()),
            e.installment_status.map(|s| s.as_str()),
        ],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found(format!("expense {}", e.id)));
    }
    Ok(())
}

/// Records one materialized payment on a master row. Only ACTIVE masters
/// advance; anything else is reported as a conflict.
pub fn advance_installment(
    conn: &Connection,
    id: Uuid,
    remaining: u32,
    last_processed: NaiveDate,
    status: InstallmentStatus,
) -> LedgerResult<()> {
    let changed = conn.execute(
        r#"
        UPDATE expenses
        SET remaining_installments = ?2, last_processed_date = ?3, installment_status = ?4
        WHERE id = ?1 AND is_installment = 1 AND installment_status = 'ACTIVE'
        "#,
        params![
            id.to_string(),
            remaining,
            last_processed.to_string(),
            status.as_str()
        ],
    )?;
    if changed == 0 {
        return Err(LedgerError::Internal(format!(
            "installment {id} is missing or no longer active"
        )));
    }
    Ok(())
}

pub fn set_installment_status(
    conn: &Connection,
    user_id: Uuid,
    id: Uuid,
    status: InstallmentStatus,
) -> LedgerResult<()> {
    let changed = conn.execute(
        "UPDATE expenses SET installment_status = ?3 WHERE id = ?1 AND user_id = ?2 AND is_installment = 1",
        params![id.to_string(), user_id.to_string(), status.as_str()],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found(format!("installment {id}")));
    }
    Ok(())
}

pub fn delete_expense_row(conn: &Connection, user_id: Uuid, id: Uuid) -> LedgerResult<()> {
    let changed = conn.execute(
        "DELETE FROM expenses WHERE id = ?1 AND user_id = ?2",
        params![id.to_string(), user_id.to_string()],
    )?;
    if changed == 0 {
        return Err(LedgerError::not_found(format!("expense {id}")));
    }
    Ok(())
}

pub fn find_expense(conn: &Connection, user_id: Uuid, id: Uuid) -> LedgerResult<Option<Expense>> {
    let raw = conn
        .query_row(
            &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1 AND id = ?2"),
            params![user_id.to_string(), id.to_string()],
            RawExpense::from_row,
        )
        .optional()?;
    raw.map(RawExpense::into_expense).transpose()
}

/// Installment master by id regardless of owner. The sweep re-reads through
/// this inside its write transaction.
pub fn find_installment(conn: &Connection, id: Uuid) -> LedgerResult<Option<Expense>> {
    let raw = conn
        .query_row(
            &format!("SELECT {EXPENSE_COLUMNS} FROM expenses WHERE id = ?1 AND is_installment = 1"),
            params![id.to_string()],
            RawExpense::from_row,
        )
        .optional()?;
    raw.map(RawExpense::into_expense).transpose()
}

/// Accepts a full id or a unique prefix of one (as printed by list commands).
pub fn resolve_expense_id(conn: &Connection, user_id: Uuid, raw: &str) -> LedgerResult<Uuid> {
    if let Ok(id) = Uuid::parse_str(raw) {
        return Ok(id);
    }
    let prefix = raw.trim().to_ascii_lowercase();
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        return Err(LedgerError::validation(format!("invalid expense id: {raw}")));
    }

    let mut stmt =
        conn.prepare("SELECT id FROM expenses WHERE user_id = ?1 AND id LIKE ?2 LIMIT 2")?;
    let rows = stmt.query_map(params![user_id.to_string(), format!("{prefix}%")], |row| {
        row.get::<_, String>(0)
    })?;
    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }

    match ids.as_slice() {
        [one] => Ok(Uuid::parse_str(one)?),
        [] => Err(LedgerError::not_found(format!("expense {raw}"))),
        _ => Err(LedgerError::validation(format!("ambiguous expense id prefix: {raw}"))),
    }
}

pub fn list_expenses(
    conn: &Connection,
    user_id: Uuid,
    account_id: Option<Uuid>,
) -> LedgerResult<Vec<Expense>> {
    let user = user_id.to_string();
    match account_id {
        Some(account_id) => {
            let account = account_id.to_string();
            collect_expenses(
                conn,
                &format!(
                    "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1 AND account_id = ?2 ORDER BY date ASC, created_at ASC"
                ),
                &[&user, &account],
            )
        }
        None => collect_expenses(
            conn,
            &format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1 ORDER BY date ASC, created_at ASC"
            ),
            &[&user],
        ),
    }
}

pub fn list_installments(
    conn: &Connection,
    user_id: Uuid,
    status: Option<InstallmentStatus>,
) -> LedgerResult<Vec<Expense>> {
    let user = user_id.to_string();
    match status {
        Some(status) => collect_expenses(
            conn,
            &format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1 AND is_installment = 1 AND installment_status = ?2 ORDER BY installment_start_date ASC"
            ),
            &[&user, &status.as_str()],
        ),
        None => collect_expenses(
            conn,
            &format!(
                "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1 AND is_installment = 1 ORDER BY installment_start_date ASC"
            ),
            &[&user],
        ),
    }
}

pub fn list_payments(
    conn: &Connection,
    user_id: Uuid,
    parent_id: Uuid,
) -> LedgerResult<Vec<Expense>> {
    let user = user_id.to_string();
    let parent = parent_id.to_string();
    collect_expenses(
        conn,
        &format!(
            "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE user_id = ?1 AND parent_installment_id = ?2 ORDER BY date ASC, created_at ASC"
        ),
        &[&user, &parent],
    )
}

/// Masters eligible for the sweep, across all users.
pub fn select_due_installments(conn: &Connection, today: NaiveDate) -> LedgerResult<Vec<Expense>> {
    let today = today.to_string();
    collect_expenses(
        conn,
        &format!(
            r#"
            SELECT {EXPENSE_COLUMNS} FROM expenses
            WHERE is_installment = 1
              AND remaining_installments > 0
              AND installment_start_date <= ?1
              AND installment_status = 'ACTIVE'
            ORDER BY installment_start_date ASC, created_at ASC
            "#
        ),
        &[&today],
    )
}

fn parse_day(raw: &str) -> LedgerResult<NaiveDate> {
    Ok(NaiveDate::parse_from_str(raw, "%Y-%m-%d")?)
}

fn parse_opt_day(raw: Option<String>) -> LedgerResult<Option<NaiveDate>> {
    raw.as_deref().map(parse_day).transpose()
}

fn parse_opt_uuid(raw: Option<String>) -> LedgerResult<Option<Uuid>> {
    Ok(raw.as_deref().map(Uuid::parse_str).transpose()?)
}

fn parse_timestamp(raw: &str) -> LedgerResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}
