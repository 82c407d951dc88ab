mod cli;
mod config;
mod db;
mod domain;
mod error;
mod hooks;
mod ledger;
mod server;
mod sweep;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::cli::{
    AccountCmd, Cli, Command, ConfigCmd, ExpenseAddArgs, ExpenseCmd, ExpenseEditArgs,
    InstallmentCmd, ServeArgs, SubcategoryCmd, SweepArgs, TypeCmd,
};
use crate::config::{AppConfig, app_paths, load_or_init_config, resolve_today, write_config};
use crate::db::Db;
use crate::domain::{
    Expense, ExpensePatch, INSTALLMENT_INTERVAL_DAYS, InstallmentStatus, NewExpense,
    display_amount, parse_amount, parse_date,
};
use crate::error::LedgerError;
use crate::hooks::observer_from_config;
use crate::ledger::{DeleteOutcome, Ledger};
use crate::server::ServeOptions;
use crate::sweep::{SweepItem, process_installments};

fn main() {
    init_tracing();
    if let Err(err) = run() {
        if let Some(ledger_err) = err.downcast_ref::<LedgerError>() {
            tracing::debug!(kind = ledger_err.kind(), "command failed");
        }
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let paths = app_paths(cli.home.clone())?;
    let (mut cfg, cfg_path) = load_or_init_config(&paths)?;

    match cli.command {
        Command::Config(args) => handle_config(args.cmd, &mut cfg, &cfg_path),
        cmd => {
            let (db, db_path) = Db::open(&paths)?;
            let observer = observer_from_config(cfg.recalc_webhook.as_deref())?;
            let ledger = Ledger::new(&db, cfg.user_id, observer.as_ref());

            match cmd {
                Command::Account(args) => handle_account(&db, &ledger, &cfg, args.cmd),
                Command::ExpenseType(args) => handle_type(&db, &ledger, &cfg, args.cmd),
                Command::Subcategory(args) => match args.cmd {
                    SubcategoryCmd::Add { expense_type, name } => {
                        let ty = lookup_type(&db, &cfg, &expense_type)?;
                        let sub = ledger.add_subcategory(ty, &name)?;
                        println!("Added subcategory '{}' under '{}'.", sub.name, expense_type);
                        Ok(())
                    }
                },
                Command::Expense(args) => handle_expense(&db, &ledger, &cfg, args.cmd),
                Command::Installment(args) => handle_installment(&db, &cfg, args.cmd),
                Command::Sweep(args) => handle_sweep(&db, args),
                Command::Serve(args) => handle_serve(&db, &cfg, args),
                Command::Config(_) => unreachable!("handled above"),
            }
            .with_context(|| format!("Database: {}", db_path.display()))
        }
    }
}

fn handle_config(cmd: ConfigCmd, cfg: &mut AppConfig, cfg_path: &std::path::Path) -> Result<()> {
    match cmd {
        ConfigCmd::Show => {
            println!("config\t{}", cfg_path.display());
            println!("user\t{} ({})", cfg.user_name.as_deref().unwrap_or("-"), cfg.user_id);
            println!("cron_secret\t{}", cfg.masked_secret());
            println!(
                "recalc_webhook\t{}",
                cfg.recalc_webhook.as_deref().unwrap_or("(not set)")
            );
            return Ok(());
        }
        ConfigCmd::SetSecret { value } => {
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(LedgerError::validation("secret must not be empty").into());
            }
            cfg.cron_secret = Some(value);
            println!("Cron secret updated.");
        }
        ConfigCmd::ClearSecret => {
            cfg.cron_secret = None;
            println!("Cron secret cleared.");
        }
        ConfigCmd::SetWebhook { url } => {
            println!("Recalculation webhook set to {url}.");
            cfg.recalc_webhook = Some(url);
        }
        ConfigCmd::ClearWebhook => {
            cfg.recalc_webhook = None;
            println!("Recalculation webhook cleared.");
        }
    }
    write_config(cfg_path, cfg)
}

fn handle_account(db: &Db, ledger: &Ledger<'_>, cfg: &AppConfig, cmd: AccountCmd) -> Result<()> {
    match cmd {
        AccountCmd::Add { name, balance } => {
            let opening = parse_amount(&balance, "balance")?;
            let account = ledger.add_account(&name, opening)?;
            println!(
                "Added account '{}' with balance {}.",
                account.name, account.current_balance
            );
        }
        AccountCmd::List => {
            let accounts = db::list_accounts(db.conn(), cfg.user_id)?;
            if accounts.is_empty() {
                println!("(no accounts)");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = accounts
                .iter()
                .map(|a| vec![a.name.clone(), display_amount(a.current_balance).to_string()])
                .collect();
            print_table(&["account", "balance"], &rows);
        }
        AccountCmd::Show { name } => {
            let account = db::find_account_by_name(db.conn(), cfg.user_id, &name)?
                .ok_or_else(|| LedgerError::not_found(format!("account '{name}'")))?;
            println!("account\t{}", account.name);
            println!("id\t{}", account.id);
            println!("balance\t{}", account.current_balance);
        }
    }
    Ok(())
}

fn handle_type(db: &Db, ledger: &Ledger<'_>, cfg: &AppConfig, cmd: TypeCmd) -> Result<()> {
    match cmd {
        TypeCmd::Add { name } => {
            let ty = ledger.add_expense_type(&name)?;
            println!("Added expense type '{}'.", ty.name);
        }
        TypeCmd::List => {
            let types = db::list_expense_types(db.conn(), cfg.user_id)?;
            if types.is_empty() {
                println!("(no expense types)");
            }
            for ty in types {
                println!("{}", ty.name);
            }
        }
    }
    Ok(())
}

fn handle_expense(db: &Db, ledger: &Ledger<'_>, cfg: &AppConfig, cmd: ExpenseCmd) -> Result<()> {
    match cmd {
        ExpenseCmd::Add(args) => add_expense(db, ledger, cfg, args),
        ExpenseCmd::Edit(args) => edit_expense(db, ledger, cfg, args),
        ExpenseCmd::Rm { id, json } => {
            let id = db::resolve_expense_id(db.conn(), cfg.user_id, &id)?;
            let outcome = ledger.delete_expense(id)?;
            if json {
                println!("{}", outcome.to_json());
                return Ok(());
            }
            match outcome {
                DeleteOutcome::Cancelled => println!("Cancelled installment {id}."),
                DeleteOutcome::Deleted => println!("Deleted expense {id}."),
            }
            Ok(())
        }
        ExpenseCmd::List { account, json } => {
            let account_id = match account.as_deref() {
                Some(name) => Some(lookup_account(db, cfg, name)?),
                None => None,
            };
            let expenses = db::list_expenses(db.conn(), cfg.user_id, account_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&expenses)?);
                return Ok(());
            }
            if expenses.is_empty() {
                println!("(no expenses)");
                return Ok(());
            }
            let names = account_names(db, cfg)?;
            let rows: Vec<Vec<String>> = expenses
                .iter()
                .map(|e| {
                    vec![
                        e.date.to_string(),
                        short_id(e.id),
                        e.role().to_string(),
                        e.name.clone(),
                        display_amount(e.amount).to_string(),
                        names.get(&e.account_id).cloned().unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(&["date", "id", "kind", "name", "amount", "account"], &rows);
            Ok(())
        }
        ExpenseCmd::Show { id, json } => {
            let id = db::resolve_expense_id(db.conn(), cfg.user_id, &id)?;
            let expense = db::find_expense(db.conn(), cfg.user_id, id)?
                .ok_or_else(|| LedgerError::not_found(format!("expense {id}")))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&expense)?);
            } else {
                print_expense(&expense);
            }
            Ok(())
        }
    }
}

fn add_expense(db: &Db, ledger: &Ledger<'_>, cfg: &AppConfig, args: ExpenseAddArgs) -> Result<()> {
    let today = resolve_today(args.today.today.as_deref())?;
    let amount = parse_amount(&args.amount, "amount")?;
    let account_id = lookup_account(db, cfg, &args.account)?;
    let expense_type_id = lookup_type(db, cfg, &args.expense_type)?;
    let expense_subcategory_id = match args.subcategory.as_deref() {
        Some(name) => Some(lookup_subcategory(db, cfg, expense_type_id, name)?),
        None => None,
    };

    let is_installment = args.months.is_some() || args.start.is_some();
    let input = NewExpense {
        name: args.name,
        amount,
        account_id,
        expense_type_id,
        expense_subcategory_id,
        description: args.description,
        date: args.date.as_deref().map(|d| parse_date(d, "date")).transpose()?,
        is_installment,
        installment_duration: args.months,
        installment_start_date: args
            .start
            .as_deref()
            .map(|d| parse_date(d, "start"))
            .transpose()?,
        is_system_generated: false,
    };

    let created = ledger.create_expense(input, today)?;
    let e = &created.expense;
    if e.is_installment {
        println!(
            "Opened installment {}: {} x {} ({} total) from '{}'.",
            e.id,
            e.installment_duration.unwrap_or(0),
            display_amount(e.effective_amount()),
            e.amount,
            args.account
        );
        match &created.first_payment {
            Some(p) => println!("Charged {} ({}).", p.name, display_amount(p.amount)),
            None => println!(
                "First payment deferred until the sweep (starts {}).",
                e.installment_start_date.map(|d| d.to_string()).unwrap_or_default()
            ),
        }
    } else {
        println!(
            "Recorded expense {}: '{}' {} from '{}'.",
            e.id, e.name, e.amount, args.account
        );
    }
    Ok(())
}

fn edit_expense(db: &Db, ledger: &Ledger<'_>, cfg: &AppConfig, args: ExpenseEditArgs) -> Result<()> {
    let today = resolve_today(args.today.today.as_deref())?;
    let id = db::resolve_expense_id(db.conn(), cfg.user_id, &args.id)?;

    let expense_type_id = match args.expense_type.as_deref() {
        Some(name) => Some(lookup_type(db, cfg, name)?),
        None => None,
    };
    let expense_subcategory_id = match args.subcategory.as_deref() {
        Some(name) => {
            let type_id = match expense_type_id {
                Some(t) => t,
                None => {
                    db::find_expense(db.conn(), cfg.user_id, id)?
                        .ok_or_else(|| LedgerError::not_found(format!("expense {id}")))?
                        .expense_type_id
                }
            };
            Some(lookup_subcategory(db, cfg, type_id, name)?)
        }
        None => None,
    };

    let is_installment = if args.no_installment {
        Some(false)
    } else if args.months.is_some() || args.start.is_some() {
        Some(true)
    } else {
        None
    };

    let patch = ExpensePatch {
        name: args.name,
        amount: args
            .amount
            .as_deref()
            .map(|a| parse_amount(a, "amount"))
            .transpose()?,
        account_id: match args.account.as_deref() {
            Some(name) => Some(lookup_account(db, cfg, name)?),
            None => None,
        },
        expense_type_id,
        expense_subcategory_id,
        date: args.date.as_deref().map(|d| parse_date(d, "date")).transpose()?,
        description: args.description,
        is_installment,
        installment_duration: args.months,
        installment_start_date: args
            .start
            .as_deref()
            .map(|d| parse_date(d, "start"))
            .transpose()?,
    };
    if patch.is_empty() {
        println!("Nothing to change.");
        return Ok(());
    }

    let updated = ledger.update_expense(id, patch, today)?;
    println!(
        "Updated expense {}: '{}' {}.",
        updated.id,
        updated.name,
        display_amount(updated.effective_amount())
    );
    Ok(())
}

fn handle_installment(db: &Db, cfg: &AppConfig, cmd: InstallmentCmd) -> Result<()> {
    match cmd {
        InstallmentCmd::List { status } => {
            let status = status
                .as_deref()
                .map(str::parse::<InstallmentStatus>)
                .transpose()?;
            let masters = db::list_installments(db.conn(), cfg.user_id, status)?;
            if masters.is_empty() {
                println!("(no installments)");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = masters.iter().map(installment_row).collect();
            print_table(
                &[
                    "id", "name", "total", "monthly", "paid", "remaining", "status", "last paid",
                    "next due",
                ],
                &rows,
            );
        }
        InstallmentCmd::Payments { id } => {
            let id = db::resolve_expense_id(db.conn(), cfg.user_id, &id)?;
            let payments = db::list_payments(db.conn(), cfg.user_id, id)?;
            if payments.is_empty() {
                println!("(no payments)");
                return Ok(());
            }
            let rows: Vec<Vec<String>> = payments
                .iter()
                .map(|p| {
                    vec![
                        p.date.to_string(),
                        short_id(p.id),
                        p.name.clone(),
                        display_amount(p.amount).to_string(),
                    ]
                })
                .collect();
            print_table(&["date", "id", "payment", "amount"], &rows);
        }
    }
    Ok(())
}

fn installment_row(e: &Expense) -> Vec<String> {
    let status = e.installment_status.unwrap_or(InstallmentStatus::Active);
    let next_due = match (status, e.installment_start_date) {
        (InstallmentStatus::Active, Some(start)) => {
            let anchor = e.last_processed_date.map_or(start, |last| last.max(start));
            (anchor + Duration::days(INSTALLMENT_INTERVAL_DAYS)).to_string()
        }
        _ => "-".to_string(),
    };
    vec![
        short_id(e.id),
        e.name.clone(),
        e.amount.to_string(),
        display_amount(e.effective_amount()).to_string(),
        format!("{}/{}", e.payments_made(), e.installment_duration.unwrap_or(0)),
        e.remaining_installments.unwrap_or(0).to_string(),
        status.to_string(),
        e.last_processed_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string()),
        next_due,
    ]
}

fn handle_sweep(db: &Db, args: SweepArgs) -> Result<()> {
    let today = resolve_today(args.today.today.as_deref())?;

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        pb.set_style(style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]));
    }
    pb.enable_steady_tick(std::time::Duration::from_millis(80));
    pb.set_message(format!("Processing installments due by {today}..."));
    let report = process_installments(db, today);
    pb.finish_and_clear();
    let report = report?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    for item in &report.results {
        let id = short_id(item.id());
        match item {
            SweepItem::Charged {
                days_since_last_processed,
                remaining_installments,
                completed,
                ..
            } => println!(
                "charged\t{id}\t{days_since_last_processed} days\t{remaining_installments} left{}",
                if *completed { "\tcompleted" } else { "" }
            ),
            SweepItem::Skipped {
                days_since_last_processed,
                reason,
                ..
            } => println!("skipped\t{id}\t{days_since_last_processed} days\t{reason}"),
            SweepItem::Failed { error, .. } => println!("failed\t{id}\t{error}"),
        }
    }
    println!(
        "Sweep {}: {} selected, {} charged, {} skipped, {} failed.",
        report.today,
        report.processed_count,
        report.charged(),
        report.skipped(),
        report.failed()
    );
    Ok(())
}

fn handle_serve(db: &Db, cfg: &AppConfig, args: ServeArgs) -> Result<()> {
    let secret = args
        .secret
        .or_else(|| cfg.cron_secret.clone())
        .filter(|s| !s.trim().is_empty())
        .context("No cron secret configured. Set one with: paydown config set-secret <value>")?;
    let today: Option<NaiveDate> = args
        .today
        .today
        .as_deref()
        .map(|raw| resolve_today(Some(raw)))
        .transpose()?;

    let opts = ServeOptions {
        bind: args.bind,
        once: args.once,
        today,
    };
    server::serve(db, secret.trim(), &opts)
}

fn lookup_account(db: &Db, cfg: &AppConfig, name: &str) -> Result<Uuid> {
    let account = db::find_account_by_name(db.conn(), cfg.user_id, name)?
        .ok_or_else(|| LedgerError::not_found(format!("account '{name}'")))?;
    Ok(account.id)
}

fn lookup_type(db: &Db, cfg: &AppConfig, name: &str) -> Result<Uuid> {
    let ty = db::find_expense_type_by_name(db.conn(), cfg.user_id, name)?
        .ok_or_else(|| LedgerError::not_found(format!("expense type '{name}'")))?;
    Ok(ty.id)
}

fn lookup_subcategory(db: &Db, cfg: &AppConfig, type_id: Uuid, name: &str) -> Result<Uuid> {
    let sub = db::find_subcategory_by_name(db.conn(), cfg.user_id, type_id, name)?
        .ok_or_else(|| LedgerError::not_found(format!("subcategory '{name}'")))?;
    Ok(sub.id)
}

fn account_names(db: &Db, cfg: &AppConfig) -> Result<HashMap<Uuid, String>> {
    Ok(db::list_accounts(db.conn(), cfg.user_id)?
        .into_iter()
        .map(|a| (a.id, a.name))
        .collect())
}

fn short_id(id: Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn print_expense(e: &Expense) {
    println!("id\t{}", e.id);
    println!("kind\t{}", e.role());
    println!("name\t{}", e.name);
    println!("amount\t{}", e.amount);
    println!("date\t{}", e.date);
    if let Some(d) = e.description.as_deref() {
        println!("description\t{d}");
    }
    if e.is_installment {
        println!("monthly\t{}", display_amount(e.effective_amount()));
        println!("months\t{}", e.installment_duration.unwrap_or(0));
        println!("remaining\t{}", e.remaining_installments.unwrap_or(0));
        println!(
            "status\t{}",
            e.installment_status.unwrap_or(InstallmentStatus::Active)
        );
        if let Some(last) = e.last_processed_date {
            println!("last_processed\t{last}");
        }
    }
    if let Some(parent) = e.parent_installment_id {
        println!("installment\t{parent}");
    }
}

fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if headers.is_empty() {
        println!("(no columns)");
        return;
    }

    let cols = headers.len();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();

    for row in rows {
        for (i, cell) in row.iter().take(cols).enumerate() {
            widths[i] = widths[i].max(cell.chars().count());
        }
    }

    fn print_row(cells: &[String], widths: &[usize]) {
        print!("|");
        for (i, w) in widths.iter().enumerate() {
            let cell = cells.get(i).map(String::as_str).unwrap_or("");
            print!(" {:width$} |", cell, width = *w);
        }
        println!();
    }

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    print_row(&header_cells, &widths);
    print!("|");
    for w in &widths {
        print!("{}|", "-".repeat(w + 2));
    }
    println!();
    for row in rows {
        print_row(row, &widths);
    }
}
