use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;
use std::process::Command;

fn paydown_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("paydown"))
}

fn run_ok(home: &tempfile::TempDir, args: &[&str]) {
    let mut cmd = paydown_cmd();
    cmd.env("PAYDOWN_HOME", home.path());
    cmd.args(args);
    cmd.assert().success();
}

fn run_ok_out(home: &tempfile::TempDir, args: &[&str]) -> String {
    let mut cmd = paydown_cmd();
    cmd.env("PAYDOWN_HOME", home.path());
    cmd.args(args);
    let out = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(out).expect("utf8 stdout")
}

fn balance(home: &tempfile::TempDir, account: &str) -> String {
    let out = run_ok_out(home, &["account", "show", account]);
    out.lines()
        .find_map(|l| l.strip_prefix("balance\t"))
        .expect("balance line")
        .trim()
        .to_string()
}

fn expenses_json(home: &tempfile::TempDir) -> Vec<Value> {
    let out = run_ok_out(home, &["expense", "list", "--json"]);
    let v: Value = serde_json::from_str(&out).expect("expense list json");
    v.as_array().expect("array").clone()
}

fn setup() -> tempfile::TempDir {
    let home = tempfile::tempdir().expect("tempdir");
    run_ok(&home, &["account", "add", "Checking", "--balance", "5000"]);
    run_ok(&home, &["account", "add", "Card", "--balance", "1000"]);
    run_ok(&home, &["type", "add", "Food"]);
    run_ok(&home, &["type", "add", "Electronics"]);
    run_ok(&home, &["subcategory", "add", "Electronics", "Laptops"]);
    home
}

#[test]
fn regular_expense_lifecycle_moves_balances() {
    let home = setup();

    run_ok(
        &home,
        &[
            "expense", "add", "Groceries", "50", "--account", "Checking", "--type", "Food",
            "--date", "2026-01-05", "-m", "weekly shop",
        ],
    );
    assert_eq!(balance(&home, "Checking"), "4950");

    let rows = expenses_json(&home);
    assert_eq!(rows.len(), 1);
    let id = rows[0]["id"].as_str().unwrap().to_string();
    assert_eq!(rows[0]["description"], "weekly shop");

    // Raising the amount charges only the difference.
    run_ok(&home, &["expense", "edit", &id[..8], "--amount", "80"]);
    assert_eq!(balance(&home, "Checking"), "4920");

    // Moving accounts refunds the old one and charges the new one.
    run_ok(&home, &["expense", "edit", &id, "--account", "Card"]);
    assert_eq!(balance(&home, "Checking"), "5000");
    assert_eq!(balance(&home, "Card"), "920");

    let out = run_ok_out(&home, &["expense", "rm", &id, "--json"]);
    assert_eq!(out.trim(), r#"{"deleted":true}"#);
    assert_eq!(balance(&home, "Card"), "1000");
    assert!(expenses_json(&home).is_empty());
}

#[test]
fn installment_charges_first_payment_and_cancel_keeps_history() {
    let home = setup();

    let out = run_ok_out(
        &home,
        &[
            "expense", "add", "Laptop", "1200", "--account", "Checking", "--type",
            "Electronics", "--subcategory", "Laptops", "--months", "12", "--start",
            "2026-01-01", "--today", "2026-01-01",
        ],
    );
    assert!(out.contains("Laptop (Payment 1/12)"));
    assert_eq!(balance(&home, "Checking"), "4900");

    let rows = expenses_json(&home);
    assert_eq!(rows.len(), 2);
    let master = rows
        .iter()
        .find(|r| r["is_installment"] == true)
        .expect("master row");
    assert_eq!(master["remaining_installments"], 11);
    assert_eq!(master["installment_status"], "ACTIVE");
    let master_id = master["id"].as_str().unwrap().to_string();

    let payments = run_ok_out(&home, &["installment", "payments", &master_id]);
    assert!(payments.contains("Laptop (Payment 1/12)"));

    let out = run_ok_out(&home, &["expense", "rm", &master_id]);
    assert!(out.contains("Cancelled installment"));
    // Cancelling never refunds.
    assert_eq!(balance(&home, "Checking"), "4900");

    let listed = run_ok_out(&home, &["installment", "list", "--status", "cancelled"]);
    assert!(listed.contains("Laptop"));
    assert!(listed.contains("CANCELLED"));
    assert_eq!(expenses_json(&home).len(), 2);
}

#[test]
fn converting_to_installment_charges_only_the_first_month() {
    let home = setup();

    run_ok(
        &home,
        &[
            "expense", "add", "Laptop", "1200", "--account", "Checking", "--type",
            "Electronics", "--date", "2026-01-05",
        ],
    );
    assert_eq!(balance(&home, "Checking"), "3800");
    let id = expenses_json(&home)[0]["id"].as_str().unwrap().to_string();

    run_ok(
        &home,
        &[
            "expense", "edit", &id, "--months", "12", "--start", "2026-01-05", "--today",
            "2026-01-05",
        ],
    );
    assert_eq!(balance(&home, "Checking"), "4900");

    let payments = run_ok_out(&home, &["installment", "payments", &id]);
    assert!(payments.contains("Laptop (Payment 1/12)"));

    // The next charge waits the full interval.
    run_ok(&home, &["sweep", "--today", "2026-01-20"]);
    assert_eq!(balance(&home, "Checking"), "4900");
}

#[test]
fn future_start_defers_the_first_payment() {
    let home = setup();

    let out = run_ok_out(
        &home,
        &[
            "expense", "add", "Phone", "600", "--account", "Card", "--type", "Electronics",
            "--months", "6", "--start", "2026-03-01", "--today", "2026-02-01",
        ],
    );
    assert!(out.contains("deferred"));
    assert_eq!(balance(&home, "Card"), "1000");
    assert_eq!(expenses_json(&home).len(), 1);
}

#[test]
fn validation_and_lookup_failures_exit_nonzero() {
    let home = setup();

    let mut cmd = paydown_cmd();
    cmd.env("PAYDOWN_HOME", home.path());
    cmd.args([
        "expense", "add", "Laptop", "1200", "--account", "Checking", "--type", "Electronics",
        "--months", "0", "--start", "2026-01-01",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("validation error"));

    let mut cmd = paydown_cmd();
    cmd.env("PAYDOWN_HOME", home.path());
    cmd.args(["expense", "add", "Coffee", "3", "--account", "Checking", "--type", "Food"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("date is required"));

    let mut cmd = paydown_cmd();
    cmd.env("PAYDOWN_HOME", home.path());
    cmd.args([
        "expense", "add", "Coffee", "3", "--account", "Savings", "--type", "Food", "--date",
        "2026-01-01",
    ]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("not found: account 'Savings'"));

    // Laptops belongs to Electronics, not Food.
    let mut cmd = paydown_cmd();
    cmd.env("PAYDOWN_HOME", home.path());
    cmd.args([
        "expense", "add", "Snack", "3", "--account", "Checking", "--type", "Food",
        "--subcategory", "Laptops", "--date", "2026-01-01",
    ]);
    cmd.assert().failure();

    assert_eq!(balance(&home, "Checking"), "5000");
    assert!(expenses_json(&home).is_empty());
}

#[test]
fn homes_do_not_see_each_other() {
    let home_a = setup();
    let home_b = tempfile::tempdir().expect("tempdir");

    run_ok(
        &home_a,
        &[
            "expense", "add", "Groceries", "50", "--account", "Checking", "--type", "Food",
            "--date", "2026-01-05",
        ],
    );

    let out = run_ok_out(&home_b, &["expense", "list"]);
    assert!(out.contains("(no expenses)"));
}
