use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "paydown")]
#[command(about = "Local-first expense ledger with installment plans", long_about = None)]
pub struct Cli {
    /// Override Paydown home directory (config/data subdirs will be created inside it).
    #[arg(long, env = "PAYDOWN_HOME")]
    pub home: Option<std::path::PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    Account(AccountArgs),
    #[command(name = "type")]
    ExpenseType(TypeArgs),
    Subcategory(SubcategoryArgs),
    Expense(ExpenseArgs),
    Installment(InstallmentArgs),

    /// Materialize due installment payments.
    Sweep(SweepArgs),
    /// Expose the sweep over HTTP for an external scheduler.
    Serve(ServeArgs),

    Config(ConfigArgs),
}

#[derive(Debug, Subcommand)]
pub enum AccountCmd {
    Add {
        name: String,
        /// Opening balance.
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        balance: String,
    },
    List,
    Show {
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct AccountArgs {
    #[command(subcommand)]
    pub cmd: AccountCmd,
}

#[derive(Debug, Subcommand)]
pub enum TypeCmd {
    Add { name: String },
    List,
}

#[derive(Debug, Args)]
pub struct TypeArgs {
    #[command(subcommand)]
    pub cmd: TypeCmd,
}

#[derive(Debug, Subcommand)]
pub enum SubcategoryCmd {
    Add {
        /// Expense type the subcategory belongs to.
        expense_type: String,
        name: String,
    },
}

#[derive(Debug, Args)]
pub struct SubcategoryArgs {
    #[command(subcommand)]
    pub cmd: SubcategoryCmd,
}

#[derive(Debug, Args, Clone)]
pub struct TodayFlag {
    /// Calendar day to act on (YYYY-MM-DD). Defaults to the local date.
    #[arg(long)]
    pub today: Option<String>,
}

#[derive(Debug, Args)]
pub struct ExpenseAddArgs {
    pub name: String,
    pub amount: String,

    #[arg(long)]
    pub account: String,

    #[arg(long = "type")]
    pub expense_type: String,

    #[arg(long)]
    pub subcategory: Option<String>,

    /// Date of a regular expense (YYYY-MM-DD).
    #[arg(long)]
    pub date: Option<String>,

    /// Split the amount into this many monthly installments.
    #[arg(long)]
    pub months: Option<u32>,

    /// First installment date (YYYY-MM-DD).
    #[arg(long)]
    pub start: Option<String>,

    #[arg(long, short = 'm')]
    pub description: Option<String>,

    #[command(flatten)]
    pub today: TodayFlag,
}

#[derive(Debug, Args)]
pub struct ExpenseEditArgs {
    /// Expense id (or a unique prefix of it).
    pub id: String,

    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub amount: Option<String>,

    #[arg(long)]
    pub account: Option<String>,

    #[arg(long = "type")]
    pub expense_type: Option<String>,

    #[arg(long)]
    pub subcategory: Option<String>,

    #[arg(long)]
    pub date: Option<String>,

    #[arg(long, short = 'm')]
    pub description: Option<String>,

    /// Turn into (or resize) an installment plan.
    #[arg(long)]
    pub months: Option<u32>,

    #[arg(long)]
    pub start: Option<String>,

    /// Turn an installment back into a single regular expense.
    #[arg(long, conflicts_with_all = ["months", "start"])]
    pub no_installment: bool,

    #[command(flatten)]
    pub today: TodayFlag,
}

#[derive(Debug, Subcommand)]
pub enum ExpenseCmd {
    Add(ExpenseAddArgs),
    Edit(ExpenseEditArgs),
    /// Delete an expense; installment plans are cancelled instead.
    Rm {
        id: String,
        #[arg(long)]
        json: bool,
    },
    List {
        #[arg(long)]
        account: Option<String>,
        #[arg(long)]
        json: bool,
    },
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Args)]
pub struct ExpenseArgs {
    #[command(subcommand)]
    pub cmd: ExpenseCmd,
}

#[derive(Debug, Subcommand)]
pub enum InstallmentCmd {
    List {
        /// active | cancelled | completed
        #[arg(long)]
        status: Option<String>,
    },
    /// Payment records generated for one installment.
    Payments { id: String },
}

#[derive(Debug, Args)]
pub struct InstallmentArgs {
    #[command(subcommand)]
    pub cmd: InstallmentCmd,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    #[command(flatten)]
    pub today: TodayFlag,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:8787")]
    pub bind: String,

    /// Overrides the configured cron secret.
    #[arg(long, env = "PAYDOWN_CRON_SECRET", hide_env_values = true)]
    pub secret: Option<String>,

    /// Exit after handling one request.
    #[arg(long)]
    pub once: bool,

    #[command(flatten)]
    pub today: TodayFlag,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCmd {
    Show,
    SetSecret { value: String },
    ClearSecret,
    SetWebhook { url: String },
    ClearWebhook,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigCmd,
}
