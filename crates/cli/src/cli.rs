use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use tallyerp_core::{ProductId, WarehouseId};
use tallyerp_infra::config::MAX_MOVEMENT_WINDOW_DAYS;
use tallyerp_observability::LogFormat;

#[derive(Parser)]
#[command(
    name = "tallyerp",
    about = "TallyERP ledger core: stock, approvals and general ledger",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Log line encoding on stderr: json or pretty
    #[arg(long, global = true, default_value = "json")]
    pub log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply the database migrations
    Migrate,
    /// Check approval flows and GL templates for configuration issues
    Validate,
    /// Show stock balances
    Balance(BalanceArgs),
    /// Show a product's movement history
    Movements(MovementsArgs),
    /// List products below their minimum stock
    Alerts,
    /// Apply a business event read from a JSON file
    PostEvent(PostEventArgs),
}

#[derive(Args)]
pub struct BalanceArgs {
    #[arg(long)]
    pub product: Option<ProductId>,
    #[arg(long)]
    pub warehouse: Option<WarehouseId>,
}

#[derive(Args)]
pub struct MovementsArgs {
    #[arg(long)]
    pub product: ProductId,
    /// Look-back window; defaults to TALLYERP_MOVEMENT_WINDOW_DAYS
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..=MAX_MOVEMENT_WINDOW_DAYS))]
    pub days: Option<i64>,
}

#[derive(Args)]
pub struct PostEventArgs {
    pub file: PathBuf,
}
