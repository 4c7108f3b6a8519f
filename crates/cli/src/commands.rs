use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::{TimeDelta, Utc};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;

use tallyerp_infra::reference::postgres::load_catalog;
use tallyerp_infra::{
    BusinessEvent, BusinessEventHandler, EventOutcome, LedgerConfig, PostgresLedgerStore,
    ReferenceCatalog,
};

use crate::cli::*;

struct Ledger {
    handler: BusinessEventHandler<PostgresLedgerStore>,
    catalog: Arc<ReferenceCatalog>,
    config: LedgerConfig,
    format: OutputFormat,
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = LedgerConfig::from_env();
    let url = config
        .database_url
        .clone()
        .context("DATABASE_URL must be set")?;

    // Store calls block on this runtime from the main thread.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    let _guard = runtime.enter();

    let pool = runtime
        .block_on(PgPoolOptions::new().max_connections(5).connect(&url))
        .context("failed to connect to database")?;
    tracing::debug!("database pool ready");
    let store = Arc::new(PostgresLedgerStore::new(pool));

    if let Command::Migrate = cli.command {
        runtime.block_on(store.migrate())?;
        println!("migrations applied");
        return Ok(());
    }

    let catalog = Arc::new(runtime.block_on(load_catalog(store.pool()))?);
    let ledger = Ledger {
        handler: BusinessEventHandler::from_catalog(store, Arc::clone(&catalog), &config),
        catalog,
        config,
        format: cli.format,
    };

    match cli.command {
        Command::Migrate => Ok(()),
        Command::Validate => cmd_validate(&ledger),
        Command::Balance(args) => cmd_balance(&ledger, args),
        Command::Movements(args) => cmd_movements(&ledger, args),
        Command::Alerts => cmd_alerts(&ledger),
        Command::PostEvent(args) => cmd_post_event(&ledger, args),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_validate(ledger: &Ledger) -> anyhow::Result<()> {
    let flow_issues = ledger.handler.approvals().validate_flows()?;
    let template_issues = ledger.handler.posting().validate_templates()?;

    match ledger.format {
        OutputFormat::Json => {
            let templates: Vec<String> = template_issues.iter().map(ToString::to_string).collect();
            print_json(&serde_json::json!({
                "flows": flow_issues,
                "templates": templates,
            }))?;
        }
        OutputFormat::Text => {
            for issue in &flow_issues {
                println!("flow: {issue}");
            }
            for issue in &template_issues {
                println!("template: {issue}");
            }
        }
    }

    let count = flow_issues.len() + template_issues.len();
    if count > 0 {
        bail!("{count} configuration issue(s) found");
    }
    if ledger.format == OutputFormat::Text {
        println!("configuration ok");
    }
    Ok(())
}

fn cmd_balance(ledger: &Ledger, args: BalanceArgs) -> anyhow::Result<()> {
    let stock = ledger.handler.stock();

    if let (Some(product), Some(warehouse)) = (args.product, args.warehouse) {
        let quantity = stock.balance(product, warehouse)?;
        return match ledger.format {
            OutputFormat::Json => print_json(&serde_json::json!({
                "product_id": product,
                "warehouse_id": warehouse,
                "quantity": quantity,
            })),
            OutputFormat::Text => {
                println!("{product} @ {warehouse}: {quantity}");
                Ok(())
            }
        };
    }

    let balances = stock.balances(args.product, args.warehouse)?;
    match ledger.format {
        OutputFormat::Json => print_json(&balances),
        OutputFormat::Text => {
            for b in &balances {
                println!("{}: {} (v{})", b.key, b.quantity, b.version);
            }
            Ok(())
        }
    }
}

fn cmd_movements(ledger: &Ledger, args: MovementsArgs) -> anyhow::Result<()> {
    let days = args.days.unwrap_or(ledger.config.movement_window_days);
    let since = TimeDelta::try_days(days)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .with_context(|| format!("look-back of {days} days is out of range"))?;
    let entries = ledger.handler.stock().movements(args.product, since)?;

    match ledger.format {
        OutputFormat::Json => print_json(&entries),
        OutputFormat::Text => {
            for e in &entries {
                println!(
                    "{} {:<8} {:>12} @ {:<10} {}",
                    e.occurred_at.format("%Y-%m-%d %H:%M"),
                    e.kind.as_str(),
                    e.quantity,
                    e.unit_cost,
                    e.reference
                );
            }
            Ok(())
        }
    }
}

fn cmd_alerts(ledger: &Ledger) -> anyhow::Result<()> {
    let alerts = ledger
        .handler
        .stock()
        .low_stock_alerts(ledger.catalog.min_stock_rules())?;

    match ledger.format {
        OutputFormat::Json => print_json(&alerts),
        OutputFormat::Text => {
            for a in &alerts {
                let scope = a
                    .warehouse_id
                    .map(|w| w.to_string())
                    .unwrap_or_else(|| "all warehouses".to_string());
                println!(
                    "{} in {scope}: {} on hand, minimum {} (short {})",
                    a.product_id,
                    a.quantity,
                    a.min_quantity,
                    a.shortfall()
                );
            }
            Ok(())
        }
    }
}

fn cmd_post_event(ledger: &Ledger, args: PostEventArgs) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let event: BusinessEvent = serde_json::from_str(&raw)
        .with_context(|| format!("invalid business event in {}", args.file.display()))?;

    let outcome = match ledger.handler.handle(event) {
        Ok(outcome) => outcome,
        Err(err) if err.is_retryable() => {
            return Err(err).context("event lost a concurrent update; it is safe to resubmit");
        }
        Err(err) => return Err(err.into()),
    };

    match ledger.format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Text => {
            match &outcome {
                EventOutcome::AwaitingApproval { step } => {
                    println!(
                        "awaiting approval: step {} ({})",
                        step.step_number, step.role
                    );
                }
                EventOutcome::Completed {
                    decision,
                    movement,
                    transaction,
                } => {
                    println!("event committed");
                    if let Some(id) = decision {
                        println!("  decision    {id}");
                    }
                    if let Some(id) = movement {
                        println!("  movement    {id}");
                    }
                    if let Some(posted) = transaction {
                        println!("  transaction {} ({})", posted.number, posted.transaction_id);
                    }
                }
            }
            Ok(())
        }
    }
}
