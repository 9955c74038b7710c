//! Tally batch operation CLI
//!
//! Runs the two recurring accounting passes against the ledger store:
//! `charge` prices recorded usage over a time window, `invoice` generates the
//! per-account balance sheets for one project's billing period. All selection
//! parameters are validated before the store is touched.

use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Args, Parser, Subcommand};
use rust_decimal::Decimal;
use tally_core::config::{AppConfig, DatabaseConfig};
use tally_core::selection::{
    AccountFilter, ChargeParameters, MatchScheme, ServiceFilter, TimeWindow,
};
use tally_core::traits::ProjectRepository;
use tally_core::AppError;
use tally_db::{
    create_pool, run_migrations, PgAccountRepository, PgInvoiceRepository, PgProjectRepository,
    PgServiceRepository, PgTransactionRepository,
};
use tally_services::{ChargingEngine, InvoicingEngine};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "tally", version, about = "Research computing accounting batch operations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price recorded usage over a time window
    Charge(ChargeArgs),
    /// Generate an invoice for one project's billing period
    Invoice(InvoiceArgs),
}

#[derive(Args)]
struct ChargeArgs {
    /// Start of the charging window
    #[arg(long, value_parser = parse_timestamp)]
    start: DateTime<Utc>,

    /// End of the charging window
    #[arg(long, value_parser = parse_timestamp)]
    end: DateTime<Utc>,

    /// Limit to services belonging to these systems
    #[arg(long, value_delimiter = ',')]
    systems: Option<Vec<String>>,

    /// Limit to these services
    #[arg(long, value_delimiter = ',')]
    services: Option<Vec<String>>,

    /// Limit to accounts of these projects
    #[arg(long, value_delimiter = ',')]
    projects: Option<Vec<String>>,

    /// Limit to these accounts
    #[arg(long, value_delimiter = ',')]
    accounts: Option<Vec<String>>,

    /// Name matching scheme for the filters above
    #[arg(long, default_value = "exact", value_parser = parse_scheme)]
    match_scheme: MatchScheme,

    /// Recalculate transactions that already carry a charge
    #[arg(long)]
    force_recalculation: bool,

    /// Discount in [0.0, 1.0) applied to every charge
    #[arg(long, default_value = "0")]
    discount: Decimal,

    /// Skip the confirmation prompt
    #[arg(long)]
    auto_confirm: bool,
}

#[derive(Args)]
struct InvoiceArgs {
    /// Project to invoice
    #[arg(long)]
    project: String,

    /// Start of the billing period
    #[arg(long, value_parser = parse_timestamp)]
    start: DateTime<Utc>,

    /// End of the billing period
    #[arg(long, value_parser = parse_timestamp)]
    end: DateTime<Utc>,

    /// Predecessor invoice whose balances carry forward
    #[arg(long)]
    predecessor: Option<i64>,

    /// Skip the confirmation prompt
    #[arg(long)]
    auto_confirm: bool,
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS`, or a bare date (midnight UTC)
fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc());
    }
    Err(format!("unrecognized timestamp: {}", s))
}

fn parse_scheme(s: &str) -> Result<MatchScheme, String> {
    MatchScheme::from_str(s).ok_or_else(|| format!("unrecognized match scheme: {}", s))
}

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tally={},tally_db={},tally_services={},sqlx=warn",
            log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .init();
}

/// Load configuration, falling back to a bare DATABASE_URL
fn load_config() -> anyhow::Result<AppConfig> {
    match AppConfig::load() {
        Ok(config) => Ok(config),
        Err(e) => {
            if let Ok(url) = env::var("DATABASE_URL") {
                Ok(AppConfig {
                    database: DatabaseConfig {
                        url,
                        max_connections: 10,
                        min_connections: 2,
                        acquire_timeout_secs: 30,
                        idle_timeout_secs: 600,
                    },
                    ledger: Default::default(),
                })
            } else {
                Err(e).context("failed to load configuration (set TALLY__DATABASE__URL or DATABASE_URL)")
            }
        }
    }
}

/// Ask the operator to proceed; any answer but y/yes aborts
fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

async fn run_charge(args: ChargeArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    // Everything user-derived is validated before the store is touched
    let window = TimeWindow::new(args.start, args.end)?;
    let services = ServiceFilter::from_options(args.systems, args.services)?;
    let accounts = AccountFilter::from_options(args.projects, args.accounts)?;

    let params = ChargeParameters {
        window,
        services,
        accounts,
        scheme: args.match_scheme,
        force_recalculate: args.force_recalculation,
        discount: args.discount,
    };
    params.validate()?;

    let config = load_config()?;
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;

    let engine = ChargingEngine::new(
        Arc::new(PgServiceRepository::new(pool.clone())),
        Arc::new(PgAccountRepository::new(pool.clone())),
        Arc::new(PgTransactionRepository::new(pool.clone())),
    );

    let count = engine.preview(&params).await?;
    if count == 0 {
        println!("No transactions match the selection; nothing to charge.");
        return Ok(());
    }

    if !args.auto_confirm {
        let prompt = format!(
            "About to charge {} transactions over {} (discount {}).",
            count, params.window, params.discount
        );
        if !confirm(&format!("{} Proceed?", prompt))? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let updated = engine.run(&params, &cancel).await?;
    println!("Charged {} transactions.", updated);

    Ok(())
}

async fn run_invoice(args: InvoiceArgs, cancel: CancellationToken) -> anyhow::Result<()> {
    let window = TimeWindow::new(args.start, args.end)?;

    let config = load_config()?;
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;

    let projects = Arc::new(PgProjectRepository::new(pool.clone()));
    let project = projects
        .find_by_name(&args.project)
        .await?
        .ok_or_else(|| AppError::ProjectNotFound(args.project.clone()))?;

    if !args.auto_confirm {
        let prompt = format!(
            "About to invoice project {} over {}{}.",
            project.name,
            window,
            match args.predecessor {
                Some(id) => format!(" (predecessor invoice {})", id),
                None => String::new(),
            }
        );
        if !confirm(&format!("{} Proceed?", prompt))? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let engine = InvoicingEngine::new(
        projects,
        Arc::new(PgAccountRepository::new(pool.clone())),
        Arc::new(PgTransactionRepository::new(pool.clone())),
        Arc::new(PgInvoiceRepository::new(pool.clone())),
    );

    let result = engine
        .generate(project.id, &window, args.predecessor, &cancel)
        .await?;

    println!(
        "Generated invoice {} with {} balance sheets:",
        result.invoice.id,
        result.sheets.len()
    );
    for sheet in &result.sheets {
        println!(
            "  account {}: balance {} ({} transactions)",
            sheet.account_id,
            sheet.balance,
            sheet.transaction_ids.len()
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current unit of work");
                cancel.cancel();
            }
        });
    }

    info!("tally v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Charge(args) => run_charge(args, cancel).await,
        Commands::Invoice(args) => run_invoice(args, cancel).await,
    };

    if let Err(ref e) = result {
        if e.downcast_ref::<AppError>()
            .map(|app| matches!(app, AppError::Cancelled))
            .unwrap_or(false)
        {
            bail!("cancelled; completed work was kept");
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2026-01-01T00:00:00Z").is_ok());
        assert!(parse_timestamp("2026-01-01 12:30:00").is_ok());

        let midnight = parse_timestamp("2026-01-01").unwrap();
        assert_eq!(midnight.to_rfc3339(), "2026-01-01T00:00:00+00:00");

        assert!(parse_timestamp("January 1st").is_err());
    }

    #[test]
    fn test_parse_scheme() {
        assert_eq!(parse_scheme("exact"), Ok(MatchScheme::Exact));
        assert_eq!(parse_scheme("contains"), Ok(MatchScheme::Contains));
        assert!(parse_scheme("regex").is_err());
    }
}
