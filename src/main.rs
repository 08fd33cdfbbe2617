//! Batch CLI for the POS data manager.
//!
//! `ingest` walks a data root and loads every organization directory,
//! `seed-admin` creates the dashboard account, `report` prints the
//! aggregate views for one organization and window as JSON.

use anyhow::Context;
use chrono::NaiveDateTime;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pos_datamanager::stats::StatsDataExtractor;
use pos_datamanager::{auth, db, loader, timeframe};

#[derive(Parser)]
#[command(
    name = "pos-datamanager",
    version,
    about = "POS terminal XML export ingestion and sales analytics"
)]
struct Cli {
    /// SQLite database path.
    #[arg(long, global = true, default_value = "posdata.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every organization directory under the data root.
    Ingest {
        /// Directory whose subdirectories are one organization each.
        #[arg(long)]
        data_root: PathBuf,
    },
    /// Seed the administrative dashboard account.
    SeedAdmin {
        #[arg(long)]
        username: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Print the aggregate views for one organization and window as JSON.
    Report {
        /// Organization name (its directory name under the data root).
        #[arg(long)]
        org: String,
        /// Window start, `YYYY-MM-DD HH:MM:SS`, inclusive.
        #[arg(long, conflicts_with = "window", requires = "to")]
        from: Option<String>,
        /// Window end, `YYYY-MM-DD HH:MM:SS`, inclusive.
        #[arg(long, conflicts_with = "window", requires = "from")]
        to: Option<String>,
        /// Named window: today, yesterday, this-week, last-week,
        /// this-month, last-month, this-quarter, last-quarter.
        #[arg(long)]
        window: Option<String>,
        /// Per-line PLU and free-function views (single-order receipts).
        #[arg(long)]
        detailed: bool,
    },
}

fn resolve_window(
    window: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
) -> anyhow::Result<(NaiveDateTime, NaiveDateTime)> {
    if let Some(name) = window {
        let now = chrono::Utc::now().naive_utc();
        return match name {
            "today" => Ok(timeframe::today(now)),
            "yesterday" => Ok(timeframe::yesterday(now)),
            "this-week" => Ok(timeframe::this_week(now)),
            "last-week" => Ok(timeframe::last_week(now)),
            "this-month" => Ok(timeframe::this_month(now)),
            "last-month" => Ok(timeframe::last_month(now)),
            "this-quarter" => Ok(timeframe::this_quarter(now)),
            "last-quarter" => Ok(timeframe::last_quarter(now)),
            other => anyhow::bail!("unknown window {other:?}"),
        };
    }

    let (Some(from), Some(to)) = (from, to) else {
        anyhow::bail!("either --window or both --from and --to are required");
    };
    let start = NaiveDateTime::parse_from_str(from, db::DB_DATE_FORMAT)
        .with_context(|| format!("invalid --from timestamp {from:?}"))?;
    let end = NaiveDateTime::parse_from_str(to, db::DB_DATE_FORMAT)
        .with_context(|| format!("invalid --to timestamp {to:?}"))?;
    Ok((start, end))
}

/// Structured logging: console plus a daily rolling file under `./logs`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pos_datamanager=debug"));

    let log_dir = PathBuf::from("logs");
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "datamanager");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    let console_layer = fmt::layer().with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Keep the guard alive until process exit so the last records flush.
    std::mem::forget(guard);
}

fn main() -> anyhow::Result<()> {
    init_logging();
    let cli = Cli::parse();

    let mut conn = db::init(&cli.db).map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::Ingest { data_root } => {
            let summary = loader::load_all(&mut conn, &data_root)
                .with_context(|| format!("cannot scan data root {}", data_root.display()))?;

            for (name, stats) in &summary.loaded {
                info!(
                    org = %name,
                    masters = stats.masters_inserted,
                    orders = stats.orders_inserted,
                    lines = stats.lines_inserted,
                    "Organization loaded"
                );
            }
            for name in &summary.skipped {
                warn!(org = %name, "Skipped: directory shape invalid");
            }
            for (name, error) in &summary.failed {
                warn!(org = %name, error = %error, "Load failed");
            }
            info!(
                loaded = summary.loaded.len(),
                skipped = summary.skipped.len(),
                failed = summary.failed.len(),
                "Ingest finished"
            );
        }

        Command::SeedAdmin {
            username,
            email,
            password,
        } => {
            auth::seed_admin(&conn, &username, &email, &password).map_err(anyhow::Error::msg)?;
        }

        Command::Report {
            org,
            from,
            to,
            window,
            detailed,
        } => {
            let org_id: i64 = conn
                .query_row(
                    "SELECT id FROM organizations WHERE name = ?1",
                    rusqlite::params![org],
                    |r| r.get(0),
                )
                .with_context(|| format!("unknown organization {org:?}"))?;

            let (start, end) =
                resolve_window(window.as_deref(), from.as_deref(), to.as_deref())?;

            let stats = StatsDataExtractor::new(&conn, org_id, start, end);
            let report = serde_json::json!({
                "organization": org,
                "from": start.format(db::DB_DATE_FORMAT).to_string(),
                "to": end.format(db::DB_DATE_FORMAT).to_string(),
                "department_sales": stats.department_sales()?,
                "group_sales": stats.group_sales()?,
                "plu_sales": stats.plu_sales(detailed)?,
                "fixed_totalizers": stats.fixed_totalizers()?,
                "last_100_sales": stats.last_100_sales()?,
                "clerks_breakdown": stats.clerks_breakdown()?,
                "free_functions": stats.free_functions(detailed)?,
                "change": stats.calculate_change()?,
                "total_sales": stats.calculate_total_sales()?,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
