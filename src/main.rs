mod browser;
mod config;
mod error;
mod gate;
mod loader;
mod models;
mod notifier;
mod pipeline;
mod scheduler;
mod scraper;
mod storage;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AppConfig;
use crate::pipeline::ScraperKind;
use crate::storage::Repository;

#[derive(Parser)]
#[command(name = "nepse-harvester", about = "NEPSE market data harvester", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Run one scraper's scheduler loop until interrupted
    Run {
        #[arg(value_enum)]
        scraper: ScraperKind,
    },

    /// Spawn every scraper as its own worker process
    RunAll,

    /// Apply schema DDL and exit
    Migrate,

    /// Show database statistics
    Stats,

    /// List reference stock symbols
    Symbols,
}

/// Console logging always; one append-only file per scraper when a stem is
/// given. The returned guard keeps the file writer alive.
fn init_logging(verbose: u8, file_stem: Option<&str>) -> Option<WorkerGuard> {
    let filter = match verbose {
        0 => "nepse_harvester=info,warn",
        1 => "nepse_harvester=debug,info",
        _ => "trace",
    };

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(fmt::layer().compact().with_target(false));

    match file_stem {
        Some(stem) => {
            std::fs::create_dir_all("logs").ok();
            let appender = tracing_appender::rolling::never("logs", format!("{stem}.log"));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            registry
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            registry.init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;

    match cli.command {
        Command::Run { scraper } => {
            let _guard = init_logging(cli.verbose, Some(scraper.name()));
            pipeline::run_scraper(scraper, config).await?;
        }

        Command::RunAll => {
            let _guard = init_logging(cli.verbose, Some("harvester"));
            pipeline::run_all().await?;
        }

        Command::Migrate => {
            let _guard = init_logging(cli.verbose, None);
            let mut repo = Repository::connect(&config.database).await?;
            repo.run_migrations().await?;
            repo.close().await?;
            println!("Migrations applied.");
        }

        Command::Stats => {
            let _guard = init_logging(cli.verbose, None);
            let mut repo = Repository::connect(&config.database).await?;
            let stats = repo.stats().await?;
            repo.close().await?;
            println!("─────────────────────────────────");
            println!("  NEPSE Harvester — Store Stats");
            println!("─────────────────────────────────");
            println!("  Stocks        : {}", utils::fmt_number(stats.stocks));
            println!("  Daily prices  : {}", utils::fmt_number(stats.daily_prices));
            println!("  Live trades   : {}", utils::fmt_number(stats.live_trades));
            println!("  Floorsheet    : {}", utils::fmt_number(stats.floorsheet_rows));
            println!("  Dividends     : {}", utils::fmt_number(stats.dividends));
            println!("  EPS rows      : {}", utils::fmt_number(stats.eps_rows));
            println!("  Announcements : {}", utils::fmt_number(stats.announcements));
            println!("─────────────────────────────────");
        }

        Command::Symbols => {
            let _guard = init_logging(cli.verbose, None);
            let mut repo = Repository::connect(&config.database).await?;
            let syms = repo.stock_symbols().await?;
            repo.close().await?;
            if syms.is_empty() {
                println!("No symbols — seed the stock reference table first.");
            } else {
                println!("{} symbols:", syms.len());
                for s in &syms {
                    println!("  {}", s);
                }
            }
        }
    }

    Ok(())
}
