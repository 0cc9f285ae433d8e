//! Pipeline orchestration: one scheduler per scraper, each job following
//! the same shape (gate check, acquire a session, extract, reconcile and
//! load, release the session).
//!
//! Schedules mirror the exchange's week (Sunday–Thursday) and trading
//! window; interval jobs are additionally gated on the live-market probe
//! with a short post-close grace band so the closing auction still lands.

use crate::browser::{self, watchdog::ProcessWatchdog};
use crate::config::AppConfig;
use crate::gate;
use crate::loader;
use crate::notifier::Notifier;
use crate::scheduler::{JobAction, KathmanduClock, ScheduledJob, Scheduler, Trigger};
use crate::scraper::{chukul, merolagani, nepalstock, sharesansar, ScrapeAdapter};
use crate::storage::Repository;
use crate::utils::kathmandu_now;
use anyhow::{Context, Result};
use chrono::{NaiveTime, Weekday};
use clap::ValueEnum;
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

// ── Scraper registry ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ScraperKind {
    MarketStatus,
    LiveIndices,
    LiveStock,
    LiveMarket,
    Floorsheet,
    Eps,
    Dividend,
    Announcements,
    ChromeSweeper,
}

impl ScraperKind {
    pub const ALL: [ScraperKind; 9] = [
        ScraperKind::MarketStatus,
        ScraperKind::LiveIndices,
        ScraperKind::LiveStock,
        ScraperKind::LiveMarket,
        ScraperKind::Floorsheet,
        ScraperKind::Eps,
        ScraperKind::Dividend,
        ScraperKind::Announcements,
        ScraperKind::ChromeSweeper,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScraperKind::MarketStatus => "market-status",
            ScraperKind::LiveIndices => "live-indices",
            ScraperKind::LiveStock => "live-stock",
            ScraperKind::LiveMarket => "live-market",
            ScraperKind::Floorsheet => "floorsheet",
            ScraperKind::Eps => "eps",
            ScraperKind::Dividend => "dividend",
            ScraperKind::Announcements => "announcements",
            ScraperKind::ChromeSweeper => "chrome-sweeper",
        }
    }
}

// ── Schedule constants ────────────────────────────────────────────────────────

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).expect("valid schedule time")
}

/// Exchange trading days.
fn market_week() -> HashSet<Weekday> {
    [
        Weekday::Sun,
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
    ]
    .into_iter()
    .collect()
}

/// The price board runs one extra day to catch schedule shifts.
fn extended_week() -> HashSet<Weekday> {
    let mut days = market_week();
    days.insert(Weekday::Fri);
    days
}

fn full_week() -> HashSet<Weekday> {
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ]
    .into_iter()
    .collect()
}

fn trading_window() -> (NaiveTime, NaiveTime) {
    (t(11, 0), t(15, 5))
}

/// Right after close the board still shows the closing auction.
fn in_post_close_grace(now: NaiveTime) -> bool {
    t(15, 1) <= now && now < t(15, 5)
}

const LIVE_STOCK_CUTOFF: (u32, u32) = (15, 2);
const LIVE_MARKET_CUTOFF: (u32, u32) = (15, 5);
const LIVE_STOCK_RELOAD: Duration = Duration::from_secs(10);
const LIVE_MARKET_POLL: Duration = Duration::from_secs(20);

// ── Scheduler assembly ────────────────────────────────────────────────────────

fn action<F, Fut>(cfg: &Arc<AppConfig>, f: F) -> JobAction
where
    F: Fn(Arc<AppConfig>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let cfg = Arc::clone(cfg);
    Arc::new(move || f(Arc::clone(&cfg)).boxed())
}

pub fn build_scheduler(kind: ScraperKind, cfg: Arc<AppConfig>) -> Scheduler {
    let mut sched = Scheduler::new(
        Arc::new(KathmanduClock),
        Duration::from_secs(cfg.scheduler.tick_secs),
        Duration::from_secs(cfg.scheduler.cooldown_secs),
    );

    let job = match kind {
        ScraperKind::MarketStatus => ScheduledJob::new(
            kind.name(),
            Trigger::Daily(vec![
                t(11, 0),
                t(11, 1),
                t(11, 2),
                t(11, 3),
                t(15, 0),
                t(15, 1),
                t(15, 2),
            ]),
            market_week(),
            None,
            action(&cfg, market_status_job),
        ),
        ScraperKind::LiveIndices => ScheduledJob::new(
            kind.name(),
            Trigger::Every(Duration::from_secs(30)),
            market_week(),
            Some(trading_window()),
            action(&cfg, live_indices_job),
        ),
        ScraperKind::LiveStock => ScheduledJob::new(
            kind.name(),
            Trigger::Daily(vec![t(14, 10)]),
            extended_week(),
            None,
            action(&cfg, live_stock_job),
        ),
        ScraperKind::LiveMarket => ScheduledJob::new(
            kind.name(),
            Trigger::Every(Duration::from_secs(60)),
            market_week(),
            Some(trading_window()),
            action(&cfg, live_market_job),
        ),
        ScraperKind::Floorsheet => ScheduledJob::new(
            kind.name(),
            Trigger::Daily(vec![t(15, 30)]),
            market_week(),
            None,
            action(&cfg, floorsheet_job),
        ),
        ScraperKind::Eps => ScheduledJob::new(
            kind.name(),
            Trigger::Daily(vec![t(11, 13), t(11, 15), t(11, 20)]),
            market_week(),
            None,
            action(&cfg, eps_job),
        ),
        ScraperKind::Dividend => ScheduledJob::new(
            kind.name(),
            Trigger::Daily(vec![t(12, 31)]),
            market_week(),
            None,
            action(&cfg, dividend_job),
        ),
        ScraperKind::Announcements => ScheduledJob::new(
            kind.name(),
            Trigger::Every(Duration::from_secs(20 * 60)),
            market_week(),
            Some((t(8, 0), t(17, 30))),
            action(&cfg, announcements_job),
        ),
        ScraperKind::ChromeSweeper => ScheduledJob::new(
            kind.name(),
            Trigger::Daily(vec![t(22, 0)]),
            full_week(),
            None,
            action(&cfg, chrome_sweep_job),
        ),
    };

    sched.register(job);
    sched
}

/// Run one scraper's scheduler loop until interrupted.
pub async fn run_scraper(kind: ScraperKind, cfg: AppConfig) -> Result<()> {
    info!("starting scraper: {}", kind.name());
    build_scheduler(kind, Arc::new(cfg)).run().await
}

/// Spawn every scraper as its own OS process and wait on all of them.
pub async fn run_all() -> Result<()> {
    let exe = std::env::current_exe().context("locating own executable")?;

    let mut workers = Vec::new();
    for kind in ScraperKind::ALL {
        let child = tokio::process::Command::new(&exe)
            .arg("run")
            .arg(kind.name())
            .spawn()
            .with_context(|| format!("spawning {} worker", kind.name()))?;
        info!("started {} worker (pid {:?})", kind.name(), child.id());
        workers.push((kind, child));
    }

    for (kind, mut child) in workers {
        let status = child.wait().await?;
        info!("{} worker exited: {}", kind.name(), status);
    }
    Ok(())
}

// ── Gate helpers ──────────────────────────────────────────────────────────────

/// Single probe, with the post-close grace band as a fallback.
async fn gate_open_or_grace(cfg: &AppConfig) -> bool {
    let gate = gate::status_gate(cfg.browser.clone(), &cfg.gate);
    if gate.is_live().await {
        return true;
    }
    if in_post_close_grace(kathmandu_now().time()) {
        info!("market reported closed but inside the post-close grace band");
        return true;
    }
    info!("market closed, skipping this tick");
    false
}

/// Wait-for-open loop used by the daily price-board job.
async fn wait_for_open(cfg: &AppConfig) -> bool {
    let gate = gate::status_gate(cfg.browser.clone(), &cfg.gate);
    for attempt in 1..=cfg.gate.wait.attempts {
        if gate.is_live().await {
            return true;
        }
        info!(
            "market not live yet (check {}/{})",
            attempt, cfg.gate.wait.attempts
        );
        if attempt < cfg.gate.wait.attempts {
            sleep(cfg.gate.wait.delay()).await;
        }
    }
    false
}

// ── Jobs ──────────────────────────────────────────────────────────────────────

async fn market_status_job(cfg: Arc<AppConfig>) -> Result<()> {
    let gate = gate::status_gate(cfg.browser.clone(), &cfg.gate);
    let is_live = gate.is_live().await;

    let mut repo = Repository::connect(&cfg.database).await?;
    repo.set_market_status(is_live).await?;
    repo.close().await?;
    Ok(())
}

async fn live_indices_job(cfg: Arc<AppConfig>) -> Result<()> {
    if !gate_open_or_grace(&cfg).await {
        return Ok(());
    }

    let session = browser::acquire(&cfg.browser).await?;
    let outcome = async {
        let raws = sharesansar::IndexBoard.extract(&session).await?;
        if raws.is_empty() {
            info!("no index data extracted");
            return Ok(0usize);
        }
        let mut repo = Repository::connect(&cfg.database).await?;
        let loaded = loader::load_indices(&mut repo, &raws).await?;
        repo.close().await?;
        Ok(loaded)
    }
    .await;
    finish(session, outcome).await
}

async fn live_stock_job(cfg: Arc<AppConfig>) -> Result<()> {
    if !wait_for_open(&cfg).await {
        info!("market never opened, skipping the price board run");
        return Ok(());
    }

    let cutoff = t(LIVE_STOCK_CUTOFF.0, LIVE_STOCK_CUTOFF.1);
    let session = browser::acquire(&cfg.browser).await?;
    let outcome = async {
        let mut total = 0usize;
        loop {
            let raws = sharesansar::LivePriceBoard.extract(&session).await?;
            let mut repo = Repository::connect(&cfg.database).await?;
            total += loader::load_live_prices(&mut repo, &raws).await?;
            repo.close().await?;

            if kathmandu_now().time() >= cutoff {
                info!("price board cutoff reached");
                break;
            }
            sleep(LIVE_STOCK_RELOAD).await;
        }
        Ok(total)
    }
    .await;
    finish(session, outcome).await
}

async fn live_market_job(cfg: Arc<AppConfig>) -> Result<()> {
    if !gate_open_or_grace(&cfg).await {
        return Ok(());
    }

    let cutoff = t(LIVE_MARKET_CUTOFF.0, LIVE_MARKET_CUTOFF.1);
    let session = browser::acquire(&cfg.browser).await?;
    let outcome = async {
        let mut total = 0usize;
        loop {
            let raws = nepalstock::LiveMarketTable.extract(&session).await?;
            if raws.is_empty() {
                break;
            }
            let mut repo = Repository::connect(&cfg.database).await?;
            total += loader::load_trades(&mut repo, &raws).await?;
            repo.close().await?;

            if kathmandu_now().time() >= cutoff {
                break;
            }
            sleep(LIVE_MARKET_POLL).await;
        }
        Ok(total)
    }
    .await;
    finish(session, outcome).await
}

async fn floorsheet_job(cfg: Arc<AppConfig>) -> Result<()> {
    let session = browser::acquire(&cfg.browser).await?;
    let outcome = async {
        let raws = nepalstock::FloorsheetSheet.extract(&session).await?;
        let mut repo = Repository::connect(&cfg.database).await?;
        let loaded = loader::load_floorsheet(&mut repo, &raws).await?;
        repo.close().await?;
        Ok(loaded)
    }
    .await;
    finish(session, outcome).await
}

async fn eps_job(cfg: Arc<AppConfig>) -> Result<()> {
    let session = browser::acquire(&cfg.browser).await?;
    let outcome = async {
        let raws = chukul::StockFilterTable.extract(&session).await?;
        let mut repo = Repository::connect(&cfg.database).await?;
        let loaded = loader::load_eps(&mut repo, &raws).await?;
        repo.close().await?;
        Ok(loaded)
    }
    .await;
    finish(session, outcome).await
}

/// Fan out one worker per symbol; each worker owns its own session and its
/// own connection. Worker failures are counted, never fatal to the batch.
async fn dividend_job(cfg: Arc<AppConfig>) -> Result<()> {
    let mut repo = Repository::connect(&cfg.database).await?;
    let symbols = repo.stock_symbols().await?;
    repo.close().await?;
    info!(
        "dividend fan-out over {} symbols ({} workers)",
        symbols.len(),
        cfg.pipeline.dividend_workers
    );

    let sem = Arc::new(Semaphore::new(cfg.pipeline.dividend_workers));
    let mut handles = Vec::new();

    for symbol in symbols {
        let cfg = Arc::clone(&cfg);
        let sem = Arc::clone(&sem);
        let sym = symbol.clone();

        let handle = tokio::spawn(async move {
            let _permit = sem.acquire().await?;

            let session = browser::acquire(&cfg.browser).await?;
            let outcome = async {
                let adapter = merolagani::DividendHistory::new(&sym);
                let raws = adapter.extract(&session).await?;
                if raws.is_empty() {
                    return Ok(0usize);
                }
                let mut repo = Repository::connect(&cfg.database).await?;
                let loaded = loader::load_dividends(&mut repo, &raws).await?;
                repo.close().await?;
                Ok::<usize, anyhow::Error>(loaded)
            }
            .await;
            let report = session.release().await;
            if !report.is_complete() {
                warn!("teardown incomplete after dividend scrape for {}", sym);
            }
            outcome
        });

        handles.push((symbol, handle));
    }

    let mut total = 0usize;
    let mut errors = 0usize;
    for (symbol, handle) in handles {
        match handle.await {
            Ok(Ok(n)) => total += n,
            Ok(Err(e)) => {
                warn!("{}: {:#}", symbol, e);
                errors += 1;
            }
            Err(e) => {
                error!("task panic for {}: {}", symbol, e);
                errors += 1;
            }
        }
    }

    info!("dividend run done: {} rows upserted, {} errors", total, errors);
    Ok(())
}

async fn announcements_job(cfg: Arc<AppConfig>) -> Result<()> {
    let session = browser::acquire(&cfg.browser).await?;
    let outcome = async {
        let adapter = nepalstock::DisclosureTable::new(cfg.gate.probe);
        let raws = adapter.extract(&session).await?;

        let mut repo = Repository::connect(&cfg.database).await?;
        let fresh = loader::load_announcements(&mut repo, &raws).await?;
        repo.close().await?;

        // Notify only after the load committed; sink failures stay local.
        let notifier = Notifier::new(&cfg.notifier);
        for record in &fresh {
            notifier.announce(&record.symbol).await;
        }
        Ok(fresh.len())
    }
    .await;
    finish(session, outcome).await
}

async fn chrome_sweep_job(_cfg: Arc<AppConfig>) -> Result<()> {
    let killed = tokio::task::spawn_blocking(|| ProcessWatchdog::sweep("chrome")).await?;
    info!("browser sweep done: {} processes killed", killed);
    Ok(())
}

/// Release the session whatever the outcome was, then surface the outcome.
async fn finish(session: browser::Session, outcome: Result<usize>) -> Result<()> {
    debug!(
        "releasing session (state {:?}, {} tracked pids)",
        session.state(),
        session.tracked_pids().len()
    );
    let report = session.release().await;
    if !report.is_complete() {
        warn!(
            "teardown incomplete, still alive: {:?}",
            report.still_alive()
        );
    }
    let loaded = outcome?;
    info!("job finished, {} rows loaded", loaded);
    Ok(())
}
