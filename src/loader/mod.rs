//! Reconcile scraped rows against reference keys and load them.
//!
//! Every loader follows the same shape: join raw records to reference ids
//! by natural key (dropping misses with a warning), classify each record
//! against a single snapshot of existing destination keys, then hand the
//! batch to the repository, which writes it in one transaction.

use crate::models::{
    AnnouncementRecord, DividendRecord, EpsRecord, FloorsheetRecord, IndexQuoteRecord,
    LivePriceRecord, RawRecord, TradeRecord,
};
use crate::scraper::cleaner::{
    parse_amount, parse_count, parse_date_ymd, parse_datetime, parse_dividend, parse_pct,
};
use crate::storage::Repository;
use crate::utils::{kathmandu_now, Timer};
use anyhow::Result;
use rand::RngExt;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

// ── Reconciliation primitives ─────────────────────────────────────────────────

/// A batch split against one point-in-time snapshot of existing keys.
#[derive(Debug, PartialEq)]
pub struct UpsertBatch<T> {
    pub inserts: Vec<T>,
    pub updates: Vec<T>,
}

impl<T> Default for UpsertBatch<T> {
    fn default() -> Self {
        Self {
            inserts: Vec::new(),
            updates: Vec::new(),
        }
    }
}

impl<T> UpsertBatch<T> {
    pub fn len(&self) -> usize {
        self.inserts.len() + self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// Disjoint, exhaustive classification: a record whose key is in `existing`
/// becomes an update, every other record an insert. The snapshot is taken
/// once per batch; concurrent external writers are not accounted for.
pub fn partition<T>(
    records: Vec<T>,
    existing: &HashSet<i64>,
    key: impl Fn(&T) -> i64,
) -> UpsertBatch<T> {
    let mut batch = UpsertBatch::default();
    for record in records {
        if existing.contains(&key(&record)) {
            batch.updates.push(record);
        } else {
            batch.inserts.push(record);
        }
    }
    batch
}

/// Join raw records to reference ids by `key_col`. Rows whose key is
/// missing from the reference table, or that fail to map, are dropped with
/// a warning, never fatally for the batch.
pub fn resolve<T>(
    raws: &[RawRecord],
    reference: &HashMap<String, i64>,
    key_col: &str,
    mut map: impl FnMut(i64, &RawRecord) -> Option<T>,
) -> Vec<T> {
    let mut resolved = Vec::with_capacity(raws.len());
    for raw in raws {
        let Some(key) = raw.get(key_col).map(str::trim).filter(|k| !k.is_empty()) else {
            warn!("row without a {} column skipped: {:?}", key_col, raw);
            continue;
        };
        let Some(&id) = reference.get(key) else {
            warn!("no reference entry for {} {:?}, row skipped", key_col, key);
            continue;
        };
        match map(id, raw) {
            Some(record) => resolved.push(record),
            None => warn!("malformed row for {:?} skipped", key),
        }
    }
    resolved
}

// ── Field mappings ────────────────────────────────────────────────────────────

fn live_price_record(stock_id: i64, raw: &RawRecord) -> Option<LivePriceRecord> {
    Some(LivePriceRecord {
        stock_id,
        last_trading_price: parse_amount(raw.get("ltp")?),
        point_change: parse_amount(raw.get("pointchange").unwrap_or_default()),
        percentage_change: parse_pct(raw.get("percentagechange").unwrap_or_default()),
        open: parse_amount(raw.get("open").unwrap_or_default()),
        high: parse_amount(raw.get("high").unwrap_or_default()),
        low: parse_amount(raw.get("low").unwrap_or_default()),
        volume: parse_amount(raw.get("volume").unwrap_or_default()),
        previous_close: parse_amount(raw.get("prev.close").unwrap_or_default()),
    })
}

fn index_record(index_id: i64, raw: &RawRecord) -> Option<IndexQuoteRecord> {
    Some(IndexQuoteRecord {
        index_id,
        last_trading_price: parse_amount(raw.get("last_trading_index")?),
        percentage_change: parse_pct(raw.get("percentage_change").unwrap_or_default()),
        turnover: parse_amount(raw.get("turnover").unwrap_or_default()),
    })
}

fn trade_record(stock_id: i64, raw: &RawRecord) -> Option<TradeRecord> {
    Some(TradeRecord {
        stock_id,
        ltp: parse_amount(raw.get("ltp")?),
        ltv: parse_amount(raw.get("ltv").unwrap_or_default()),
        point_change: parse_amount(raw.get("point_change").unwrap_or_default()),
        percentage_change: parse_pct(raw.get("percentage_change").unwrap_or_default()),
        open: parse_amount(raw.get("open_price").unwrap_or_default()),
        high: parse_amount(raw.get("high_price").unwrap_or_default()),
        low: parse_amount(raw.get("low_price").unwrap_or_default()),
        avg_traded_price: parse_amount(raw.get("avg_traded_price").unwrap_or_default()),
        volume: parse_amount(raw.get("volume").unwrap_or_default()),
        previous_closing: parse_amount(raw.get("previous_closing").unwrap_or_default()),
    })
}

fn floorsheet_record(stock_id: i64, raw: &RawRecord) -> Option<FloorsheetRecord> {
    Some(FloorsheetRecord {
        stock_id,
        transaction_no: raw.get("transaction_no")?.to_string(),
        buyer_broker_id: parse_count(raw.get("buyer_broker_id").unwrap_or_default()),
        sell_broker_id: parse_count(raw.get("sell_broker_id").unwrap_or_default()),
        share_quantity: parse_amount(raw.get("share_quantity").unwrap_or_default()),
        rate: parse_amount(raw.get("rate").unwrap_or_default()),
        amount: parse_amount(raw.get("amount").unwrap_or_default()),
        date: parse_date_ymd(raw.get("date")?)?,
    })
}

fn eps_record(stock_id: i64, raw: &RawRecord) -> Option<EpsRecord> {
    Some(EpsRecord {
        stock_id,
        eps: parse_amount(raw.get("eps")?),
        pe_ratio: parse_amount(raw.get("pe_ratio").unwrap_or_default()),
    })
}

fn dividend_record(stock_id: i64, raw: &RawRecord) -> Option<DividendRecord> {
    Some(DividendRecord {
        stock_id,
        fiscal_year: raw.get("fiscal_year")?.to_string(),
        cash_dividend: parse_dividend(raw.get("cash_dividend").unwrap_or_default()),
        bonus_share: parse_dividend(raw.get("bonus_share").unwrap_or_default()),
        right_share: raw.get("right_share").unwrap_or_default().to_string(),
    })
}

// ── Loaders ───────────────────────────────────────────────────────────────────

/// Price board rows: appended to daily_stock_prices, reconciled into
/// live_stock_prices keyed by stock_id.
pub async fn load_live_prices(repo: &mut Repository, raws: &[RawRecord]) -> Result<usize> {
    let stocks = repo.stock_index().await?;
    let resolved = resolve(raws, &stocks, "symbol", live_price_record);
    if resolved.is_empty() {
        info!("no price rows resolved, nothing to load");
        return Ok(0);
    }

    let existing = repo.live_price_stock_ids().await?;
    let batch = partition(resolved.clone(), &existing, |r| r.stock_id);

    let _t = Timer::start("live price load");
    repo.insert_daily_prices(&resolved).await?;
    let applied = repo.apply_live_prices(&batch).await?;
    info!(
        "live prices: {} daily rows, {} inserted, {} updated",
        resolved.len(),
        batch.inserts.len(),
        batch.updates.len()
    );
    Ok(applied)
}

/// Index cards: upsert keyed by index_id.
pub async fn load_indices(repo: &mut Repository, raws: &[RawRecord]) -> Result<usize> {
    let sectors = repo.sector_index().await?;
    let resolved = resolve(raws, &sectors, "index_name", index_record);
    repo.upsert_indices(&resolved).await?;
    info!("indices: {} rows upserted", resolved.len());
    Ok(resolved.len())
}

/// Live-market ticks: plain append.
pub async fn load_trades(repo: &mut Repository, raws: &[RawRecord]) -> Result<usize> {
    let stocks = repo.stock_index().await?;
    let resolved = resolve(raws, &stocks, "symbol", trade_record);
    repo.insert_trades(&resolved).await?;
    info!("live trading: {} rows inserted", resolved.len());
    Ok(resolved.len())
}

/// Floorsheet contracts: plain append.
pub async fn load_floorsheet(repo: &mut Repository, raws: &[RawRecord]) -> Result<usize> {
    let stocks = repo.stock_index().await?;
    let resolved = resolve(raws, &stocks, "symbol", floorsheet_record);
    let _t = Timer::start("floorsheet load");
    repo.insert_floorsheet(&resolved).await?;
    info!("floorsheet: {} rows inserted", resolved.len());
    Ok(resolved.len())
}

/// EPS/PE figures: reconciled into stock_eps_pe keyed by stock_id.
pub async fn load_eps(repo: &mut Repository, raws: &[RawRecord]) -> Result<usize> {
    let stocks = repo.stock_index().await?;
    let resolved = resolve(raws, &stocks, "symbol", eps_record);
    let existing = repo.eps_stock_ids().await?;
    let batch = partition(resolved, &existing, |r| r.stock_id);
    let applied = repo.apply_eps(&batch).await?;
    info!(
        "eps: {} inserted, {} updated",
        batch.inserts.len(),
        batch.updates.len()
    );
    Ok(applied)
}

/// Dividend history rows: upsert keyed by (stock_id, fiscal_year).
pub async fn load_dividends(repo: &mut Repository, raws: &[RawRecord]) -> Result<usize> {
    let stocks = repo.stock_index().await?;
    let resolved = resolve(raws, &stocks, "symbol", dividend_record);
    repo.upsert_dividends(&resolved).await?;
    info!("dividend: {} rows upserted", resolved.len());
    Ok(resolved.len())
}

/// Disclosure rows: insert-if-absent keyed by (stock_id, date, text).
/// Returns the newly inserted records so the caller can notify on them.
pub async fn load_announcements(
    repo: &mut Repository,
    raws: &[RawRecord],
) -> Result<Vec<AnnouncementRecord>> {
    let stocks = repo.stock_index().await?;
    let now = kathmandu_now();
    let today = now.date();
    let mut fresh = Vec::new();

    for raw in raws {
        let Some(symbol) = raw.get("symbol").map(str::trim).filter(|s| !s.is_empty()) else {
            warn!("announcement row without a symbol skipped: {:?}", raw);
            continue;
        };
        let Some(&stock_id) = stocks.get(symbol) else {
            warn!("stock id for {} not found, announcement skipped", symbol);
            continue;
        };
        let Some(approved) = raw.get("approved_date").and_then(parse_datetime) else {
            warn!("unparseable approved date for {}, row skipped", symbol);
            continue;
        };

        let announcement = raw.get("announcement").unwrap_or_default().to_string();
        let should_notify = approved.date() == today;
        let notify_time = should_notify.then(|| {
            // Stagger notifications so they do not all fire at once.
            let minutes = rand::rng().random_range(30..60);
            (now + chrono::Duration::minutes(minutes)).time()
        });

        let record = AnnouncementRecord {
            stock_id,
            symbol: symbol.to_string(),
            date: approved.date(),
            announcement,
            should_notify,
            notify_time,
        };

        if !repo.announcement_exists(&record).await? {
            repo.insert_announcement(&record).await?;
            fresh.push(record);
        }
    }

    info!("announcements: {} new rows inserted", fresh.len());
    Ok(fresh)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> RawRecord {
        let mut record = RawRecord::new();
        for (k, v) in pairs {
            record.push(*k, *v);
        }
        record
    }

    #[test]
    fn partition_is_a_disjoint_exhaustive_split() {
        let existing: HashSet<i64> = [7].into_iter().collect();
        let batch = partition(vec![7i64, 9i64], &existing, |r| *r);

        assert_eq!(batch.inserts, vec![9]);
        assert_eq!(batch.updates, vec![7]);
        assert_eq!(batch.len(), 2);

        // No record lands in both halves.
        for record in &batch.inserts {
            assert!(!batch.updates.contains(record));
        }
    }

    #[test]
    fn partition_of_empty_existing_set_is_all_inserts() {
        let existing = HashSet::new();
        let batch = partition(vec![1i64, 2, 3], &existing, |r| *r);
        assert_eq!(batch.inserts.len(), 3);
        assert!(batch.updates.is_empty());
    }

    #[test]
    fn resolve_joins_and_drops_misses() {
        let reference: HashMap<String, i64> = [("ABC".to_string(), 7)].into_iter().collect();
        let raws = vec![
            raw(&[
                ("symbol", "ABC"),
                ("fiscal_year", "2080/2081"),
                ("cash_dividend", "10%"),
                ("bonus_share", ""),
                ("right_share", ""),
            ]),
            raw(&[("symbol", "ZZZ"), ("fiscal_year", "2080/2081")]),
        ];

        let resolved = resolve(&raws, &reference, "symbol", dividend_record);
        assert_eq!(resolved.len(), 1);
        assert_eq!(
            resolved[0],
            DividendRecord {
                stock_id: 7,
                fiscal_year: "2080/2081".to_string(),
                cash_dividend: 10.0,
                bonus_share: 0.0,
                right_share: String::new(),
            }
        );
    }

    #[test]
    fn price_board_row_maps_through_compact_headers() {
        let reference: HashMap<String, i64> = [("NABIL".to_string(), 3)].into_iter().collect();
        let raws = vec![raw(&[
            ("symbol", "NABIL"),
            ("ltp", "1020.5"),
            ("pointchange", "-4.5"),
            ("percentagechange", "-0.44"),
            ("open", "1025"),
            ("high", "1032"),
            ("low", "1018"),
            ("volume", "125000"),
            ("prev.close", "1025"),
        ])];

        let resolved = resolve(&raws, &reference, "symbol", live_price_record);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].stock_id, 3);
        assert_eq!(resolved[0].last_trading_price, 1020.5);
        assert_eq!(resolved[0].previous_close, 1025.0);
    }
}
