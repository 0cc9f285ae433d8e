use chrono::{NaiveDate, NaiveTime};

// ── Raw extraction output ─────────────────────────────────────────────────────

/// One scraped table row: an ordered column-name → cell-text mapping.
///
/// Column names are the canonicalized headers of the source table, so the
/// same adapter keeps working when the site reorders columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zip canonical headers with row cells; extra cells are dropped,
    /// missing ones are simply absent.
    pub fn from_row(headers: &[String], cells: &[String]) -> Self {
        let fields = headers
            .iter()
            .zip(cells.iter())
            .map(|(h, c)| (h.clone(), c.clone()))
            .collect();
        Self { fields }
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.push((key.into(), value.into()));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

// ── Resolved records (joined against reference ids) ───────────────────────────

/// Price board row, written to daily_stock_prices and live_stock_prices.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePriceRecord {
    pub stock_id: i64,
    pub last_trading_price: f64,
    pub point_change: f64,
    pub percentage_change: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub previous_close: f64,
}

/// Sector index card, written to live_indices_price.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuoteRecord {
    pub index_id: i64,
    pub last_trading_price: f64,
    pub percentage_change: f64,
    pub turnover: f64,
}

/// Live-market tick row, written to live_trading.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub stock_id: i64,
    pub ltp: f64,
    pub ltv: f64,
    pub point_change: f64,
    pub percentage_change: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub avg_traded_price: f64,
    pub volume: f64,
    pub previous_closing: f64,
}

/// One executed contract from the floorsheet.
#[derive(Debug, Clone, PartialEq)]
pub struct FloorsheetRecord {
    pub stock_id: i64,
    pub transaction_no: String,
    pub buyer_broker_id: i64,
    pub sell_broker_id: i64,
    pub share_quantity: f64,
    pub rate: f64,
    pub amount: f64,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EpsRecord {
    pub stock_id: i64,
    pub eps: f64,
    pub pe_ratio: f64,
}

/// Dividend history row, keyed by (stock_id, fiscal_year).
#[derive(Debug, Clone, PartialEq)]
pub struct DividendRecord {
    pub stock_id: i64,
    pub fiscal_year: String,
    pub cash_dividend: f64,
    pub bonus_share: f64,
    pub right_share: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnouncementRecord {
    pub stock_id: i64,
    pub symbol: String,
    pub date: NaiveDate,
    pub announcement: String,
    pub should_notify: bool,
    pub notify_time: Option<NaiveTime>,
}
