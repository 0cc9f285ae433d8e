//! Destination store access.
//!
//! One `Repository` wraps one MySQL connection, opened per call site and
//! closed when the job is done; connections are never pooled and never
//! held across a scrape. All multi-row writes run inside a single
//! transaction; an error anywhere drops the transaction, which rolls the
//! whole batch back.

use crate::config::DatabaseConfig;
use crate::error::HarvestError;
use crate::loader::UpsertBatch;
use crate::models::{
    AnnouncementRecord, DividendRecord, EpsRecord, FloorsheetRecord, IndexQuoteRecord,
    LivePriceRecord, TradeRecord,
};
use crate::utils::kathmandu_now;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection, Row};
use std::collections::{HashMap, HashSet};
use tracing::info;

// ── Schema ────────────────────────────────────────────────────────────────────

const DDL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS stock (
        id          BIGINT PRIMARY KEY AUTO_INCREMENT,
        symbol      VARCHAR(32) NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sector (
        id                  BIGINT PRIMARY KEY AUTO_INCREMENT,
        index_display_name  VARCHAR(64) NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS daily_stock_prices (
        id                      BIGINT PRIMARY KEY AUTO_INCREMENT,
        stock_id                BIGINT NOT NULL,
        last_trading_price      DOUBLE NOT NULL,
        point_changes           DOUBLE,
        percentage_change       DOUBLE,
        open_price              DOUBLE,
        high                    DOUBLE,
        low                     DOUBLE,
        volume                  DOUBLE,
        previous_close_price    DOUBLE,
        created_at              DATETIME NOT NULL,
        updated_at              DATETIME NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS live_stock_prices (
        id                      BIGINT PRIMARY KEY AUTO_INCREMENT,
        stock_id                BIGINT NOT NULL UNIQUE,
        last_trading_price      DOUBLE NOT NULL,
        point_changes           DOUBLE,
        percentage_change       DOUBLE,
        open_price              DOUBLE,
        high                    DOUBLE,
        low                     DOUBLE,
        volume                  DOUBLE,
        previous_close_price    DOUBLE,
        created_at              DATETIME NOT NULL,
        updated_at              DATETIME NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS live_indices_price (
        id                  BIGINT PRIMARY KEY AUTO_INCREMENT,
        index_id            BIGINT NOT NULL UNIQUE,
        last_trading_price  DOUBLE NOT NULL,
        percentage_change   DOUBLE,
        turnover            DOUBLE,
        created_at          DATETIME NOT NULL,
        updated_at          DATETIME NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS live_trading (
        id                  BIGINT PRIMARY KEY AUTO_INCREMENT,
        stock_id            BIGINT NOT NULL,
        ltp                 DOUBLE NOT NULL,
        ltv                 DOUBLE,
        point_change        DOUBLE,
        percentage_change   DOUBLE,
        open                DOUBLE,
        high                DOUBLE,
        low                 DOUBLE,
        avg_trading_price   DOUBLE,
        volume              DOUBLE,
        previous_closing    DOUBLE,
        created_at          DATETIME NOT NULL,
        updated_at          DATETIME NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS floorsheet (
        id              BIGINT PRIMARY KEY AUTO_INCREMENT,
        stock_id        BIGINT NOT NULL,
        transaction_no  VARCHAR(64) NOT NULL,
        buyer_broker_id BIGINT,
        sell_broker_id  BIGINT,
        share_quantity  DOUBLE,
        rate            DOUBLE,
        amount          DOUBLE,
        date            DATE NOT NULL,
        created_at      DATETIME NOT NULL,
        updated_at      DATETIME NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS dividend (
        id              BIGINT PRIMARY KEY AUTO_INCREMENT,
        stock_id        BIGINT NOT NULL,
        fiscal_year     VARCHAR(16) NOT NULL,
        cash_dividend   DOUBLE,
        bonus_share     DOUBLE,
        right_share     VARCHAR(32),
        created_at      DATETIME NOT NULL,
        updated_at      DATETIME NOT NULL,
        UNIQUE KEY uq_dividend (stock_id, fiscal_year)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS stock_eps_pe (
        id          BIGINT PRIMARY KEY AUTO_INCREMENT,
        stock_id    BIGINT NOT NULL UNIQUE,
        eps         DOUBLE,
        pe_ratio    DOUBLE,
        created_at  DATETIME NOT NULL,
        updated_at  DATETIME NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS announcements (
        id              BIGINT PRIMARY KEY AUTO_INCREMENT,
        stock_id        BIGINT NOT NULL,
        date            DATE NOT NULL,
        announcement    TEXT NOT NULL,
        should_notify   TINYINT(1) NOT NULL DEFAULT 0,
        notify_time     TIME NULL,
        created_at      DATETIME NOT NULL,
        updated_at      DATETIME NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS application_config (
        id          BIGINT PRIMARY KEY AUTO_INCREMENT,
        `key`       VARCHAR(64) NOT NULL UNIQUE,
        `value`     VARCHAR(255) NOT NULL,
        created_at  DATETIME NOT NULL,
        updated_at  DATETIME NOT NULL
    )"#,
];

// ── Repository ────────────────────────────────────────────────────────────────

pub struct Repository {
    conn: MySqlConnection,
}

/// Row counts for the stats command.
#[derive(Debug, Default)]
pub struct StoreStats {
    pub stocks: i64,
    pub daily_prices: i64,
    pub live_trades: i64,
    pub floorsheet_rows: i64,
    pub dividends: i64,
    pub eps_rows: i64,
    pub announcements: i64,
}

impl Repository {
    pub async fn connect(cfg: &DatabaseConfig) -> Result<Self, HarvestError> {
        let options = MySqlConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.database);
        let conn = options.connect().await?;
        info!("database connection established");
        Ok(Self { conn })
    }

    pub async fn close(self) -> Result<(), HarvestError> {
        self.conn.close().await?;
        info!("database connection closed");
        Ok(())
    }

    pub async fn run_migrations(&mut self) -> Result<(), HarvestError> {
        info!("running migrations…");
        for stmt in DDL {
            sqlx::query(stmt).execute(&mut self.conn).await?;
        }
        info!("migrations done");
        Ok(())
    }

    // ── Reference tables ──────────────────────────────────────────────────────

    pub async fn stock_index(&mut self) -> Result<HashMap<String, i64>, HarvestError> {
        let rows = sqlx::query("SELECT id, symbol FROM stock")
            .fetch_all(&mut self.conn)
            .await?;
        let mut index = HashMap::with_capacity(rows.len());
        for row in rows {
            index.insert(row.try_get::<String, _>("symbol")?, row.try_get::<i64, _>("id")?);
        }
        Ok(index)
    }

    pub async fn sector_index(&mut self) -> Result<HashMap<String, i64>, HarvestError> {
        let rows = sqlx::query("SELECT id, index_display_name FROM sector")
            .fetch_all(&mut self.conn)
            .await?;
        let mut index = HashMap::with_capacity(rows.len());
        for row in rows {
            index.insert(
                row.try_get::<String, _>("index_display_name")?,
                row.try_get::<i64, _>("id")?,
            );
        }
        Ok(index)
    }

    pub async fn stock_symbols(&mut self) -> Result<Vec<String>, HarvestError> {
        let rows = sqlx::query("SELECT symbol FROM stock ORDER BY symbol")
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("symbol").map_err(HarvestError::from))
            .collect()
    }

    // ── Keyed snapshots ───────────────────────────────────────────────────────

    pub async fn live_price_stock_ids(&mut self) -> Result<HashSet<i64>, HarvestError> {
        let rows = sqlx::query("SELECT stock_id FROM live_stock_prices")
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>("stock_id").map_err(HarvestError::from))
            .collect()
    }

    pub async fn eps_stock_ids(&mut self) -> Result<HashSet<i64>, HarvestError> {
        let rows = sqlx::query("SELECT stock_id FROM stock_eps_pe")
            .fetch_all(&mut self.conn)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<i64, _>("stock_id").map_err(HarvestError::from))
            .collect()
    }

    // ── Daily + live stock prices ─────────────────────────────────────────────

    pub async fn insert_daily_prices(
        &mut self,
        rows: &[LivePriceRecord],
    ) -> Result<usize, HarvestError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let now = kathmandu_now();
        let mut tx = self.conn.begin().await?;
        for r in rows {
            sqlx::query(
                r#"INSERT INTO daily_stock_prices
                   (stock_id, last_trading_price, point_changes, percentage_change,
                    open_price, high, low, volume, previous_close_price, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(r.stock_id)
            .bind(r.last_trading_price)
            .bind(r.point_change)
            .bind(r.percentage_change)
            .bind(r.open)
            .bind(r.high)
            .bind(r.low)
            .bind(r.volume)
            .bind(r.previous_close)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    /// Insert and update sets in one transaction; an error anywhere drops
    /// the transaction and rolls both back.
    pub async fn apply_live_prices(
        &mut self,
        batch: &UpsertBatch<LivePriceRecord>,
    ) -> Result<usize, HarvestError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let now = kathmandu_now();
        let mut tx = self.conn.begin().await?;

        for r in &batch.inserts {
            sqlx::query(
                r#"INSERT INTO live_stock_prices
                   (stock_id, last_trading_price, point_changes, percentage_change,
                    open_price, high, low, volume, previous_close_price, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(r.stock_id)
            .bind(r.last_trading_price)
            .bind(r.point_change)
            .bind(r.percentage_change)
            .bind(r.open)
            .bind(r.high)
            .bind(r.low)
            .bind(r.volume)
            .bind(r.previous_close)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for r in &batch.updates {
            sqlx::query(
                r#"UPDATE live_stock_prices SET
                   last_trading_price = ?, point_changes = ?, percentage_change = ?,
                   open_price = ?, high = ?, low = ?, volume = ?,
                   previous_close_price = ?, updated_at = ?
                   WHERE stock_id = ?"#,
            )
            .bind(r.last_trading_price)
            .bind(r.point_change)
            .bind(r.percentage_change)
            .bind(r.open)
            .bind(r.high)
            .bind(r.low)
            .bind(r.volume)
            .bind(r.previous_close)
            .bind(now)
            .bind(r.stock_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len())
    }

    // ── Indices ───────────────────────────────────────────────────────────────

    pub async fn upsert_indices(
        &mut self,
        rows: &[IndexQuoteRecord],
    ) -> Result<usize, HarvestError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let now = kathmandu_now();
        let mut tx = self.conn.begin().await?;
        for r in rows {
            sqlx::query(
                r#"INSERT INTO live_indices_price
                   (index_id, last_trading_price, percentage_change, turnover, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?)
                   ON DUPLICATE KEY UPDATE
                       last_trading_price = VALUES(last_trading_price),
                       percentage_change = VALUES(percentage_change),
                       turnover = VALUES(turnover),
                       updated_at = VALUES(updated_at)"#,
            )
            .bind(r.index_id)
            .bind(r.last_trading_price)
            .bind(r.percentage_change)
            .bind(r.turnover)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    // ── Live trading ticks ────────────────────────────────────────────────────

    pub async fn insert_trades(&mut self, rows: &[TradeRecord]) -> Result<usize, HarvestError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let now = kathmandu_now();
        let mut tx = self.conn.begin().await?;
        for r in rows {
            sqlx::query(
                r#"INSERT INTO live_trading
                   (stock_id, ltp, ltv, point_change, percentage_change, open, high, low,
                    avg_trading_price, volume, previous_closing, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(r.stock_id)
            .bind(r.ltp)
            .bind(r.ltv)
            .bind(r.point_change)
            .bind(r.percentage_change)
            .bind(r.open)
            .bind(r.high)
            .bind(r.low)
            .bind(r.avg_traded_price)
            .bind(r.volume)
            .bind(r.previous_closing)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    // ── Floorsheet ────────────────────────────────────────────────────────────

    pub async fn insert_floorsheet(
        &mut self,
        rows: &[FloorsheetRecord],
    ) -> Result<usize, HarvestError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let now = kathmandu_now();
        let mut tx = self.conn.begin().await?;
        for r in rows {
            sqlx::query(
                r#"INSERT INTO floorsheet
                   (stock_id, transaction_no, buyer_broker_id, sell_broker_id,
                    share_quantity, rate, amount, date, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(r.stock_id)
            .bind(&r.transaction_no)
            .bind(r.buyer_broker_id)
            .bind(r.sell_broker_id)
            .bind(r.share_quantity)
            .bind(r.rate)
            .bind(r.amount)
            .bind(r.date)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    // ── EPS / PE ──────────────────────────────────────────────────────────────

    pub async fn apply_eps(
        &mut self,
        batch: &UpsertBatch<EpsRecord>,
    ) -> Result<usize, HarvestError> {
        if batch.is_empty() {
            return Ok(0);
        }
        let now = kathmandu_now();
        let mut tx = self.conn.begin().await?;

        for r in &batch.inserts {
            sqlx::query(
                r#"INSERT INTO stock_eps_pe (stock_id, eps, pe_ratio, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(r.stock_id)
            .bind(r.eps)
            .bind(r.pe_ratio)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for r in &batch.updates {
            sqlx::query(
                r#"UPDATE stock_eps_pe SET eps = ?, pe_ratio = ?, updated_at = ?
                   WHERE stock_id = ?"#,
            )
            .bind(r.eps)
            .bind(r.pe_ratio)
            .bind(now)
            .bind(r.stock_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(batch.len())
    }

    // ── Dividend ──────────────────────────────────────────────────────────────

    pub async fn upsert_dividends(
        &mut self,
        rows: &[DividendRecord],
    ) -> Result<usize, HarvestError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let now = kathmandu_now();
        let mut tx = self.conn.begin().await?;
        for r in rows {
            sqlx::query(
                r#"INSERT INTO dividend
                   (stock_id, fiscal_year, cash_dividend, bonus_share, right_share, created_at, updated_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?)
                   ON DUPLICATE KEY UPDATE
                       cash_dividend = VALUES(cash_dividend),
                       bonus_share = VALUES(bonus_share),
                       right_share = VALUES(right_share),
                       updated_at = VALUES(updated_at)"#,
            )
            .bind(r.stock_id)
            .bind(&r.fiscal_year)
            .bind(r.cash_dividend)
            .bind(r.bonus_share)
            .bind(&r.right_share)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(rows.len())
    }

    // ── Announcements ─────────────────────────────────────────────────────────

    pub async fn announcement_exists(
        &mut self,
        record: &AnnouncementRecord,
    ) -> Result<bool, HarvestError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM announcements WHERE stock_id = ? AND date = ? AND announcement = ?",
        )
        .bind(record.stock_id)
        .bind(record.date)
        .bind(&record.announcement)
        .fetch_one(&mut self.conn)
        .await?;
        Ok(count > 0)
    }

    pub async fn insert_announcement(
        &mut self,
        record: &AnnouncementRecord,
    ) -> Result<(), HarvestError> {
        let now = kathmandu_now();
        sqlx::query(
            r#"INSERT INTO announcements
               (stock_id, date, announcement, should_notify, notify_time, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.stock_id)
        .bind(record.date)
        .bind(&record.announcement)
        .bind(record.should_notify)
        .bind(record.notify_time)
        .bind(now)
        .bind(now)
        .execute(&mut self.conn)
        .await?;
        Ok(())
    }

    // ── Application config ────────────────────────────────────────────────────

    pub async fn set_market_status(&mut self, is_live: bool) -> Result<(), HarvestError> {
        let now = kathmandu_now();
        sqlx::query(
            r#"INSERT INTO application_config (`key`, `value`, created_at, updated_at)
               VALUES ('market_status', ?, ?, ?)
               ON DUPLICATE KEY UPDATE
                   `value` = VALUES(`value`),
                   updated_at = VALUES(updated_at)"#,
        )
        .bind(if is_live { "1" } else { "0" })
        .bind(now)
        .bind(now)
        .execute(&mut self.conn)
        .await?;
        info!(
            "market status updated: {}",
            if is_live { "Live" } else { "Not Live" }
        );
        Ok(())
    }

    // ── Stats ─────────────────────────────────────────────────────────────────

    pub async fn stats(&mut self) -> Result<StoreStats, HarvestError> {
        Ok(StoreStats {
            stocks: self.count("SELECT COUNT(*) FROM stock").await?,
            daily_prices: self.count("SELECT COUNT(*) FROM daily_stock_prices").await?,
            live_trades: self.count("SELECT COUNT(*) FROM live_trading").await?,
            floorsheet_rows: self.count("SELECT COUNT(*) FROM floorsheet").await?,
            dividends: self.count("SELECT COUNT(*) FROM dividend").await?,
            eps_rows: self.count("SELECT COUNT(*) FROM stock_eps_pe").await?,
            announcements: self.count("SELECT COUNT(*) FROM announcements").await?,
        })
    }

    async fn count(&mut self, sql: &str) -> Result<i64, HarvestError> {
        Ok(sqlx::query_scalar(sql).fetch_one(&mut self.conn).await?)
    }
}
