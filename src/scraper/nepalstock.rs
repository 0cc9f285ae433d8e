//! Exchange-site adapters: the live-market tick table, the paginated
//! floorsheet, and the corporate disclosures page with its per-row modal.

use crate::browser::{self, Session};
use crate::config::RetryPolicy;
use crate::models::RawRecord;
use crate::scraper::cleaner::{announcement_header, floorsheet_header, snake_header};
use crate::scraper::{parsers, ScrapeAdapter};
use crate::utils::kathmandu_now;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::Retry;
use tracing::{info, warn};

const LIVE_MARKET_URL: &str = "https://www.nepalstock.com.np/live-market";
const FLOORSHEET_URL: &str = "https://www.nepalstock.com.np/floor-sheet";
const DISCLOSURES_URL: &str = "https://www.nepalstock.com.np/corporatedisclosures";

// ── Live market table ─────────────────────────────────────────────────────────

const MARKET_TABLE: &str = "app-live-market table";
const MARKET_THEAD: &str = "app-live-market table thead";
const MARKET_TBODY: &str = "app-live-market table tbody";

/// Body rows disappear when the market closes; the shortened body wait
/// doubles as the closed-market signal.
const TBODY_WAIT: Duration = Duration::from_secs(30);

pub struct LiveMarketTable;

#[async_trait]
impl ScrapeAdapter for LiveMarketTable {
    fn name(&self) -> &'static str {
        "live-market"
    }

    async fn extract(&self, session: &Session) -> Result<Vec<RawRecord>> {
        let page = session.open_page(LIVE_MARKET_URL).await?;
        session.wait_for_element(&page, MARKET_THEAD).await?;

        if browser::wait_for_element(&page, MARKET_TBODY, TBODY_WAIT)
            .await
            .is_err()
        {
            warn!("no data found, market closed or page expired");
            return Ok(Vec::new());
        }

        let html = page.content().await?;
        let records = parsers::table_records(&html, MARKET_TABLE, true, snake_header)?;
        info!("live market: {} rows extracted", records.len());
        Ok(records)
    }
}

// ── Floorsheet ────────────────────────────────────────────────────────────────

const SHEET_TABLE: &str = "app-floor-sheet table";
const SHEET_THEAD: &str = "app-floor-sheet table thead";
const PAGE_SIZE_SELECT: &str = "app-floor-sheet div.box__filter select";
const FILTER_BUTTON: &str = "app-floor-sheet div.box__filter button";
const NEXT_PAGE_ITEM: &str = "app-floor-sheet pagination-template ul li.pagination-next";
const NEXT_PAGE_LINK: &str = "app-floor-sheet pagination-template ul li.pagination-next a";

const PAGE_SETTLE: Duration = Duration::from_secs(2);

/// Whole-day floorsheet: selects 500 rows per page and walks the pager to
/// the end, stamping every row with the trading date.
pub struct FloorsheetSheet;

#[async_trait]
impl ScrapeAdapter for FloorsheetSheet {
    fn name(&self) -> &'static str {
        "floorsheet"
    }

    async fn extract(&self, session: &Session) -> Result<Vec<RawRecord>> {
        let page = session.open_page(FLOORSHEET_URL).await?;
        session.wait_for_element(&page, SHEET_THEAD).await?;

        // 500 entries per page, then apply the filter.
        session.wait_for_element(&page, PAGE_SIZE_SELECT).await?;
        page.evaluate(format!(
            "(() => {{ const el = document.querySelector({:?}); \
             if (el) {{ el.value = '500'; el.dispatchEvent(new Event('change')); }} }})()",
            PAGE_SIZE_SELECT
        ))
        .await?;
        sleep(PAGE_SETTLE).await;

        let filter = session.wait_for_element(&page, FILTER_BUTTON).await?;
        filter.click().await?;
        sleep(PAGE_SETTLE).await;

        let date = kathmandu_now().date().format("%Y-%m-%d").to_string();
        let mut headers: Vec<String> = Vec::new();
        let mut all = Vec::new();
        let mut page_num = 1u32;

        loop {
            let html = page.content().await?;
            if headers.is_empty() {
                headers = parsers::table_headers(&html, SHEET_TABLE, true, floorsheet_header)?;
                info!("floorsheet headers: {:?}", headers);
            }

            let rows = parsers::table_rows(&html, SHEET_TABLE, true)?;
            info!("floorsheet page {}: {} rows", page_num, rows.len());
            for cells in &rows {
                let mut record = RawRecord::from_row(&headers, cells);
                record.push("date", date.clone());
                all.push(record);
            }

            // The pager's next item goes disabled on the last page.
            match parsers::first_class(&html, NEXT_PAGE_ITEM)? {
                Some(class) if !class.contains("disabled") => {
                    let next = page.find_element(NEXT_PAGE_LINK).await?;
                    next.click().await?;
                    sleep(PAGE_SETTLE).await;
                    page_num += 1;
                }
                _ => {
                    info!("reached the last floorsheet page");
                    break;
                }
            }
        }

        info!("floorsheet: {} rows extracted in total", all.len());
        Ok(all)
    }
}

// ── Corporate disclosures ─────────────────────────────────────────────────────

const NEWS_TABLE: &str = "app-company-news table";
const NEWS_THEAD: &str = "app-company-news table thead tr";
const MODAL_TEXT: &str = "#fileView div.modal-body span:nth-of-type(2)";
const MODAL_CLOSE: &str = "#fileView div.modal-header button";

const MODAL_WAIT: Duration = Duration::from_secs(5);
const ROW_PAUSE: Duration = Duration::from_secs(1);

/// Disclosure rows plus the announcement body behind each row's file modal.
/// Falls back to the row title when the modal will not open.
pub struct DisclosureTable {
    nav_retry: RetryPolicy,
}

impl DisclosureTable {
    pub fn new(nav_retry: RetryPolicy) -> Self {
        Self { nav_retry }
    }
}

#[async_trait]
impl ScrapeAdapter for DisclosureTable {
    fn name(&self) -> &'static str {
        "announcements"
    }

    async fn extract(&self, session: &Session) -> Result<Vec<RawRecord>> {
        let strategy = FixedInterval::from_millis(self.nav_retry.delay().as_millis() as u64)
            .take(self.nav_retry.attempts.saturating_sub(1) as usize);
        let page = Retry::spawn(strategy, || session.open_page(DISCLOSURES_URL)).await?;
        session.wait_for_element(&page, NEWS_THEAD).await?;

        let html = page.content().await?;
        // Serial column dropped, four data columns kept; the body text is
        // appended per row below.
        let mut headers = parsers::table_headers(&html, NEWS_TABLE, true, announcement_header)?;
        headers.truncate(4);
        info!("disclosure headers: {:?}", headers);

        let rows = parsers::table_rows(&html, NEWS_TABLE, true)?;
        let mut records = Vec::new();

        for (i, cells) in rows.iter().enumerate() {
            let mut cells = cells.clone();
            cells.truncate(4);
            let mut record = RawRecord::from_row(&headers, &cells);

            let body = self.open_modal(&page, i + 1).await;
            let announcement = match body {
                Some(text) if !text.is_empty() => text,
                _ => record.get("title").unwrap_or_default().to_string(),
            };
            record.push("announcement", announcement);
            records.push(record);

            sleep(ROW_PAUSE).await;
        }

        info!("disclosures: {} rows extracted", records.len());
        Ok(records)
    }
}

impl DisclosureTable {
    async fn open_modal(&self, page: &chromiumoxide::Page, row: usize) -> Option<String> {
        let link_sel = format!("{} tbody tr:nth-child({}) td.filename a", NEWS_TABLE, row);
        let link = page.find_element(&link_sel).await.ok()?;
        link.click().await.ok()?;

        let text = match browser::wait_for_element(page, MODAL_TEXT, MODAL_WAIT).await {
            Ok(el) => el.inner_text().await.ok().flatten(),
            Err(e) => {
                warn!("announcement modal for row {} did not open: {}", row, e);
                None
            }
        };

        if let Ok(close) = page.find_element(MODAL_CLOSE).await {
            let _ = close.click().await;
        }
        text.map(|t| t.trim().to_string())
    }
}
