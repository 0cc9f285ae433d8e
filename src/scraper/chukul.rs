//! chukul.com adapter: the stock-filter table, widened to its largest page
//! size through the Quasar dropdown, reduced to symbol/EPS/PE columns.

use crate::browser::Session;
use crate::models::RawRecord;
use crate::scraper::{parsers, ScrapeAdapter};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const FILTER_URL: &str = "https://chukul.com/stock-filter";

const TABLE: &str = "table";
const TABLE_HEAD: &str = "table thead tr";
const TABLE_BODY: &str = "table tbody tr";
const PAGE_SIZE_ICON: &str = ".q-select__dropdown-icon";
const DROPDOWN_ITEM: &str = ".q-virtual-scroll__content .q-item__label";

const SETTLE: Duration = Duration::from_secs(5);

const WANTED: [(&str, &str); 3] = [
    ("Symbol", "symbol"),
    ("EPS", "eps"),
    ("P/E Ratio", "pe_ratio"),
];

pub struct StockFilterTable;

#[async_trait]
impl ScrapeAdapter for StockFilterTable {
    fn name(&self) -> &'static str {
        "eps"
    }

    async fn extract(&self, session: &Session) -> Result<Vec<RawRecord>> {
        let page = session.open_page(FILTER_URL).await?;
        session.wait_for_element(&page, TABLE_HEAD).await?;
        session.wait_for_element(&page, TABLE_BODY).await?;

        // Widen pagination to the last (largest) dropdown entry so the
        // whole universe lands on one page.
        let dropdown = session.wait_for_element(&page, PAGE_SIZE_ICON).await?;
        sleep(SETTLE).await;
        dropdown.click().await?;
        sleep(Duration::from_secs(1)).await;

        let options = page.find_elements(DROPDOWN_ITEM).await?;
        match options.into_iter().last() {
            Some(widest) => {
                widest.click().await?;
                sleep(SETTLE).await;
            }
            None => warn!("page-size dropdown had no entries, keeping default"),
        }

        let html = page.content().await?;
        // Header cells carry the sort-icon ligature text.
        let headers = parsers::table_headers(&html, TABLE, false, |h| {
            h.replace("arrow_upward", "").trim().to_string()
        })?;
        let rows = parsers::table_rows(&html, TABLE, false)?;

        let mut indices = Vec::with_capacity(WANTED.len());
        for (label, _) in WANTED {
            match headers.iter().position(|h| h == label) {
                Some(idx) => indices.push(idx),
                None => anyhow::bail!("stock-filter table is missing the {:?} column", label),
            }
        }

        let mut records = Vec::new();
        for cells in &rows {
            let mut record = RawRecord::new();
            for ((_, key), idx) in WANTED.iter().zip(&indices) {
                record.push(*key, cells.get(*idx).cloned().unwrap_or_default());
            }
            records.push(record);
        }

        info!("stock filter: {} rows extracted", records.len());
        Ok(records)
    }
}
