//! sharesansar.com adapters: the live price board and the sector index
//! carousel, both served from the live-trading page.

use crate::browser::Session;
use crate::models::RawRecord;
use crate::scraper::cleaner::compact_header;
use crate::scraper::{parsers, ScrapeAdapter};
use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

const LIVE_URL: &str = "https://www.sharesansar.com/live-trading";

const PRICE_TABLE: &str = "#headFixed";
const PRICE_HEADER_CELL: &str = "#headFixed thead tr th";
const CAROUSEL: &str = ".bx-viewport";
const INDEX_CARD: &str = "div.mu-list";

/// Index cards worth keeping; the carousel also renders decorative panels.
const INDEX_NAMES: [&str; 17] = [
    "NEPSE Index",
    "Non Life Insurance",
    "Others Index",
    "Sensitive Float Inde.",
    "Sensitive Index",
    "Trading Index",
    "Banking SubIndex",
    "Development Bank Ind.",
    "Finance Index",
    "Float Index",
    "Hotels And Tourism",
    "HydroPower Index",
    "Investment",
    "Life Insurance",
    "Manufacturing And Pr.",
    "Microfinance Index",
    "Mutual Fund",
];

// ── Live price board ──────────────────────────────────────────────────────────

/// Whole-board snapshot: one record per listed symbol, keyed by the board's
/// own (canonicalized) column headers.
pub struct LivePriceBoard;

#[async_trait]
impl ScrapeAdapter for LivePriceBoard {
    fn name(&self) -> &'static str {
        "live-price-board"
    }

    async fn extract(&self, session: &Session) -> Result<Vec<RawRecord>> {
        let page = session.open_page(LIVE_URL).await?;
        session.wait_for_element(&page, PRICE_HEADER_CELL).await?;

        let html = page.content().await?;
        let records = parsers::table_records(&html, PRICE_TABLE, false, compact_header)?;
        info!("price board: {} rows extracted", records.len());
        Ok(records)
    }
}

// ── Sector index carousel ─────────────────────────────────────────────────────

/// One record per known index card: index_name, turnover,
/// last_trading_index, percentage_change.
pub struct IndexBoard;

#[async_trait]
impl ScrapeAdapter for IndexBoard {
    fn name(&self) -> &'static str {
        "index-board"
    }

    async fn extract(&self, session: &Session) -> Result<Vec<RawRecord>> {
        let page = session.open_page(LIVE_URL).await?;
        session.wait_for_element(&page, CAROUSEL).await?;

        let html = page.content().await?;
        let records = parse_index_cards(&html)?;
        info!("index carousel: {} cards extracted", records.len());
        Ok(records)
    }
}

/// All carousel cards live in the DOM whether or not they are scrolled into
/// view, so one snapshot covers the full set.
fn parse_index_cards(html: &str) -> Result<Vec<RawRecord>> {
    let doc = Html::parse_document(html);
    let card_sel = Selector::parse(INDEX_CARD)
        .map_err(|e| anyhow::anyhow!("card selector: {:?}", e))?;
    let name_sel = Selector::parse("h4").map_err(|e| anyhow::anyhow!("name selector: {:?}", e))?;
    let turnover_sel =
        Selector::parse("p.mu-price").map_err(|e| anyhow::anyhow!("turnover selector: {:?}", e))?;
    let value_sel =
        Selector::parse("span.mu-value").map_err(|e| anyhow::anyhow!("value selector: {:?}", e))?;
    let pct_sel = Selector::parse("span.mu-percent")
        .map_err(|e| anyhow::anyhow!("percent selector: {:?}", e))?;

    let mut records = Vec::new();
    for card in doc.select(&card_sel) {
        let Some(name) = card
            .select(&name_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
        else {
            continue;
        };
        if !INDEX_NAMES.contains(&name.as_str()) {
            debug!("skipping unknown carousel card: {}", name);
            continue;
        }

        let text_of = |sel: &Selector| {
            card.select(sel)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .unwrap_or_default()
        };

        let turnover = text_of(&turnover_sel);
        let value = text_of(&value_sel);
        // The percent span carries trailing arrow glyphs after the number.
        let percent = text_of(&pct_sel)
            .split('%')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();

        if value.is_empty() {
            warn!("index card {} had no value, skipping", name);
            continue;
        }

        let mut record = RawRecord::new();
        record.push("index_name", name);
        record.push("turnover", turnover);
        record.push("last_trading_index", value);
        record.push("percentage_change", percent);
        records.push(record);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARD_FIXTURE: &str = r#"
        <div class="bx-viewport">
          <div class="mu-list">
            <h4>NEPSE Index</h4>
            <p class="mu-price">9,200,150.2</p>
            <p><span class="mu-value">2,141.93</span> <span class="mu-percent">1.27% ↑</span></p>
          </div>
          <div class="mu-list">
            <h4>Some Banner</h4>
            <p class="mu-price"></p>
          </div>
          <div class="mu-list">
            <h4>Finance Index</h4>
            <p class="mu-price">88,100</p>
            <p><span class="mu-value">2,040.11</span> <span class="mu-percent">-0.42%</span></p>
          </div>
        </div>
    "#;

    #[test]
    fn parses_known_cards_and_skips_banners() {
        let records = parse_index_cards(CARD_FIXTURE).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("index_name"), Some("NEPSE Index"));
        assert_eq!(records[0].get("last_trading_index"), Some("2,141.93"));
        assert_eq!(records[0].get("percentage_change"), Some("1.27"));
        assert_eq!(records[1].get("index_name"), Some("Finance Index"));
        assert_eq!(records[1].get("percentage_change"), Some("-0.42"));
    }
}
