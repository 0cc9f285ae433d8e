//! merolagani.com adapter: per-symbol dividend history behind the company
//! detail page's dividend tab, paginated.

use crate::browser::{self, Session};
use crate::models::RawRecord;
use crate::scraper::cleaner::snake_header;
use crate::scraper::ScrapeAdapter;
use anyhow::Result;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const DETAIL_URL: &str = "https://merolagani.com/CompanyDetail.aspx?symbol=";

const DIVIDEND_TAB: &str = "#ctl00_ContentPlaceHolder1_CompanyDetail1_lnkDividendTab";
const DIVIDEND_PANEL: &str = "#ctl00_ContentPlaceHolder1_CompanyDetail1_divDividendData";
const NEXT_PAGE_LINK: &str =
    "#ctl00_ContentPlaceHolder1_CompanyDetail1_divDividendData a[title=\"Next Page\"]";

const TAB_SETTLE: Duration = Duration::from_secs(2);
const TABLE_SETTLE: Duration = Duration::from_secs(4);
const PAGE_SETTLE: Duration = Duration::from_secs(10);

/// Dividend history for one symbol. Symbols without a dividend tab resolve
/// to an empty extraction, not an error.
pub struct DividendHistory {
    symbol: String,
}

impl DividendHistory {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
        }
    }
}

#[async_trait]
impl ScrapeAdapter for DividendHistory {
    fn name(&self) -> &'static str {
        "dividend"
    }

    async fn extract(&self, session: &Session) -> Result<Vec<RawRecord>> {
        let url = format!("{}{}", DETAIL_URL, self.symbol);
        let page = session.open_page(&url).await?;

        let tab = session.wait_for_element(&page, DIVIDEND_TAB).await?;
        tab.click().await?;
        sleep(TAB_SETTLE).await;

        // Many symbols simply have no dividend history.
        if browser::wait_for_element(&page, &format!("{} table tbody tr", DIVIDEND_PANEL),
            Duration::from_secs(30))
        .await
        .is_err()
        {
            warn!("no dividend table for {}", self.symbol);
            return Ok(Vec::new());
        }
        sleep(TABLE_SETTLE).await;

        let mut headers: Vec<String> = Vec::new();
        let mut records = Vec::new();
        let mut page_num = 1u32;

        loop {
            info!("dividend {}: processing page {}", self.symbol, page_num);
            let html = page.content().await?;
            let (page_headers, rows) = parse_dividend_table(&html)?;
            if headers.is_empty() {
                headers = page_headers;
            }

            for cells in &rows {
                let mut record = RawRecord::new();
                record.push("symbol", self.symbol.clone());
                for (h, c) in headers.iter().zip(cells.iter()) {
                    record.push(h.clone(), c.clone());
                }
                records.push(record);
            }

            match page.find_element(NEXT_PAGE_LINK).await {
                Ok(next) => {
                    next.click().await?;
                    sleep(PAGE_SETTLE).await;
                    page_num += 1;
                }
                Err(_) => {
                    info!("no more dividend pages for {}", self.symbol);
                    break;
                }
            }
        }

        info!("dividend {}: {} rows extracted", self.symbol, records.len());
        Ok(records)
    }
}

/// The dividend table keeps its header cells in the first body row; the
/// leading cell of every row is a serial number.
fn parse_dividend_table(html: &str) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let doc = Html::parse_document(html);
    let tr_sel = Selector::parse(&format!("{} table tbody tr", DIVIDEND_PANEL))
        .map_err(|e| anyhow::anyhow!("row selector: {:?}", e))?;
    let th_sel = Selector::parse("th").map_err(|e| anyhow::anyhow!("th selector: {:?}", e))?;
    let td_sel = Selector::parse("td").map_err(|e| anyhow::anyhow!("td selector: {:?}", e))?;

    let mut headers = Vec::new();
    let mut rows = Vec::new();

    for tr in doc.select(&tr_sel) {
        let ths: Vec<String> = tr
            .select(&th_sel)
            .skip(1)
            .map(|th| snake_header(&th.text().collect::<String>()))
            .collect();
        if !ths.is_empty() {
            if headers.is_empty() {
                headers = ths;
            }
            continue;
        }

        let cells: Vec<String> = tr
            .select(&td_sel)
            .skip(1)
            .map(|td| td.text().collect::<String>().trim().to_string())
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }

    Ok((headers, rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
        <div id="ctl00_ContentPlaceHolder1_CompanyDetail1_divDividendData">
          <div><table><tbody>
            <tr><th>#</th><th>Fiscal Year</th><th>Cash Dividend</th><th>Bonus Share</th><th>Right Share</th></tr>
            <tr><td>1</td><td>2080/2081</td><td>10%</td><td></td><td></td></tr>
            <tr><td>2</td><td>2079/2080</td><td>5.26%</td><td>10%</td><td></td></tr>
          </tbody></table></div>
        </div>
    "#;

    #[test]
    fn splits_header_row_from_data_rows() {
        let (headers, rows) = parse_dividend_table(FIXTURE).unwrap();
        assert_eq!(
            headers,
            vec!["fiscal_year", "cash_dividend", "bonus_share", "right_share"]
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["2080/2081", "10%", "", ""]);
    }
}
