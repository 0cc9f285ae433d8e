//! Sync HTML-table extraction over rendered-DOM snapshots.
//!
//! Adapters drive the page (navigation, clicks, pagination) and then hand
//! the snapshot string to these parsers; no `Html` value ever crosses an
//! await point.

use crate::models::RawRecord;
use anyhow::Result;
use scraper::{Html, Selector};

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {:?}: {:?}", css, e))
}

/// Header cells of `<table_css> thead tr th`, canonicalized by `canon`.
/// `skip_first` drops a leading serial-number column.
pub fn table_headers(
    html: &str,
    table_css: &str,
    skip_first: bool,
    canon: impl Fn(&str) -> String,
) -> Result<Vec<String>> {
    let doc = Html::parse_document(html);
    let th_sel = selector(&format!("{} thead tr th", table_css))?;

    let skip = usize::from(skip_first);
    Ok(doc
        .select(&th_sel)
        .skip(skip)
        .map(|th| canon(&th.text().collect::<String>()))
        .collect())
}

/// Body rows of `<table_css> tbody tr` as trimmed cell texts.
pub fn table_rows(html: &str, table_css: &str, skip_first: bool) -> Result<Vec<Vec<String>>> {
    let doc = Html::parse_document(html);
    let tr_sel = selector(&format!("{} tbody tr", table_css))?;
    let td_sel = selector("td")?;

    let skip = usize::from(skip_first);
    let mut rows = Vec::new();
    for tr in doc.select(&tr_sel) {
        let cells: Vec<String> = tr
            .select(&td_sel)
            .skip(skip)
            .map(|td| td.text().collect::<String>().trim().to_string())
            .collect();
        if !cells.is_empty() {
            rows.push(cells);
        }
    }
    Ok(rows)
}

/// Headers + rows zipped into records in one pass.
pub fn table_records(
    html: &str,
    table_css: &str,
    skip_first: bool,
    canon: impl Fn(&str) -> String,
) -> Result<Vec<RawRecord>> {
    let headers = table_headers(html, table_css, skip_first, canon)?;
    let rows = table_rows(html, table_css, skip_first)?;
    Ok(rows
        .iter()
        .map(|cells| RawRecord::from_row(&headers, cells))
        .collect())
}

/// Class attribute of the first element matching `css`.
pub fn first_class(html: &str, css: &str) -> Result<Option<String>> {
    let doc = Html::parse_document(html);
    let sel = selector(css)?;
    Ok(doc
        .select(&sel)
        .next()
        .and_then(|el| el.value().attr("class"))
        .map(|c| c.to_string()))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::cleaner::snake_header;

    const FIXTURE: &str = r#"
        <table id="board">
          <thead><tr><th>SN</th><th>Symbol</th><th>LTP</th><th>% Change</th></tr></thead>
          <tbody>
            <tr><td>1</td><td>ABC</td><td>1,020.5</td><td>-1.2</td></tr>
            <tr><td>2</td><td>XYZ</td><td>310</td><td>0.8</td></tr>
          </tbody>
        </table>
    "#;

    #[test]
    fn test_table_headers_skips_serial_column() {
        let headers = table_headers(FIXTURE, "#board", true, snake_header).unwrap();
        assert_eq!(headers, vec!["symbol", "ltp", "percentage_change"]);
    }

    #[test]
    fn test_table_records() {
        let records = table_records(FIXTURE, "#board", true, snake_header).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("symbol"), Some("ABC"));
        assert_eq!(records[0].get("ltp"), Some("1,020.5"));
        assert_eq!(records[1].get("percentage_change"), Some("0.8"));
    }

    #[test]
    fn test_first_class_missing() {
        assert_eq!(first_class(FIXTURE, "#nope").unwrap(), None);
    }
}
