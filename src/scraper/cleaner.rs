//! Deterministic field normalization.
//!
//! Every numeric cell goes through exactly one of these parsers before it is
//! loaded. The rules, per field class:
//!
//! - amounts/prices: thousands separators stripped; empty, `-`, `—`, `N/A`
//!   and `NaN` coerce to 0.0
//! - percentages: same, plus a trailing `%` stripped
//! - counts/ids: digits only, 0 on anything unparseable
//! - headers: canonicalized per source-table convention (see the
//!   `*_header` functions)

use chrono::{NaiveDate, NaiveDateTime};

// ── Numeric fields ────────────────────────────────────────────────────────────

fn is_blank(s: &str) -> bool {
    s.is_empty() || s == "-" || s == "—" || s.eq_ignore_ascii_case("n/a") || s.eq_ignore_ascii_case("nan")
}

/// Parse a price/amount cell. "1,234.56" → 1234.56, "" → 0.0
pub fn parse_amount(s: &str) -> f64 {
    let s = s.trim().replace(',', "");
    if is_blank(&s) {
        return 0.0;
    }
    s.parse().unwrap_or(0.0)
}

/// Parse a percentage cell. "10%" → 10.0, "-1.2 %" → -1.2, "" → 0.0
pub fn parse_pct(s: &str) -> f64 {
    let s = s.trim().trim_end_matches('%').trim().replace(',', "");
    if is_blank(&s) {
        return 0.0;
    }
    s.parse().unwrap_or(0.0)
}

/// Parse an integer cell (broker numbers, quantities). "58" → 58, "" → 0
pub fn parse_count(s: &str) -> i64 {
    let cleaned: String = s.chars().filter(|c| c.is_ascii_digit() || *c == '-').collect();
    cleaned.parse().unwrap_or(0)
}

// ── Dates ─────────────────────────────────────────────────────────────────────

pub fn parse_date_ymd(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// "2024-03-14 10:30:00" as served by the disclosures table.
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), "%Y-%m-%d %H:%M:%S").ok()
}

// ── Header canonicalization ───────────────────────────────────────────────────

/// Price-board style: lowercase, spaces and slashes removed, `%` spelled out.
/// "Point Change" → "pointchange", "Prev. Close" → "prev.close"
pub fn compact_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace('%', "percentage")
        .replace(' ', "")
        .replace('/', "")
}

/// Exchange-table style: lowercase snake case, `%` spelled out.
/// "Point Change" → "point_change"
pub fn snake_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace('%', "percentage")
        .replace(' ', "_")
}

/// Disclosure-table style: collapse any whitespace run to one underscore.
pub fn announcement_header(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Floorsheet columns carry trailing dots and unit suffixes; map them onto
/// the destination column names.
pub fn floorsheet_header(raw: &str) -> String {
    let h = raw
        .trim()
        .to_lowercase()
        .replace("(rs)", "")
        .trim()
        .replace(' ', "_");
    match h.as_str() {
        "contract_no." => "transaction_no".to_string(),
        "stock_symbol" => "symbol".to_string(),
        "buyer." => "buyer_broker_id".to_string(),
        "seller." => "sell_broker_id".to_string(),
        "quantity." => "share_quantity".to_string(),
        _ => h.trim_end_matches('_').to_string(),
    }
}

/// Dividend figures arrive as "10%" or empty; empty means no payout.
pub fn parse_dividend(s: &str) -> f64 {
    parse_pct(s)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1,234.56"), 1234.56);
        assert_eq!(parse_amount(" 610.00 "), 610.0);
        assert_eq!(parse_amount(""), 0.0);
        assert_eq!(parse_amount("-"), 0.0);
        assert_eq!(parse_amount("NaN"), 0.0);
        assert_eq!(parse_amount("12,345,678"), 12_345_678.0);
    }

    #[test]
    fn test_parse_pct() {
        assert_eq!(parse_pct("10%"), 10.0);
        assert_eq!(parse_pct("-1.25 %"), -1.25);
        assert_eq!(parse_pct(""), 0.0);
        assert_eq!(parse_pct("N/A"), 0.0);
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("58"), 58);
        assert_eq!(parse_count("1,200"), 1200);
        assert_eq!(parse_count(""), 0);
    }

    #[test]
    fn test_compact_header() {
        assert_eq!(compact_header("Point Change"), "pointchange");
        assert_eq!(compact_header("% Change"), "percentagechange");
        assert_eq!(compact_header("Prev. Close"), "prev.close");
        assert_eq!(compact_header("P/E Ratio"), "peratio");
    }

    #[test]
    fn test_snake_header() {
        assert_eq!(snake_header("Point Change"), "point_change");
        assert_eq!(snake_header("% Change"), "percentage_change");
        assert_eq!(snake_header("LTP"), "ltp");
    }

    #[test]
    fn test_floorsheet_header() {
        assert_eq!(floorsheet_header("Contract No."), "transaction_no");
        assert_eq!(floorsheet_header("Stock Symbol"), "symbol");
        assert_eq!(floorsheet_header("Buyer."), "buyer_broker_id");
        assert_eq!(floorsheet_header("Seller."), "sell_broker_id");
        assert_eq!(floorsheet_header("Quantity."), "share_quantity");
        assert_eq!(floorsheet_header("Rate (Rs)"), "rate");
        assert_eq!(floorsheet_header("Amount (Rs)"), "amount");
    }

    #[test]
    fn test_parse_dividend() {
        assert_eq!(parse_dividend("10%"), 10.0);
        assert_eq!(parse_dividend(""), 0.0);
        assert_eq!(parse_dividend("5.27%"), 5.27);
    }
}
