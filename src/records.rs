use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::adapters::Market;
use crate::classify::RuleSet;
use crate::sanitize::CanonicalRow;

pub const DEFAULT_UNIT: &str = "KG";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub market_id: String,
    pub market_name: String,
    pub product: String,
    pub category: String,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub unit: String,
    pub date_scraped: String,
    pub source_file: String,
    pub inserted_at: i64,
}

/// Parse a sanitized price cell. Anything that is not a finite number is null.
pub fn parse_price(cell: Option<&str>) -> Option<f64> {
    cell?.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Turn sanitized rows into records for one market and day.
pub fn build(
    rows: &[CanonicalRow],
    rules: &RuleSet,
    market: &Market,
    date: NaiveDate,
    source_file: &str,
) -> Vec<PriceRecord> {
    let date_scraped = format_date(date);
    let inserted_at = Utc::now().timestamp();

    rows.iter()
        .filter_map(|row| {
            let product = row.product.as_deref()?.trim();
            if product.is_empty() {
                return None;
            }
            Some(PriceRecord {
                market_id: market.id.to_string(),
                market_name: market.name.to_string(),
                product: product.to_string(),
                category: rules.classify(product),
                price_min: parse_price(row.price_min.as_deref()),
                price_max: parse_price(row.price_max.as_deref()),
                unit: row
                    .unit
                    .clone()
                    .unwrap_or_else(|| DEFAULT_UNIT.to_string()),
                date_scraped: date_scraped.clone(),
                source_file: source_file.to_string(),
                inserted_at,
            })
        })
        .collect()
}
