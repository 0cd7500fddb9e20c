use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::adapters::SourceAdapter;
use crate::classify::RuleSet;
use crate::columns::{map_columns, Field};
use crate::error::ScrapeError;
use crate::fetch::PageFetcher;
use crate::html::RawTable;
use crate::records::{build, PriceRecord};
use crate::sanitize::{sanitize, CanonicalRow};

/// Project every table onto the adapter's schema. Tables whose headers do
/// not map are skipped; if none map, the first mapping error is returned.
pub fn project_tables(
    adapter: &dyn SourceAdapter,
    tables: &[RawTable],
) -> Result<Vec<CanonicalRow>, ScrapeError> {
    let market = adapter.market().id;
    let mut rows = Vec::new();
    let mut mapped = 0;
    let mut first_err = None;

    for (i, table) in tables.iter().enumerate() {
        let names = table.column_names();
        match map_columns(&names, adapter.schema()) {
            Ok(mapping) => {
                mapped += 1;
                debug!(
                    market,
                    table = i,
                    product = mapping.raw_header(Field::Product, &names),
                    price_min = mapping.raw_header(Field::PriceMin, &names),
                    price_max = mapping.raw_header(Field::PriceMax, &names),
                    "Mapped columns"
                );
                rows.extend(
                    table
                        .rows
                        .iter()
                        .map(|row| mapping.project(row, adapter.fixed_unit())),
                );
            }
            Err(e) => {
                warn!(market, table = i, headers = ?table.headers, "{}", e);
                first_err.get_or_insert(e);
            }
        }
    }

    match first_err {
        Some(e) if mapped == 0 => Err(e.into()),
        _ => Ok(rows),
    }
}

/// One full scrape for a market: fetch, map, sanitize, classify, build.
pub async fn scrape_market(
    adapter: &dyn SourceAdapter,
    fetcher: &dyn PageFetcher,
    rules: &RuleSet,
    today: NaiveDate,
) -> Result<Vec<PriceRecord>, ScrapeError> {
    let market = adapter.market();
    let tables = adapter.fetch_tables(fetcher, today).await?;
    let raw = project_tables(adapter, &tables)?;
    let raw_count = raw.len();

    let clean = sanitize(raw);
    debug!(market = market.id, raw = raw_count, kept = clean.len(), "Sanitized rows");

    let records = build(&clean, rules, market, today, &adapter.source_tag());
    if records.is_empty() {
        return Err(ScrapeError::NoData(format!("{} yielded no price rows", market.name)));
    }
    info!(market = market.id, records = records.len(), "Scraped prices");
    Ok(records)
}
