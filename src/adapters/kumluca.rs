use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use super::{Market, SourceAdapter};
use crate::columns::{map_columns, Field, FieldSpec};
use crate::error::ScrapeError;
use crate::fetch::{fetch_with_retry, PageFetcher, RetryPolicy};
use crate::html::{self, RawTable};

pub const PAGE_URL: &str = "https://www.batiakdeniztv.com/kumluca-hal-fiyatlari/";

pub const MARKET: Market = Market {
    id: "kumluca_market",
    name: "Kumluca",
    slug: "kumluca",
};

const PRODUCT: &str = "Ürün Adı";
const PAIR_WIDTH: usize = 2;
const PRICE_MIN: &str = "En Düşük Fiyat (TL)";
const PRICE_MAX: &str = "En Yüksek Fiyat (TL)";

/// Headers of the first table on the page.
const LEAD_TABLE: &[FieldSpec] = &[
    FieldSpec::required(Field::Product, &["Ürünler", "Ürün Adı"]),
    FieldSpec::required(Field::PriceMin, &["Fiyat (₺/kg)", "Fiyat"]),
];

const SCHEMA: &[FieldSpec] = &[
    FieldSpec::required(Field::Product, &[PRODUCT]),
    FieldSpec::required(Field::PriceMin, &[PRICE_MIN]),
    FieldSpec::required(Field::PriceMax, &[PRICE_MAX]),
];

/// News page with one price per product split over several two-column
/// tables. Only the first has a real header row.
pub struct Kumluca {
    url: String,
    policy: RetryPolicy,
}

impl Default for Kumluca {
    fn default() -> Self {
        Kumluca::new(PAGE_URL, RetryPolicy::fixed())
    }
}

impl Kumluca {
    pub fn new(url: &str, policy: RetryPolicy) -> Self {
        Kumluca {
            url: url.to_string(),
            policy,
        }
    }
}

#[async_trait]
impl SourceAdapter for Kumluca {
    fn market(&self) -> &Market {
        &MARKET
    }

    fn schema(&self) -> &'static [FieldSpec] {
        SCHEMA
    }

    fn fixed_unit(&self) -> Option<&'static str> {
        Some("KG")
    }

    async fn fetch_tables(
        &self,
        fetcher: &dyn PageFetcher,
        _today: NaiveDate,
    ) -> Result<Vec<RawTable>, ScrapeError> {
        let page = fetch_with_retry(fetcher, &self.url, &self.policy).await?;
        let tables = html::parse_tables(&page);
        let pairs = stitch_tables(&tables)?;
        info!(market = MARKET.id, tables = tables.len(), rows = pairs.len(), "Stitched price tables");

        let rows = pairs
            .into_iter()
            .map(|(name, price)| vec![name, price.clone(), price])
            .collect();
        let headers = vec![PRODUCT.to_string(), PRICE_MIN.to_string(), PRICE_MAX.to_string()];
        Ok(vec![RawTable::new(headers, rows)])
    }
}

fn pair(row: &[String], name: usize, price: usize) -> (String, String) {
    let cell = |i: usize| row.get(i).cloned().unwrap_or_default();
    (cell(name), cell(price))
}

/// Concatenate (name, price) pairs across all tables in page order.
///
/// Table 0 is read through its headers, falling back to its first two
/// columns. Every later table is headerless: its header row is data and is
/// put back in front of its rows. Later tables that are not exactly two
/// columns wide are page furniture and are skipped.
pub fn stitch_tables(tables: &[RawTable]) -> Result<Vec<(String, String)>, ScrapeError> {
    let (lead, rest) = tables
        .split_first()
        .ok_or_else(|| ScrapeError::TableNotFound("Kumluca price table".to_string()))?;

    let (name_col, price_col) = match map_columns(&lead.column_names(), LEAD_TABLE) {
        Ok(m) => (
            m.index(Field::Product).unwrap_or(0),
            m.index(Field::PriceMin).unwrap_or(1),
        ),
        Err(e) => {
            warn!(market = MARKET.id, "{}, using first two columns", e);
            (0, 1)
        }
    };

    let mut pairs: Vec<(String, String)> = lead
        .rows
        .iter()
        .map(|row| pair(row, name_col, price_col))
        .collect();

    for (i, table) in rest.iter().enumerate() {
        if table.width() != PAIR_WIDTH {
            warn!(
                market = MARKET.id,
                table = i + 1,
                width = table.width(),
                "Skipping table that is not a name/price pair"
            );
            continue;
        }
        pairs.push(pair(&table.headers, 0, 1));
        pairs.extend(table.rows.iter().map(|row| pair(row, 0, 1)));
    }
    Ok(pairs)
}
