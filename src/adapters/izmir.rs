use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use super::{Market, SourceAdapter};
use crate::columns::{Field, FieldSpec};
use crate::error::ScrapeError;
use crate::fetch::{fetch_with_retry, PageFetcher, RetryPolicy};
use crate::html::{self, RawTable};
use crate::records::format_date;

pub const BASE_URL: &str = "https://eislem.izmir.bel.tr/tr/HalFiyatlari/20";

pub const MARKET: Market = Market {
    id: "izmir_market",
    name: "İzmir",
    slug: "izmir",
};

const SCHEMA: &[FieldSpec] = &[
    FieldSpec::required(Field::Product, &["Adı", "Mal Adı", "Ürün Adı"]),
    FieldSpec::optional(Field::Unit, &["Birimi", "Birim"]),
    FieldSpec::required(Field::PriceMin, &["En Az", "En Az Fiyat", "En Düşük Fiyat (TL)"]),
    FieldSpec::required(Field::PriceMax, &["En Çok", "En Çok Fiyat", "En Yüksek Fiyat (TL)"]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProduceKind {
    Vegetable,
    Fruit,
}

impl ProduceKind {
    pub const ALL: [ProduceKind; 2] = [ProduceKind::Vegetable, ProduceKind::Fruit];

    /// Value of the `tip` query parameter.
    pub fn code(self) -> u8 {
        match self {
            ProduceKind::Vegetable => 1,
            ProduceKind::Fruit => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ProduceKind::Vegetable => "Sebze",
            ProduceKind::Fruit => "Meyve",
        }
    }
}

pub fn listing_url(base: &str, date: NaiveDate, kind: ProduceKind) -> String {
    format!(
        "{}?date={}&tip={}&aranacak=",
        base,
        format_date(date),
        kind.code()
    )
}

/// Metropolitan price service: one page per produce kind and day.
pub struct Izmir {
    base_url: String,
    policy: RetryPolicy,
}

impl Default for Izmir {
    fn default() -> Self {
        Izmir::new(BASE_URL, RetryPolicy::fixed())
    }
}

impl Izmir {
    pub fn new(base_url: &str, policy: RetryPolicy) -> Self {
        Izmir {
            base_url: base_url.to_string(),
            policy,
        }
    }

    async fn fetch_kind(
        &self,
        fetcher: &dyn PageFetcher,
        today: NaiveDate,
        kind: ProduceKind,
    ) -> Result<RawTable, ScrapeError> {
        let url = listing_url(&self.base_url, today, kind);
        let page = fetch_with_retry(fetcher, &url, &self.policy).await?;
        html::parse_tables(&page)
            .into_iter()
            .next()
            .ok_or_else(|| ScrapeError::TableNotFound(format!("{} table", kind.label())))
    }
}

#[async_trait]
impl SourceAdapter for Izmir {
    fn market(&self) -> &Market {
        &MARKET
    }

    fn schema(&self) -> &'static [FieldSpec] {
        SCHEMA
    }

    /// Both kinds are tried; the run fails only when neither yields a table.
    async fn fetch_tables(
        &self,
        fetcher: &dyn PageFetcher,
        today: NaiveDate,
    ) -> Result<Vec<RawTable>, ScrapeError> {
        let mut tables = Vec::new();
        let mut last_err = None;

        for kind in ProduceKind::ALL {
            match self.fetch_kind(fetcher, today, kind).await {
                Ok(table) => {
                    info!(market = MARKET.id, kind = kind.label(), rows = table.rows.len(), "Fetched table");
                    tables.push(table);
                }
                Err(e) => {
                    warn!(market = MARKET.id, kind = kind.label(), "Skipping: {}", e);
                    last_err = Some(e);
                }
            }
        }

        match (tables.is_empty(), last_err) {
            (false, _) => Ok(tables),
            (true, Some(e)) => Err(e),
            (true, None) => Err(ScrapeError::NoData(format!("{} returned no tables", MARKET.name))),
        }
    }
}
