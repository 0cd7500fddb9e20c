use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::NaiveDate;
use regex::Regex;
use tracing::{info, warn};

use super::{Market, SourceAdapter};
use crate::columns::{Field, FieldSpec};
use crate::error::ScrapeError;
use crate::fetch::{fetch_with_retry, PageFetcher, RetryPolicy};
use crate::html::{self, Anchor, RawTable};
use crate::normalize::normalize;

pub const LISTING_URL: &str = "https://gazipasa.bel.tr/gunluk-hal-fiyatlari";
pub const BASE_DOMAIN: &str = "https://gazipasa.bel.tr";

const FINGERPRINT: &str = "toptancı hal müdürlüğü";
const HEADER_MARKER: &str = "ÜRÜN ADI";

pub const MARKET: Market = Market {
    id: "gazipasa_market",
    name: "Gazipaşa",
    slug: "gazipasa",
};

const SCHEMA: &[FieldSpec] = &[
    FieldSpec::required(Field::Product, &["ÜRÜN ADI"]),
    FieldSpec::required(Field::Unit, &["BİRİMİ (KG)"]),
    FieldSpec::required(Field::PriceMin, &["FİYAT (TL)"]),
    FieldSpec::required(Field::PriceMax, &["FİYAT (TL).1"]),
];

// Patterns run against normalized link text, so they are normalized too.
static ALLOW: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    ["fiyatları", r"\bhal\b"]
        .iter()
        .map(|p| Regex::new(&normalize(p)).unwrap())
        .collect()
});
static BLOCK: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"\bihale\b", r"\bhalk\b"]
        .iter()
        .map(|p| Regex::new(&normalize(p)).unwrap())
        .collect()
});

/// Council bulletin: the listing page links to today's price page, whose
/// "Toptancı Hal Müdürlüğü" table stacks several sub-tables. The last one
/// (the association's prices) is the one kept.
pub struct Gazipasa {
    listing_url: String,
    base_domain: String,
    policy: RetryPolicy,
}

impl Default for Gazipasa {
    fn default() -> Self {
        Gazipasa::new(LISTING_URL, BASE_DOMAIN, RetryPolicy::exponential())
    }
}

impl Gazipasa {
    pub fn new(listing_url: &str, base_domain: &str, policy: RetryPolicy) -> Self {
        Gazipasa {
            listing_url: listing_url.to_string(),
            base_domain: base_domain.trim_end_matches('/').to_string(),
            policy,
        }
    }
}

#[async_trait]
impl SourceAdapter for Gazipasa {
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
        let listing = fetch_with_retry(fetcher, &self.listing_url, &self.policy).await?;
        let data_url = discover_data_url(&html::anchors(&listing), &self.listing_url, &self.base_domain)
            .ok_or_else(|| ScrapeError::LinkNotFound(self.listing_url.clone()))?;
        info!(market = MARKET.id, url = %data_url, "Found price page link");

        let page = fetch_with_retry(fetcher, &data_url, &self.policy).await?;
        let table = locate_price_table(&html::parse_tables(&page))?;
        info!(market = MARKET.id, rows = table.rows.len(), "Isolated last price block");
        Ok(vec![table])
    }
}

fn link_matches(text: &str) -> bool {
    let text = normalize(text.trim());
    ALLOW.iter().any(|re| re.is_match(&text)) && !BLOCK.iter().any(|re| re.is_match(&text))
}

/// Absolute form of `href`, or `None` for relative paths without a leading
/// slash (and `javascript:`, `mailto:` and the like).
pub fn resolve_href(href: &str, base_domain: &str) -> Option<String> {
    if href.starts_with("http") {
        Some(href.to_string())
    } else if href.starts_with("//") {
        Some(format!("https:{}", href))
    } else if href.starts_with('/') {
        Some(format!("{}{}", base_domain, href))
    } else {
        None
    }
}

/// First anchor whose text names a price page, resolved against the site.
pub fn discover_data_url(anchors: &[Anchor], listing_url: &str, base_domain: &str) -> Option<String> {
    anchors
        .iter()
        .filter(|a| link_matches(&a.text))
        .filter_map(|a| resolve_href(&a.href, base_domain))
        .find(|url| url != listing_url)
}

/// Pick the fingerprinted table and re-head it at the last product marker row.
pub fn locate_price_table(tables: &[RawTable]) -> Result<RawTable, ScrapeError> {
    let fingerprint = normalize(FINGERPRINT);
    let table = tables
        .iter()
        .filter(|t| !t.is_empty())
        .find(|t| normalize(&t.header_text()).contains(&fingerprint))
        .ok_or_else(|| ScrapeError::TableNotFound(FINGERPRINT.to_string()))?;

    let marker = normalize(HEADER_MARKER);
    let last = table
        .column(0)
        .enumerate()
        .filter(|(_, cell)| normalize(cell).contains(&marker))
        .map(|(i, _)| i)
        .last();

    match last.and_then(|i| table.promote_row(i)) {
        Some(block) => Ok(block),
        None => {
            warn!(market = MARKET.id, "No {:?} row in price table", HEADER_MARKER);
            Err(ScrapeError::HeaderNotFound(HEADER_MARKER.to_string()))
        }
    }
}
