pub mod gazipasa;
pub mod izmir;
pub mod kumluca;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::columns::FieldSpec;
use crate::error::ScrapeError;
use crate::fetch::PageFetcher;
use crate::html::RawTable;

pub use gazipasa::Gazipasa;
pub use izmir::Izmir;
pub use kumluca::Kumluca;

/// Identity of one source market. `slug` names exported files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Market {
    pub id: &'static str,
    pub name: &'static str,
    pub slug: &'static str,
}

/// Per-source extraction: download whatever pages the source needs and hand
/// back the tables that carry prices. Everything after that (column mapping,
/// sanitizing, classification) is shared and lives in [`crate::pipeline`].
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn market(&self) -> &Market;

    /// Canonical fields with the header aliases this source uses.
    fn schema(&self) -> &'static [FieldSpec];

    /// Unit stamped on every row, for sources that publish a single unit.
    fn fixed_unit(&self) -> Option<&'static str> {
        None
    }

    /// File name recorded as each record's `source_file`.
    fn source_tag(&self) -> String {
        format!("{}_hal_fiyatlari.csv", self.market().slug)
    }

    async fn fetch_tables(
        &self,
        fetcher: &dyn PageFetcher,
        today: NaiveDate,
    ) -> Result<Vec<RawTable>, ScrapeError>;
}

/// The three production sources with their live URLs.
pub fn default_adapters() -> Vec<Arc<dyn SourceAdapter>> {
    vec![
        Arc::new(Gazipasa::default()),
        Arc::new(Kumluca::default()),
        Arc::new(Izmir::default()),
    ]
}

/// Find a production adapter by market id.
pub fn adapter_for(market_id: &str) -> Option<Arc<dyn SourceAdapter>> {
    default_adapters()
        .into_iter()
        .find(|a| a.market().id == market_id)
}
