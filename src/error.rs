use std::path::PathBuf;

use thiserror::Error;

use crate::columns::Field;

/// Failure of a single page fetch. Everything here is network-class; parse and
/// shape problems are [`ScrapeError`] variants and never pass through retry.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

impl FetchError {
    /// Connection, TLS, timeout and body errors, plus 5xx/408/429 responses.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport { .. } => true,
            FetchError::Status { status, .. } => {
                *status >= 500 || *status == 408 || *status == 429
            }
        }
    }
}

/// Canonical fields that could not be matched to any source header.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("required columns not found: {}", display_fields(.missing))]
pub struct MissingColumns {
    pub missing: Vec<Field>,
}

fn display_fields(fields: &[Field]) -> String {
    fields
        .iter()
        .map(|f| f.label())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Why one adapter run produced no records. All variants are recoverable: the
/// run is abandoned (or served from cache) and the other markets carry on.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("no data link found on {0}")]
    LinkNotFound(String),
    #[error("no table matching {0:?}")]
    TableNotFound(String),
    #[error("header marker {0:?} not found")]
    HeaderNotFound(String),
    #[error(transparent)]
    Columns(#[from] MissingColumns),
    #[error("no data: {0}")]
    NoData(String),
}

impl ScrapeError {
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::Fetch(_) => "network",
            ScrapeError::LinkNotFound(_)
            | ScrapeError::TableNotFound(_)
            | ScrapeError::HeaderNotFound(_) => "discovery",
            ScrapeError::Columns(_) | ScrapeError::NoData(_) => "shape",
        }
    }
}

/// Category rule table could not be loaded; the pipeline refuses to start.
#[derive(Debug, Error)]
pub enum RulesError {
    #[error("category rules file {0:?} not found")]
    NotFound(PathBuf),
    #[error("failed to read category rules from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("category rules file is missing the {0:?} column")]
    MissingColumn(&'static str),
}
