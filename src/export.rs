use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::db;
use crate::records::{format_date, PriceRecord, DATE_FORMAT};

/// One line of an exported price sheet, in the published column order.
#[derive(Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Ürün Adı")]
    product: &'a str,
    #[serde(rename = "Kategori")]
    category: &'a str,
    #[serde(rename = "En Düşük Fiyat (TL)")]
    price_min: Option<f64>,
    #[serde(rename = "En Yüksek Fiyat (TL)")]
    price_max: Option<f64>,
    #[serde(rename = "Birim")]
    unit: &'a str,
}

impl<'a> From<&'a PriceRecord> for ExportRow<'a> {
    fn from(r: &'a PriceRecord) -> Self {
        ExportRow {
            product: &r.product,
            category: &r.category,
            price_min: r.price_min,
            price_max: r.price_max,
            unit: &r.unit,
        }
    }
}

pub fn write_csv(path: &Path, records: &[PriceRecord]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut wtr = csv::Writer::from_path(path).with_context(|| format!("open {}", path.display()))?;
    for r in records {
        wtr.serialize(ExportRow::from(r))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a fresh batch to `<dir>/<file_name>`, replacing the previous export.
pub fn export_batch(dir: &Path, file_name: &str, records: &[PriceRecord]) -> Result<PathBuf> {
    let path = dir.join(file_name);
    write_csv(&path, records)?;
    info!(rows = records.len(), path = %path.display(), "Exported batch");
    Ok(path)
}

#[derive(Debug, Default)]
pub struct BackupReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<String>,
    pub pruned: usize,
}

/// Copy each market's most recent day out of the database into
/// `<dir>/<today>/<market_id>_<date>.csv`, then prune old day folders.
pub fn backup_now(
    conn: &Connection,
    dir: &Path,
    today: NaiveDate,
    retention_days: i64,
) -> Result<BackupReport> {
    let day_dir = dir.join(format_date(today));
    let mut report = BackupReport::default();

    for market_id in db::market_ids(conn)? {
        let Some(date) = db::latest_date(conn, &market_id)? else {
            report.skipped.push(market_id);
            continue;
        };
        let records = db::fetch_for_date(conn, &market_id, &date)?;
        if records.is_empty() {
            report.skipped.push(market_id);
            continue;
        }
        let path = day_dir.join(format!("{}_{}.csv", market_id, date));
        write_csv(&path, &records)?;
        info!(market = %market_id, rows = records.len(), path = %path.display(), "Backup written");
        report.written.push(path);
    }

    report.pruned = prune_backups(dir, today, retention_days)?;
    Ok(report)
}

/// Remove `YYYY-MM-DD` folders more than `retention_days` before `today`.
/// Anything not named like a date is left alone.
pub fn prune_backups(dir: &Path, today: NaiveDate, retention_days: i64) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let cutoff = today - Duration::days(retention_days);
    let mut removed = 0;

    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(date) = name
            .to_str()
            .and_then(|n| NaiveDate::parse_from_str(n, DATE_FORMAT).ok())
        else {
            continue;
        };
        if date < cutoff {
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    info!(path = %entry.path().display(), "Removed old backup");
                    removed += 1;
                }
                Err(e) => warn!(path = %entry.path().display(), "Could not remove old backup: {}", e),
            }
        }
    }
    Ok(removed)
}
