use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::records::PriceRecord;

pub fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let conn = Connection::open(path).with_context(|| format!("opening {}", path.display()))?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS prices (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            market_id    TEXT NOT NULL,
            market_name  TEXT NOT NULL,
            product      TEXT NOT NULL,
            category     TEXT NOT NULL DEFAULT '',
            price_min    REAL,
            price_max    REAL,
            unit         TEXT,
            date_scraped TEXT NOT NULL,
            source_file  TEXT,
            inserted_at  INTEGER NOT NULL,
            UNIQUE(market_id, product, date_scraped)
        );
        CREATE INDEX IF NOT EXISTS idx_prices_market_date ON prices(market_id, date_scraped);
        ",
    )?;
    Ok(())
}

/// Update-then-insert keyed by (market_id, product, date_scraped), one
/// transaction per batch. Returns the number of rows written.
pub fn upsert_prices(conn: &Connection, records: &[PriceRecord]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut update = tx.prepare(
            "UPDATE prices SET market_name = ?1, category = ?2, price_min = ?3, price_max = ?4,
                    unit = ?5, source_file = ?6, inserted_at = ?7
             WHERE market_id = ?8 AND product = ?9 AND date_scraped = ?10",
        )?;
        let mut insert = tx.prepare(
            "INSERT INTO prices (market_id, market_name, product, category, price_min, price_max,
                                 unit, date_scraped, source_file, inserted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        for r in records {
            let changed = update.execute(params![
                r.market_name,
                r.category,
                r.price_min,
                r.price_max,
                r.unit,
                r.source_file,
                r.inserted_at,
                r.market_id,
                r.product,
                r.date_scraped,
            ])?;
            if changed == 0 {
                insert.execute(params![
                    r.market_id,
                    r.market_name,
                    r.product,
                    r.category,
                    r.price_min,
                    r.price_max,
                    r.unit,
                    r.date_scraped,
                    r.source_file,
                    r.inserted_at,
                ])?;
            }
        }
    }
    tx.commit()?;
    Ok(records.len())
}

/// A stored row with its surrogate id.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPrice {
    pub id: i64,
    #[serde(flatten)]
    pub record: PriceRecord,
}

const COLUMNS: &str = "id, market_id, market_name, product, category, price_min, price_max,
                       unit, date_scraped, source_file, inserted_at";

fn stored_from_row(row: &Row) -> rusqlite::Result<StoredPrice> {
    Ok(StoredPrice {
        id: row.get(0)?,
        record: PriceRecord {
            market_id: row.get(1)?,
            market_name: row.get(2)?,
            product: row.get(3)?,
            category: row.get(4)?,
            price_min: row.get(5)?,
            price_max: row.get(6)?,
            unit: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
            date_scraped: row.get(8)?,
            source_file: row.get::<_, Option<String>>(9)?.unwrap_or_default(),
            inserted_at: row.get(10)?,
        },
    })
}

/// Newest rows for a market, most recent scrape date first.
pub fn fetch_latest(conn: &Connection, market_id: &str, limit: usize) -> Result<Vec<StoredPrice>> {
    let sql = format!(
        "SELECT {} FROM prices WHERE market_id = ?1
         ORDER BY date_scraped DESC, id ASC LIMIT ?2",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![market_id, limit as i64], stored_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn latest_date(conn: &Connection, market_id: &str) -> Result<Option<String>> {
    let date = conn
        .query_row(
            "SELECT MAX(date_scraped) FROM prices WHERE market_id = ?1",
            params![market_id],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()?
        .flatten();
    Ok(date)
}

/// All rows of one market for one scrape date, in insertion order.
pub fn fetch_for_date(conn: &Connection, market_id: &str, date: &str) -> Result<Vec<PriceRecord>> {
    let sql = format!(
        "SELECT {} FROM prices WHERE market_id = ?1 AND date_scraped = ?2 ORDER BY id",
        COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![market_id, date], stored_from_row)?
        .map(|r| r.map(|s| s.record))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn market_ids(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT DISTINCT market_id FROM prices ORDER BY market_id")?;
    let ids = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketStats {
    pub market_id: String,
    pub market_name: String,
    pub rows: i64,
    pub days: i64,
    pub latest_date: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<Vec<MarketStats>> {
    let mut stmt = conn.prepare(
        "SELECT market_id, MAX(market_name), COUNT(*), COUNT(DISTINCT date_scraped), MAX(date_scraped)
         FROM prices GROUP BY market_id ORDER BY market_id",
    )?;
    let stats = stmt
        .query_map([], |row| {
            Ok(MarketStats {
                market_id: row.get(0)?,
                market_name: row.get(1)?,
                rows: row.get(2)?,
                days: row.get(3)?,
                latest_date: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn record(product: &str, date: &str, min: Option<f64>) -> PriceRecord {
        PriceRecord {
            market_id: "x".into(),
            market_name: "Test".into(),
            product: product.into(),
            category: "Sebze".into(),
            price_min: min,
            price_max: Some(15.0),
            unit: "KG".into(),
            date_scraped: date.into(),
            source_file: "test_hal_fiyatlari.csv".into(),
            inserted_at: 1_704_067_200,
        }
    }

    fn count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM prices", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn second_upsert_wins() {
        let conn = conn();
        upsert_prices(&conn, &[record("Domates", "2024-01-01", Some(10.0))]).unwrap();
        upsert_prices(&conn, &[record("Domates", "2024-01-01", Some(12.0))]).unwrap();

        assert_eq!(count(&conn), 1);
        let rows = fetch_for_date(&conn, "x", "2024-01-01").unwrap();
        assert_eq!(rows[0].price_min, Some(12.0));
    }

    #[test]
    fn read_back_matches_written_record() {
        let conn = conn();
        let written = record("Biber", "2024-01-01", None);
        upsert_prices(&conn, std::slice::from_ref(&written)).unwrap();
        let read = fetch_for_date(&conn, "x", "2024-01-01").unwrap();
        assert_eq!(read, vec![written]);
    }

    #[test]
    fn built_records_read_back_unchanged() {
        use crate::adapters::Market;
        use crate::classify::{CategoryRule, RuleSet};
        use crate::records::build;
        use crate::sanitize::{sanitize, CanonicalRow};

        let raw = |product: &str, min: &str, max: &str| CanonicalRow {
            group: None,
            product: Some(product.into()),
            price_min: Some(min.into()),
            price_max: Some(max.into()),
            unit: Some("KG".into()),
        };
        let rows = sanitize(vec![
            raw("Domates Salkım", "₺12,50", "15"),
            raw("Biber Sivri", "yok", "30,00"),
        ]);
        let market = Market { id: "x", name: "Test", slug: "test" };
        let rules = RuleSet::new(vec![CategoryRule::new("domates", "Sebze")]);
        let date = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let built = build(&rows, &rules, &market, date, "test_hal_fiyatlari.csv");

        let conn = conn();
        upsert_prices(&conn, &built).unwrap();
        let read = fetch_for_date(&conn, "x", "2024-01-01").unwrap();

        assert_eq!(read, built);
        assert_eq!(read[0].price_min, Some(12.5));
        assert_eq!(read[0].category, "Sebze");
        assert_eq!(read[1].price_min, None);
        assert_eq!(read[1].price_max, Some(30.0));
        assert_eq!(read[1].category, "");
    }

    #[test]
    fn different_days_are_separate_rows() {
        let conn = conn();
        upsert_prices(
            &conn,
            &[
                record("Domates", "2024-01-01", Some(10.0)),
                record("Domates", "2024-01-02", Some(11.0)),
                record("Biber", "2024-01-02", Some(20.0)),
            ],
        )
        .unwrap();
        assert_eq!(count(&conn), 3);
        assert_eq!(latest_date(&conn, "x").unwrap().as_deref(), Some("2024-01-02"));
        assert_eq!(latest_date(&conn, "nope").unwrap(), None);

        let latest = fetch_latest(&conn, "x", 2).unwrap();
        assert_eq!(latest.len(), 2);
        assert!(latest.iter().all(|p| p.record.date_scraped == "2024-01-02"));
    }

    #[test]
    fn stats_per_market() {
        let conn = conn();
        upsert_prices(
            &conn,
            &[
                record("Domates", "2024-01-01", Some(10.0)),
                record("Domates", "2024-01-02", Some(11.0)),
            ],
        )
        .unwrap();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].rows, 2);
        assert_eq!(stats[0].days, 2);
        assert_eq!(stats[0].latest_date.as_deref(), Some("2024-01-02"));
        assert_eq!(market_ids(&conn).unwrap(), vec!["x".to_string()]);
    }

    #[test]
    fn stored_price_serializes_flat() {
        let conn = conn();
        upsert_prices(&conn, &[record("Domates", "2024-01-01", Some(10.0))]).unwrap();
        let row = &fetch_latest(&conn, "x", 10).unwrap()[0];
        let json = serde_json::to_value(row).unwrap();
        assert_eq!(json["product"], "Domates");
        assert!(json["id"].is_i64());
    }
}
