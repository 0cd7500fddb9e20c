use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::{error, info, warn};

use crate::db;
use crate::export;
use crate::runner::{MarketRunner, RunOutcome, RunState};
use crate::settings::Settings;
use crate::writer::WriterHandle;

#[derive(Debug, Clone, PartialEq)]
pub enum MarketOutcome {
    Stored { rows: usize },
    Cached { rows: usize, reason: String },
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct MarketReport {
    pub market_id: &'static str,
    pub outcome: MarketOutcome,
}

/// Shared pieces every scrape cycle needs.
#[derive(Clone)]
pub struct Cycle {
    pub runners: Vec<Arc<MarketRunner>>,
    pub writer: WriterHandle,
    pub export_dir: Option<PathBuf>,
}

/// Run one market, persist a fresh batch and export it. Cached batches were
/// stored when they were fresh and are not written again.
pub async fn run_market(
    runner: &MarketRunner,
    writer: &WriterHandle,
    export_dir: Option<&PathBuf>,
    today: NaiveDate,
) -> MarketReport {
    let market_id = runner.market().id;
    let outcome = match runner.run_once(today).await {
        Ok(RunOutcome::Fresh(records)) => {
            if let Some(dir) = export_dir {
                if let Some(first) = records.first() {
                    if let Err(e) = export::export_batch(dir, &first.source_file, &records) {
                        warn!(market = market_id, "Export failed: {:#}", e);
                    }
                }
            }
            let rows = records.len();
            match writer.upsert(records).await {
                Ok(_) => MarketOutcome::Stored { rows },
                Err(e) => MarketOutcome::Failed(format!("{:#}", e)),
            }
        }
        Ok(RunOutcome::Cached { records, error }) => MarketOutcome::Cached {
            rows: records.len(),
            reason: error.to_string(),
        },
        Ok(RunOutcome::Skipped) => MarketOutcome::Skipped,
        Err(e) => MarketOutcome::Failed(e.to_string()),
    };

    match &outcome {
        MarketOutcome::Stored { rows } => info!(market = market_id, rows, "Stored batch"),
        MarketOutcome::Cached { rows, reason } => {
            warn!(market = market_id, rows, "Served cached batch: {}", reason)
        }
        MarketOutcome::Skipped => info!(market = market_id, "Skipped overlapping run"),
        MarketOutcome::Failed(reason) => error!(market = market_id, "Run failed: {}", reason),
    }
    MarketReport { market_id, outcome }
}

/// Run every market concurrently and wait for all of them. One market
/// failing never stops the others.
pub async fn run_cycle(cycle: &Cycle, today: NaiveDate) -> Vec<MarketReport> {
    let handles: Vec<_> = cycle
        .runners
        .iter()
        .map(|runner| {
            let runner = Arc::clone(runner);
            let writer = cycle.writer.clone();
            let export_dir = cycle.export_dir.clone();
            tokio::spawn(async move { run_market(&runner, &writer, export_dir.as_ref(), today).await })
        })
        .collect();

    let mut reports = Vec::with_capacity(handles.len());
    for (handle, runner) in handles.into_iter().zip(&cycle.runners) {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => reports.push(MarketReport {
                market_id: runner.market().id,
                outcome: MarketOutcome::Failed(format!("task panicked: {}", e)),
            }),
        }
    }
    reports
}

/// Runners not busy with a previous cycle. A busy runner would only report
/// a skipped run, so no task is spawned for it.
pub fn idle_runners(cycle: &Cycle) -> Vec<Arc<MarketRunner>> {
    cycle
        .runners
        .iter()
        .filter(|runner| {
            let idle = runner.state() == RunState::Idle;
            if !idle {
                info!(market = runner.market().id, "Previous run still in progress");
            }
            idle
        })
        .cloned()
        .collect()
}

/// Time until the next `at` strictly after `now`.
pub fn next_backup_delay(now: NaiveDateTime, at: NaiveTime) -> Duration {
    let today = now.date().and_time(at);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::ZERO)
}

/// Read the database on a blocking thread and write today's backup.
pub async fn run_backup(settings: &Settings) -> Result<export::BackupReport> {
    let db_path = settings.db_path.clone();
    let backup_dir = settings.backup_dir.clone();
    let retention = settings.backup_retention_days;
    let today = Local::now().date_naive();
    tokio::task::spawn_blocking(move || {
        let conn = db::connect(&db_path)?;
        export::backup_now(&conn, &backup_dir, today, retention)
    })
    .await?
}

/// Refresh every market each interval and back up once a day until Ctrl-C.
///
/// Market runs are spawned, not awaited, so a slow market shows up as a
/// skipped run on the next tick instead of delaying the others.
pub async fn run_forever(cycle: Cycle, settings: &Settings) -> Result<()> {
    let backup_at = settings.backup_time()?;
    let mut ticker = tokio::time::interval(settings.refresh_interval());
    info!(
        "Scheduler started: refresh every {} min, backup daily at {}",
        settings.refresh_minutes, settings.backup_at
    );

    loop {
        let backup_in = next_backup_delay(Local::now().naive_local(), backup_at);
        tokio::select! {
            _ = ticker.tick() => {
                let today = Local::now().date_naive();
                for runner in idle_runners(&cycle) {
                    let writer = cycle.writer.clone();
                    let export_dir = cycle.export_dir.clone();
                    tokio::spawn(async move {
                        run_market(&runner, &writer, export_dir.as_ref(), today).await;
                    });
                }
            }
            _ = tokio::time::sleep(backup_in) => {
                match run_backup(settings).await {
                    Ok(report) => info!(
                        written = report.written.len(),
                        pruned = report.pruned,
                        "Daily backup done"
                    ),
                    Err(e) => error!("Daily backup failed: {:#}", e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down scheduler");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rusqlite::Connection;
    use tokio::sync::Notify;

    use super::*;
    use crate::adapters::{Market, SourceAdapter};
    use crate::cache::BatchCache;
    use crate::classify::RuleSet;
    use crate::columns::{Field, FieldSpec};
    use crate::error::{FetchError, ScrapeError};
    use crate::fetch::PageFetcher;
    use crate::html::RawTable;
    use crate::writer::spawn_writer;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn moment(d: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_time(at(h, m))
    }

    #[test]
    fn backup_later_today() {
        assert_eq!(
            next_backup_delay(moment(1, 15, 0), at(16, 0)),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn backup_tomorrow_once_passed() {
        assert_eq!(
            next_backup_delay(moment(1, 16, 0), at(16, 0)),
            Duration::from_secs(24 * 3600)
        );
        assert_eq!(
            next_backup_delay(moment(1, 17, 30), at(16, 0)),
            Duration::from_secs(22 * 3600 + 30 * 60)
        );
    }

    struct NoFetch;

    #[async_trait]
    impl PageFetcher for NoFetch {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            })
        }
    }

    const SCHEMA: &[FieldSpec] = &[
        FieldSpec::required(Field::Product, &["Ürün"]),
        FieldSpec::required(Field::PriceMin, &["Min"]),
        FieldSpec::required(Field::PriceMax, &["Max"]),
    ];

    struct Fixed {
        market: Market,
        ok: bool,
        hold: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl SourceAdapter for Fixed {
        fn market(&self) -> &Market {
            &self.market
        }
        fn schema(&self) -> &'static [FieldSpec] {
            SCHEMA
        }
        async fn fetch_tables(
            &self,
            _fetcher: &dyn PageFetcher,
            _today: NaiveDate,
        ) -> Result<Vec<RawTable>, ScrapeError> {
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            if !self.ok {
                return Err(ScrapeError::LinkNotFound("listing".into()));
            }
            Ok(vec![RawTable::new(
                vec!["Ürün".into(), "Min".into(), "Max".into()],
                vec![
                    vec!["Domates".into(), "10".into(), "12".into()],
                    vec!["Biber".into(), "20".into(), "25".into()],
                ],
            )])
        }
    }

    fn runner(id: &'static str, ok: bool) -> Arc<MarketRunner> {
        held_runner(id, ok, None)
    }

    fn held_runner(id: &'static str, ok: bool, hold: Option<Arc<Notify>>) -> Arc<MarketRunner> {
        Arc::new(MarketRunner::new(
            Arc::new(Fixed {
                market: Market { id, name: id, slug: id },
                ok,
                hold,
            }),
            Arc::new(NoFetch),
            Arc::new(RuleSet::default()),
            Arc::new(BatchCache::in_memory()),
        ))
    }

    #[tokio::test]
    async fn one_failing_market_does_not_stop_others() {
        let db_dir = tempfile::tempdir().unwrap();
        let export_dir = tempfile::tempdir().unwrap();
        let db_path = db_dir.path().join("prices.sqlite");
        let conn = db::connect(&db_path).unwrap();
        db::init_schema(&conn).unwrap();
        let (writer, _task) = spawn_writer(conn);

        let cycle = Cycle {
            runners: vec![runner("good", true), runner("bad", false)],
            writer,
            export_dir: Some(export_dir.path().to_path_buf()),
        };
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let reports = run_cycle(&cycle, today).await;

        assert_eq!(reports[0].market_id, "good");
        assert_eq!(reports[0].outcome, MarketOutcome::Stored { rows: 2 });
        assert!(matches!(reports[1].outcome, MarketOutcome::Failed(_)));
        assert!(export_dir.path().join("good_hal_fiyatlari.csv").exists());

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(db::fetch_for_date(&conn, "good", "2024-01-01").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn busy_runner_is_not_started_again() {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        let (writer, _task) = spawn_writer(conn);

        let hold = Arc::new(Notify::new());
        let busy = held_runner("busy", true, Some(Arc::clone(&hold)));
        let cycle = Cycle {
            runners: vec![Arc::clone(&busy), runner("idle", true)],
            writer,
            export_dir: None,
        };

        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let in_flight = tokio::spawn({
            let busy = Arc::clone(&busy);
            async move { busy.run_once(today).await }
        });
        while busy.state() != RunState::Running {
            tokio::task::yield_now().await;
        }

        let ready: Vec<_> = idle_runners(&cycle).iter().map(|r| r.market().id).collect();
        assert_eq!(ready, vec!["idle"]);

        hold.notify_one();
        in_flight.await.unwrap().unwrap();
        assert_eq!(idle_runners(&cycle).len(), 2);
    }
}
