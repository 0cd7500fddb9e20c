use anyhow::{anyhow, Result};
use rusqlite::Connection;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::db;
use crate::records::PriceRecord;

const QUEUE: usize = 16;

struct WriteJob {
    records: Vec<PriceRecord>,
    reply: oneshot::Sender<Result<usize>>,
}

/// Cheap handle for submitting batches to the writer task.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriteJob>,
}

impl WriterHandle {
    /// Queue a batch and wait until it is committed.
    pub async fn upsert(&self, records: Vec<PriceRecord>) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriteJob { records, reply })
            .await
            .map_err(|_| anyhow!("price writer has shut down"))?;
        rx.await.map_err(|_| anyhow!("price writer dropped the batch"))?
    }
}

/// Move `conn` onto a blocking thread that applies batches one at a time.
/// All price writes go through here, so update-then-insert never races.
/// The task ends once every handle is dropped.
pub fn spawn_writer(conn: Connection) -> (WriterHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<WriteJob>(QUEUE);
    let task = tokio::task::spawn_blocking(move || {
        while let Some(job) = rx.blocking_recv() {
            let result = db::upsert_prices(&conn, &job.records);
            match &result {
                Ok(n) => debug!(rows = n, "Committed batch"),
                Err(e) => error!("Batch upsert failed: {:#}", e),
            }
            let _ = job.reply.send(result);
        }
    });
    (WriterHandle { tx }, task)
}
