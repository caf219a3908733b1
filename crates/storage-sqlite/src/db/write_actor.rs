//! Single writer thread. Every write runs on one dedicated connection inside
//! an immediate transaction, so SQLite never sees competing writers.

use diesel::sqlite::SqliteConnection;
use diesel::Connection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use remindly_core::{Error, Result};

use super::{get_connection, DbPool};
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(&mut SqliteConnection) + Send + 'static>;

/// Error carried out of a writer transaction.
enum TxError {
    Job(Error),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Diesel(err)
    }
}

impl From<TxError> for Error {
    fn from(err: TxError) -> Self {
        match err {
            TxError::Job(err) => err,
            TxError::Diesel(err) => StorageError::from(err).into(),
        }
    }
}

#[derive(Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl WriteHandle {
    /// Runs `job` on the writer connection in a transaction. The transaction
    /// rolls back when `job` returns an error.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let wrapped: Job = Box::new(move |conn| {
            let result = conn
                .immediate_transaction::<T, TxError, _>(|conn| job(conn).map_err(TxError::Job))
                .map_err(Error::from);
            // The caller may have been cancelled; nothing to report then.
            let _ = reply_tx.send(result);
        });

        self.tx
            .send(wrapped)
            .map_err(|_| StorageError::Writer("writer thread has stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| StorageError::Writer("writer dropped the job".to_string()))?
    }
}

/// Checks a connection out of `pool` and starts the writer thread on it.
/// The thread exits once every [`WriteHandle`] is dropped.
pub fn spawn_writer(pool: &DbPool) -> Result<WriteHandle> {
    let mut conn = get_connection(pool)?;
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

    std::thread::Builder::new()
        .name("remindly-db-writer".to_string())
        .spawn(move || {
            while let Some(job) = rx.blocking_recv() {
                job(&mut *conn);
            }
            debug!("[DbWriter] All handles dropped; writer stopped");
        })
        .map_err(|e| {
            error!("[DbWriter] Failed to start writer thread: {}", e);
            StorageError::Io(e)
        })?;

    Ok(WriteHandle { tx })
}
