//! Connection capability and logging hook.
//!
//! - [`Connectable`] - what both a single connection and a pool can do
//! - [`ConnectionObserver`] - receives reconnect and error notifications
//! - [`TracingObserver`] - default observer emitting `tracing` events

use crate::error::{Error, Result};
use crate::row::{ColumnInfo, FromRow};
use crate::table::Table;
use std::sync::Arc;

/// Blocking query capability shared by connections and pools.
///
/// Implementations are used from many threads at once, so every method takes
/// `&self` and synchronizes internally.
pub trait Connectable: Send + Sync {
    /// Establish the session (handshake and authentication).
    #[allow(clippy::result_large_err)]
    fn open(&self) -> Result<()>;

    /// Tear the session down. Closing twice is not an error.
    #[allow(clippy::result_large_err)]
    fn close(&self) -> Result<()>;

    /// Run a single statement and hand each decoded row to `on_row`.
    ///
    /// Rows are handed over only after the whole result set was read, so a
    /// failed query never delivers partial results. Returns the column set.
    #[allow(clippy::result_large_err)]
    fn query_rows<T, F>(&self, sql: &str, on_row: F) -> Result<Arc<ColumnInfo>>
    where
        T: FromRow,
        F: FnMut(T);

    /// Run a single statement that produces no rows and return the affected row count.
    #[allow(clippy::result_large_err)]
    fn query_no_result(&self, sql: &str) -> Result<u64>;

    /// Run a single statement and collect its result set.
    #[allow(clippy::result_large_err)]
    fn query_table<T: FromRow>(&self, sql: &str) -> Result<Table<T>> {
        let mut rows = Vec::new();
        let columns = self.query_rows(sql, |row: T| rows.push(row))?;
        Ok(Table::new(columns, rows))
    }
}

/// Reject text containing more than one statement.
///
/// A `;` is only accepted as the final character.
#[allow(clippy::result_large_err)]
pub fn ensure_single_statement(sql: &str) -> Result<()> {
    match sql.find(';') {
        Some(pos) if pos + 1 < sql.len() => Err(Error::TooManyQueries),
        _ => Ok(()),
    }
}

/// Receives notable connection events.
///
/// Injected through configuration; the library never installs a global
/// logger.
pub trait ConnectionObserver: Send + Sync + std::fmt::Debug {
    /// A transport failure closed the connection and attempt `attempt` of
    /// `max_attempts` is about to reopen it.
    fn on_reconnect(&self, attempt: u32, max_attempts: u32, error: &Error);

    /// A query failed and the error is being returned to the caller.
    fn on_error(&self, sql: &str, error: &Error);
}

/// Observer that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ConnectionObserver for TracingObserver {
    fn on_reconnect(&self, attempt: u32, max_attempts: u32, error: &Error) {
        tracing::warn!(
            target: "sqlwire::mysql",
            attempt,
            max_attempts,
            error = %error,
            "connection lost, reconnecting"
        );
    }

    fn on_error(&self, sql: &str, error: &Error) {
        tracing::debug!(target: "sqlwire::mysql", sql, error = %error, "query failed");
    }
}

/// Shared handle to the default observer.
pub fn default_observer() -> Arc<dyn ConnectionObserver> {
    Arc::new(TracingObserver)
}
