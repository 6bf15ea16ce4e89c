//! Lazily-connected database with bounded retry
//!
//! A [`Database`] owns at most one live backend handle and re-opens it on
//! demand. Execution retries exactly once on a transient (connection-class)
//! failure, and only when no transaction is open and auto-reconnect is
//! enabled; everything else propagates unchanged.

use super::handle::{Handle, Target};
use crate::metrics::counters;
use crate::{Error, Result};

/// A database connection with reconnect-and-retry execution.
#[derive(Debug)]
pub struct Database {
    target: Target,
    handle: Option<Handle>,
    auto_reconnect: bool,
    in_transaction: bool,
}

impl Database {
    pub(crate) fn new(target: Target) -> Self {
        Self {
            target,
            handle: None,
            auto_reconnect: true,
            in_transaction: false,
        }
    }

    /// Enable or disable the retry-once-on-reconnect behavior.
    ///
    /// Enabled by default.
    pub fn set_auto_reconnect(&mut self, enabled: bool) {
        self.auto_reconnect = enabled;
    }

    /// Make sure a live handle exists, opening one if necessary.
    pub(crate) async fn connect(&mut self) -> Result<()> {
        if self.handle.is_none() {
            self.handle = Some(Handle::open(&self.target).await?);
        }
        Ok(())
    }

    fn handle_mut(&mut self) -> &mut Handle {
        self.handle.as_mut().expect("handle just opened")
    }

    /// Whether the handle has been closed (or never opened).
    pub fn is_closed(&self) -> bool {
        self.handle.is_none()
    }

    /// Whether a live, responding handle exists.
    pub async fn is_usable(&mut self) -> bool {
        match &mut self.handle {
            Some(handle) => handle.ping().await,
            None => false,
        }
    }

    /// Whether an atomic block is open.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.connect().await?;
        match self.handle_mut().execute(sql).await {
            Ok(affected) => Ok(affected),
            Err(err) if self.should_retry(&err) => {
                self.reopen(&err).await?;
                self.handle_mut().execute(sql).await
            }
            Err(err) => Err(err),
        }
    }

    /// Execute a query, returning the first column of the first row.
    pub async fn query_i64(&mut self, sql: &str) -> Result<Option<i64>> {
        self.connect().await?;
        match self.handle_mut().query_i64(sql).await {
            Ok(value) => Ok(value),
            Err(err) if self.should_retry(&err) => {
                self.reopen(&err).await?;
                self.handle_mut().query_i64(sql).await
            }
            Err(err) => Err(err),
        }
    }

    /// Open an atomic block.
    pub async fn begin(&mut self) -> Result<()> {
        self.execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    /// Commit the open atomic block.
    pub async fn commit(&mut self) -> Result<()> {
        let result = self.execute("COMMIT").await;
        self.in_transaction = false;
        result.map(drop)
    }

    /// Roll back the open atomic block.
    pub async fn rollback(&mut self) -> Result<()> {
        let result = self.execute("ROLLBACK").await;
        self.in_transaction = false;
        result.map(drop)
    }

    /// Close the handle, if open.
    pub async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            tracing::debug!("closing database");
            handle.close().await?;
        }
        self.in_transaction = false;
        Ok(())
    }

    /// Retry is allowed for one transient failure, outside a transaction,
    /// with auto-reconnect on.
    fn should_retry(&self, err: &Error) -> bool {
        err.is_transient() && self.auto_reconnect && !self.in_transaction
    }

    /// Discard the broken handle and open a fresh one for the single retry.
    async fn reopen(&mut self, err: &Error) -> Result<()> {
        counters::query_retried(self.target.backend_label());
        tracing::debug!("retrying after transient failure: {err}");

        if let Some(handle) = self.handle.take() {
            let _ = handle.close().await;
        }
        self.connect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_retry_once_succeeds() {
        let (target, failures) = Target::mock(1);
        let mut database = Database::new(target);

        assert_eq!(database.execute("UPDATE t SET x = 1").await.unwrap(), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_failure_propagates() {
        let (target, failures) = Target::mock(2);
        let mut database = Database::new(target);

        let err = database.execute("UPDATE t SET x = 1").await.unwrap_err();
        assert!(err.is_connection_failure());
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_retry_inside_transaction() {
        let (target, failures) = Target::mock(0);
        let mut database = Database::new(target);

        database.begin().await.unwrap();
        assert!(database.in_transaction());

        failures.store(1, Ordering::SeqCst);
        let err = database.execute("UPDATE t SET x = 1").await.unwrap_err();
        assert!(err.is_connection_failure());
        // One attempt consumed the only queued failure; a retry would have
        // succeeded, so an error here proves there was no retry.
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_retry_with_auto_reconnect_disabled() {
        let (target, _failures) = Target::mock(1);
        let mut database = Database::new(target);
        database.set_auto_reconnect(false);

        let err = database.execute("UPDATE t SET x = 1").await.unwrap_err();
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn test_commit_clears_transaction_flag() {
        let (target, failures) = Target::mock(0);
        let mut database = Database::new(target);

        database.begin().await.unwrap();
        database.commit().await.unwrap();
        assert!(!database.in_transaction());

        // Back outside a transaction: retry works again.
        failures.store(1, Ordering::SeqCst);
        assert!(database.execute("UPDATE t SET x = 1").await.is_ok());
    }

    #[tokio::test]
    async fn test_rollback_clears_transaction_flag() {
        let (target, _failures) = Target::mock(0);
        let mut database = Database::new(target);

        database.begin().await.unwrap();
        database.rollback().await.unwrap();
        assert!(!database.in_transaction());
    }

    #[tokio::test]
    async fn test_lifecycle_flags() {
        let (target, _failures) = Target::mock(0);
        let mut database = Database::new(target);

        assert!(database.is_closed());
        assert!(!database.is_usable().await);

        database.execute("SELECT 1").await.unwrap();
        assert!(!database.is_closed());
        assert!(database.is_usable().await);

        database.close().await.unwrap();
        assert!(database.is_closed());
    }

    #[tokio::test]
    async fn test_sql_error_never_retried() {
        // Sql errors are non-transient; even with retry budget available the
        // error must propagate unchanged.
        let (target, _failures) = Target::mock(0);
        let mut database = Database::new(target);
        database.connect().await.unwrap();

        let err = Error::Sql("syntax error".into());
        assert!(!database.should_retry(&err));
    }
}
