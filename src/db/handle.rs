//! Backend handle abstraction (MySQL vs SQLite)

use mysql_async::prelude::Queryable;
use rusqlite::OpenFlags;

use crate::connector::{connect_timeout, MysqlOptions};
use crate::logging::log_policy;
use crate::{Error, Result};

/// What a [`Handle`] dials when it (re-)opens.
///
/// For a tunnelled connector the host and port name the tunnel's local
/// endpoint, not the remote server.
#[derive(Debug, Clone)]
pub(crate) enum Target {
    MySql {
        opts: MysqlOptions,
        host: String,
        port: u16,
    },
    Sqlite {
        uri: String,
    },
    #[cfg(test)]
    Mock {
        failures: std::sync::Arc<std::sync::atomic::AtomicU32>,
    },
}

impl Target {
    pub(crate) fn backend_label(&self) -> &'static str {
        match self {
            Target::MySql { .. } => crate::metrics::labels::BACKEND_MYSQL,
            Target::Sqlite { .. } => crate::metrics::labels::BACKEND_SQLITE,
            #[cfg(test)]
            Target::Mock { .. } => "mock",
        }
    }

    #[cfg(test)]
    pub(crate) fn mock(
        failures: u32,
    ) -> (Self, std::sync::Arc<std::sync::atomic::AtomicU32>) {
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(failures));
        (
            Target::Mock {
                failures: counter.clone(),
            },
            counter,
        )
    }
}

/// A live backend connection.
///
/// Opaque to everything above [`Database`](super::Database): consumers get
/// SQL execution, usable/closed checks, and nothing else.
#[derive(Debug)]
pub enum Handle {
    /// MySQL connection
    MySql(mysql_async::Conn),
    /// SQLite connection
    Sqlite(rusqlite::Connection),
    #[cfg(test)]
    Mock(MockHandle),
}

impl Handle {
    /// Open a fresh connection to `target`.
    pub(crate) async fn open(target: &Target) -> Result<Self> {
        match target {
            Target::MySql { opts, host, port } => {
                let conn = dial_mysql(opts, host, *port).await?;
                Ok(Handle::MySql(conn))
            }
            Target::Sqlite { uri } => Ok(Handle::Sqlite(open_sqlite(uri)?)),
            #[cfg(test)]
            Target::Mock { failures } => Ok(Handle::Mock(MockHandle {
                failures: failures.clone(),
                executed: Vec::new(),
            })),
        }
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        match self {
            Handle::MySql(conn) => {
                conn.query_drop(sql).await?;
                Ok(conn.affected_rows())
            }
            Handle::Sqlite(conn) => Ok(conn.execute(sql, [])? as u64),
            #[cfg(test)]
            Handle::Mock(mock) => mock.execute(sql),
        }
    }

    /// Execute a query and return the first column of the first row, if any.
    pub async fn query_i64(&mut self, sql: &str) -> Result<Option<i64>> {
        match self {
            Handle::MySql(conn) => Ok(conn.query_first(sql).await?),
            Handle::Sqlite(conn) => {
                use rusqlite::OptionalExtension;
                Ok(conn
                    .query_row(sql, [], |row| row.get::<_, i64>(0))
                    .optional()?)
            }
            #[cfg(test)]
            Handle::Mock(mock) => mock.execute(sql).map(|_| None),
        }
    }

    /// Whether the connection still responds.
    pub(crate) async fn ping(&mut self) -> bool {
        match self {
            Handle::MySql(conn) => conn.ping().await.is_ok(),
            Handle::Sqlite(conn) => conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok(),
            #[cfg(test)]
            Handle::Mock(_) => true,
        }
    }

    /// Close the connection.
    pub(crate) async fn close(self) -> Result<()> {
        match self {
            Handle::MySql(conn) => Ok(conn.disconnect().await?),
            Handle::Sqlite(conn) => conn.close().map_err(|(_, err)| err.into()),
            #[cfg(test)]
            Handle::Mock(_) => Ok(()),
        }
    }
}

/// Open an SQLite database at `uri` (a plain path or a `file:` URI).
pub(crate) fn open_sqlite(uri: &str) -> Result<rusqlite::Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;

    rusqlite::Connection::open_with_flags(uri, flags)
        .map_err(|_| Error::Connection(format!("failed to connect to Sqlite database {uri}")))
}

/// Dial a MySQL server with the bounded connect timeout.
pub(crate) async fn dial_mysql(
    opts: &MysqlOptions,
    host: &str,
    port: u16,
) -> Result<mysql_async::Conn> {
    let timeout = connect_timeout();

    tracing::debug!(
        "connecting to MySQL at {host}:{port} as {} password: {}",
        opts.user,
        log_policy().password_display(&opts.passwd)
    );

    let builder = mysql_async::OptsBuilder::default()
        .ip_or_hostname(host.to_string())
        .tcp_port(port)
        .user(Some(opts.user.clone()))
        .pass(Some(opts.passwd.clone()))
        .db_name(Some(opts.db.clone()));

    match tokio::time::timeout(timeout, mysql_async::Conn::new(builder)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(err)) => Err(Error::Connection(format!(
            "error connecting to MySQL at {host}:{port}: {err}"
        ))),
        Err(_) => Err(Error::Connection(format!(
            "timed out connecting to MySQL at {host}:{port} after {}s",
            timeout.as_secs()
        ))),
    }
}

/// Test stand-in for a backend connection.
///
/// Fails each operation while the shared failure budget is positive, so retry
/// behavior can be exercised without a server.
#[cfg(test)]
#[derive(Debug)]
pub struct MockHandle {
    failures: std::sync::Arc<std::sync::atomic::AtomicU32>,
    pub executed: Vec<String>,
}

#[cfg(test)]
impl MockHandle {
    fn execute(&mut self, sql: &str) -> Result<u64> {
        use std::sync::atomic::Ordering;

        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Connection("mock connection dropped".into()));
        }
        self.executed.push(sql.to_string());
        Ok(1)
    }
}
