//! Error types

use thiserror::Error;

/// Result type for chimedb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
///
/// `NoRoute` means no configuration source could be found at all, as opposed
/// to `Connection`, which means configuration was found but the database
/// could not be reached (or an established connection dropped).
#[derive(Error, Debug)]
pub enum Error {
    /// No route to the database could be found
    #[error("no route to database: {0}")]
    NoRoute(String),

    /// Failed to connect to the database, or an established connection dropped
    #[error("connection error: {0}")]
    Connection(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Statement execution failed for a non-transient reason
    #[error("sql error: {0}")]
    Sql(String),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error is a failure to reach the database.
    ///
    /// `NoRoute` counts: it is the "no configuration at all" refinement of a
    /// connection failure. The broker swallows these while trying the next
    /// candidate in a list.
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, Error::NoRoute(_) | Error::Connection(_))
    }

    /// Whether a retry against a freshly established handle could succeed.
    ///
    /// Only operational (connection-class) failures qualify; statement errors
    /// and configuration errors never do.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }
}

impl From<mysql_async::Error> for Error {
    fn from(err: mysql_async::Error) -> Self {
        match err {
            mysql_async::Error::Io(e) => Error::Connection(format!("mysql i/o error: {e}")),
            mysql_async::Error::Driver(e) => Error::Connection(format!("mysql driver error: {e}")),
            mysql_async::Error::Url(e) => Error::Config(format!("invalid mysql options: {e}")),
            mysql_async::Error::Server(e) => Error::Sql(e.to_string()),
            other => Error::Sql(other.to_string()),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        match &err {
            rusqlite::Error::SqliteFailure(e, msg) => match e.code {
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked => Error::Connection(format!(
                    "sqlite error: {}",
                    msg.as_deref().unwrap_or("database unavailable")
                )),
                _ => Error::Sql(err.to_string()),
            },
            _ => Error::Sql(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_route_is_connection_failure() {
        assert!(Error::NoRoute("gone".into()).is_connection_failure());
        assert!(Error::Connection("down".into()).is_connection_failure());
        assert!(!Error::Config("bad".into()).is_connection_failure());
        assert!(!Error::Sql("syntax".into()).is_connection_failure());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::Connection("dropped".into()).is_transient());
        assert!(!Error::Sql("syntax error".into()).is_transient());
        assert!(!Error::NoRoute("gone".into()).is_transient());
        assert!(!Error::Config("bad".into()).is_transient());
    }

    #[test]
    fn test_sqlite_cannot_open_maps_to_connection() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            Some("unable to open database file".into()),
        );
        let err: Error = err.into();
        assert!(err.is_connection_failure());
    }

    #[test]
    fn test_sqlite_readonly_is_not_transient() {
        let err = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_READONLY),
            Some("attempt to write a readonly database".into()),
        );
        let err: Error = err.into();
        assert!(!err.is_transient());
        assert!(matches!(err, Error::Sql(_)));
    }
}
