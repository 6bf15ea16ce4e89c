//! SQLite connector

use crate::db::{open_sqlite, Database, Target};
use crate::metrics::{counters, labels};
use crate::Result;

/// Connector for SQLite databases.
///
/// Wraps a filename or `file:` URI. A read-only connector derives a
/// `mode=ro` URI from a plain path; a value that is already a URI is used
/// as-is for either role.
#[derive(Debug)]
pub struct FileConnector {
    uri: String,
    database: Option<Database>,
}

impl FileConnector {
    /// Create a connector for the database at `db` (filename or URI).
    pub fn new(db: &str, read_write: bool) -> Self {
        // If we've already been handed a URI, we just roll with it
        let uri = if !read_write && !db.starts_with("file:") {
            format!("file:{db}?mode=ro")
        } else {
            db.to_string()
        };

        Self {
            uri,
            database: None,
        }
    }

    /// A human-readable description of this connector.
    pub fn description(&self) -> String {
        format!("Sqlite database at {}", self.uri)
    }

    /// Open and immediately discard a connection, to check the backend is
    /// reachable.
    pub(crate) fn probe(&self) -> Result<()> {
        counters::connect_attempted(labels::BACKEND_SQLITE);
        match open_sqlite(&self.uri) {
            Ok(conn) => {
                drop(conn);
                Ok(())
            }
            Err(err) => {
                counters::connect_failed(labels::BACKEND_SQLITE);
                Err(err)
            }
        }
    }

    /// The lazily-created database for this connector, (re-)opened if the
    /// cached one is missing or no longer usable.
    pub(crate) async fn database(&mut self) -> Result<&mut Database> {
        let usable = match &mut self.database {
            Some(database) => database.is_usable().await,
            None => false,
        };

        if !usable {
            self.database = Some(Database::new(Target::Sqlite {
                uri: self.uri.clone(),
            }));
        }

        let database = self.database.as_mut().expect("database just created");
        database.connect().await?;
        Ok(database)
    }

    /// Close the open database, if any.
    pub(crate) async fn close(&mut self) {
        if let Some(mut database) = self.database.take() {
            if let Err(err) = database.close().await {
                tracing::debug!("error closing {}: {err}", self.description());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_uri_derivation() {
        let connector = FileConnector::new("/data/chime.db", false);
        assert_eq!(
            connector.description(),
            "Sqlite database at file:/data/chime.db?mode=ro"
        );
    }

    #[test]
    fn test_read_write_path_unchanged() {
        let connector = FileConnector::new("/data/chime.db", true);
        assert_eq!(connector.description(), "Sqlite database at /data/chime.db");
    }

    #[test]
    fn test_uri_passed_through_for_read_only() {
        let connector = FileConnector::new("file:/data/chime.db?cache=shared", false);
        assert_eq!(
            connector.description(),
            "Sqlite database at file:/data/chime.db?cache=shared"
        );
    }

    #[test]
    fn test_probe_missing_file_read_only() {
        let connector = FileConnector::new("/nonexistent/dir/chime.db", false);
        let err = connector.probe().unwrap_err();
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn test_probe_and_database_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.db");
        let mut connector = FileConnector::new(path.to_str().unwrap(), true);

        connector.probe().unwrap();

        let database = connector.database().await.unwrap();
        database
            .execute("CREATE TABLE testtable (datum INTEGER)")
            .await
            .unwrap();
        connector.close().await;
    }
}
