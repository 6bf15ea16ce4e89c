//! Direct MySQL connector

use std::time::Duration;

use crate::config::{env_nonempty, CONNECT_TIMEOUT_VAR};
use crate::db::{dial_mysql, Database, Target};
use crate::metrics::{counters, labels};
use crate::Result;

/// Default bounded dial timeout, overridable via `CHIMEDB_CONNECT_TIMEOUT`.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection parameters for a MySQL server.
#[derive(Debug, Clone)]
pub struct MysqlOptions {
    /// Name of the database on the server
    pub db: String,
    /// MySQL user name
    pub user: String,
    /// MySQL password (empty if none)
    pub passwd: String,
    /// MySQL server hostname
    pub host: String,
    /// TCP port of the MySQL server
    pub port: u16,
}

/// Connector for a directly reachable MySQL server.
#[derive(Debug)]
pub struct SocketConnector {
    opts: MysqlOptions,
    database: Option<Database>,
}

impl SocketConnector {
    pub fn new(opts: MysqlOptions) -> Self {
        Self {
            opts,
            database: None,
        }
    }

    /// A human-readable description of this connector.
    pub fn description(&self) -> String {
        format!(
            "MySQL database at {} port {}",
            self.opts.host, self.opts.port
        )
    }

    /// Dial the server and immediately discard the connection.
    pub(crate) async fn probe(&mut self) -> Result<()> {
        counters::connect_attempted(labels::BACKEND_MYSQL);
        match dial_mysql(&self.opts, &self.opts.host, self.opts.port).await {
            Ok(conn) => {
                let _ = conn.disconnect().await;
                Ok(())
            }
            Err(err) => {
                counters::connect_failed(labels::BACKEND_MYSQL);
                Err(err)
            }
        }
    }

    /// The lazily-created database for this connector.
    pub(crate) async fn database(&mut self) -> Result<&mut Database> {
        let usable = match &mut self.database {
            Some(database) => database.is_usable().await,
            None => false,
        };

        if !usable {
            self.database = Some(Database::new(Target::MySql {
                opts: self.opts.clone(),
                host: self.opts.host.clone(),
                port: self.opts.port,
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

/// The bounded dial timeout: `CHIMEDB_CONNECT_TIMEOUT` seconds if set to an
/// integer, otherwise one second. A non-numeric override is logged and
/// ignored.
pub(crate) fn connect_timeout() -> Duration {
    match env_nonempty(CONNECT_TIMEOUT_VAR) {
        Some(value) => match value.parse::<u64>() {
            Ok(secs) => Duration::from_secs(secs),
            Err(_) => {
                tracing::warn!("{CONNECT_TIMEOUT_VAR} set to an invalid value: {value}");
                DEFAULT_CONNECT_TIMEOUT
            }
        },
        None => DEFAULT_CONNECT_TIMEOUT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn options() -> MysqlOptions {
        MysqlOptions {
            db: "chime".into(),
            user: "reader".into(),
            passwd: "".into(),
            host: "db.example.net".into(),
            port: 3306,
        }
    }

    #[test]
    fn test_description() {
        let connector = SocketConnector::new(options());
        assert_eq!(
            connector.description(),
            "MySQL database at db.example.net port 3306"
        );
    }

    #[test]
    #[serial]
    fn test_connect_timeout_default() {
        std::env::remove_var(CONNECT_TIMEOUT_VAR);
        assert_eq!(connect_timeout(), Duration::from_secs(1));
    }

    #[test]
    #[serial]
    fn test_connect_timeout_override() {
        std::env::set_var(CONNECT_TIMEOUT_VAR, "5");
        assert_eq!(connect_timeout(), Duration::from_secs(5));
        std::env::remove_var(CONNECT_TIMEOUT_VAR);
    }

    #[test]
    #[serial]
    fn test_connect_timeout_invalid_ignored() {
        std::env::set_var(CONNECT_TIMEOUT_VAR, "soon");
        assert_eq!(connect_timeout(), Duration::from_secs(1));
        std::env::remove_var(CONNECT_TIMEOUT_VAR);
    }

    #[tokio::test]
    #[serial]
    async fn test_probe_dial_failure() {
        let mut connector = SocketConnector::new(MysqlOptions {
            host: "127.0.0.1".into(),
            port: 9999,
            ..options()
        });
        let err = connector.probe().await.unwrap_err();
        assert!(err.is_connection_failure());
    }
}
