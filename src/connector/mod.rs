//! Connectors
//!
//! A connector knows how to reach one specific database backend. The closed
//! set of strategies:
//! * [`FileConnector`] — a local SQLite database (file or URI)
//! * [`SocketConnector`] — a directly reachable MySQL server
//! * [`TunnelledConnector`] — a MySQL server behind an SSH port-forward
//!
//! Connectors own their live handle (and tunnel) exclusively; they are never
//! shared across execution contexts.

mod file;
mod socket;
mod tunnel;

pub use file::FileConnector;
pub use socket::MysqlOptions;
pub use socket::SocketConnector;
pub use tunnel::{TunnelSpec, TunnelledConnector};

pub(crate) use socket::connect_timeout;
pub(crate) use tunnel::expand_user;

use crate::db::Database;
use crate::metrics::labels;
use crate::Result;

/// A strategy for reaching one specific database backend.
#[derive(Debug)]
pub enum Connector {
    /// Local SQLite database
    File(FileConnector),
    /// Directly reachable MySQL server
    Socket(SocketConnector),
    /// MySQL server behind an SSH port-forward
    Tunnel(TunnelledConnector),
}

impl Connector {
    /// Connector for a directly reachable MySQL server.
    pub fn socket(opts: MysqlOptions) -> Self {
        Connector::Socket(SocketConnector::new(opts))
    }

    /// Connector for a MySQL server behind an SSH tunnel.
    pub fn tunnelled(opts: MysqlOptions, spec: TunnelSpec, rank_eligible: bool) -> Self {
        Connector::Tunnel(TunnelledConnector::new(opts, spec, rank_eligible))
    }

    /// A human-readable description of this connector.
    pub fn description(&self) -> String {
        match self {
            Connector::File(c) => c.description(),
            Connector::Socket(c) => c.description(),
            Connector::Tunnel(c) => c.description(),
        }
    }

    /// Open a throwaway connection to check the backend is reachable.
    pub(crate) async fn probe(&mut self) -> Result<()> {
        match self {
            Connector::File(c) => c.probe(),
            Connector::Socket(c) => c.probe().await,
            Connector::Tunnel(c) => c.probe().await,
        }
    }

    /// The lazily-created database for this connector.
    pub async fn database(&mut self) -> Result<&mut Database> {
        match self {
            Connector::File(c) => c.database().await,
            Connector::Socket(c) => c.database().await,
            Connector::Tunnel(c) => c.database().await,
        }
    }

    /// Close the open database handle and tear down any tunnel.
    pub async fn close(&mut self) {
        match self {
            Connector::File(c) => c.close().await,
            Connector::Socket(c) => c.close().await,
            Connector::Tunnel(c) => c.close().await,
        }
    }

    pub(crate) fn backend_label(&self) -> &'static str {
        match self {
            Connector::File(_) => labels::BACKEND_SQLITE,
            Connector::Socket(_) | Connector::Tunnel(_) => labels::BACKEND_MYSQL,
        }
    }
}

impl From<FileConnector> for Connector {
    fn from(connector: FileConnector) -> Self {
        Connector::File(connector)
    }
}

impl From<SocketConnector> for Connector {
    fn from(connector: SocketConnector) -> Self {
        Connector::Socket(connector)
    }
}

impl From<TunnelledConnector> for Connector {
    fn from(connector: TunnelledConnector) -> Self {
        Connector::Tunnel(connector)
    }
}
