//! Connection broker for the CHIME database
//!
//! This crate resolves, establishes and maintains connections to the CHIME
//! database, which may be a local SQLite file or a remote MySQL server —
//! reachable directly or only through an SSH-forwarded port.
//!
//! # Architecture
//!
//! - **Config resolution**: an ordered chain of configuration sources; the
//!   first source that is *present* wins, even if connecting with it later
//!   fails ([`config`])
//! - **Connectors**: strategies for reaching one specific backend — SQLite
//!   file, direct MySQL socket, or MySQL through an SSH tunnel ([`connector`])
//! - **Broker**: a per-execution-context cache of the current connector for
//!   each access role, with connect/reconnect/close ([`Broker`])
//! - **Database**: the opaque handle handed to consumers, with retry-once
//!   execution and the atomic-block boundary ([`Database`])
//!
//! The configuration sources probed for, in order:
//!
//! * the environment variable `CHIMEDB_SQLITE`, containing the path to an
//!   SQLite database or an SQLite URI
//! * a YAML file named by the environment variable `CHIMEDBRC`
//! * a YAML file called `.chimedbrc` in the current directory
//! * a YAML file called `.chimedbrc` in the user's home directory
//! * a YAML file located at `/etc/chime/chimedbrc`
//! * any [`CandidateProvider`] registered on the broker
//!
//! If none of these can be found, [`Error::NoRoute`] is raised and the
//! connection attempt fails.
//!
//! # Test-safe mode
//!
//! To use this crate without accidentally running tests against the
//! production database, call [`test_enable`] (or set `CHIMEDB_TEST_ENABLE`)
//! before the first `connect`. Test mode disables all the standard
//! configuration sources and instead probes, in order, `CHIMEDB_TEST_SQLITE`,
//! `CHIMEDB_TEST_RC` (rejected if its value contains `chimedbrc`), and
//! finally synthesizes an empty in-memory SQLite database that lives until
//! `close` is called.
//!
//! # Example
//!
//! ```no_run
//! use chimedb::{Broker, Role};
//!
//! # async fn example() -> chimedb::Result<()> {
//! chimedb::test_enable();
//!
//! let mut broker = Broker::new();
//! broker.connect(Role::ReadWrite, false).await?;
//!
//! let db = broker.database(Role::ReadWrite).await?;
//! db.execute("CREATE TABLE datum (value INTEGER)").await?;
//!
//! broker.close().await;
//! # Ok(())
//! # }
//! ```
//!
//! Connections are not shared between execution contexts: create one
//! [`Broker`] per thread or task.

pub mod broker;
pub mod config;
pub mod connector;
pub mod db;
pub mod error;
pub mod logging;

pub(crate) mod metrics;

pub use broker::{Broker, BrokerOptions, Role};
pub use config::{test_enable, CandidateProvider};
pub use connector::{
    Connector, FileConnector, MysqlOptions, SocketConnector, TunnelSpec, TunnelledConnector,
};
pub use db::{Database, Handle};
pub use error::{Error, Result};
pub use logging::{log_policy, secure_logging, LogPolicy};
