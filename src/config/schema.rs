//! RC file schema
//!
//! An RC file is a YAML mapping under a top-level `chimedb` key:
//!
//! ```yaml
//! chimedb:
//!     db_type:         mysql
//!     db:              <database name>
//!     user_ro:         <read-only username>
//!     passwd_ro:       <read-only password>
//!     user_rw:         <read-write username>
//!     passwd_rw:       <read-write password>
//!     host:            <database hostname>
//!     port:            <database port number, default 3306>
//!     tunnel_host:     <connection tunnel hostname>
//!     tunnel_user:     <connection tunnel username>
//!     tunnel_identity: <connection tunnel identity file>
//! ```
//!
//! Or, for an SQLite database:
//!
//! ```yaml
//! chimedb:
//!     db_type:         sqlite
//!     db:              <filename or URI>
//! ```
//!
//! Omit the `tunnel_` entries if no tunnel is required; omit the password
//! entries if no password is needed.

use serde::Deserialize;

use crate::connector::{expand_user, Connector, FileConnector, MysqlOptions, TunnelSpec};
use crate::{Error, Result};

/// Top-level RC file document
#[derive(Debug, Deserialize)]
pub(crate) struct RcFile {
    /// The `chimedb` section; a file without one is skipped
    #[serde(default)]
    pub chimedb: Option<DbSection>,
}

/// The `chimedb:` mapping
#[derive(Debug, Deserialize)]
pub(crate) struct DbSection {
    /// `mysql` (default) or `sqlite`
    #[serde(default)]
    pub db_type: Option<String>,

    /// Database name (MySQL) or filename/URI (SQLite)
    pub db: String,

    #[serde(default)]
    pub user_ro: String,
    #[serde(default)]
    pub passwd_ro: String,
    #[serde(default)]
    pub user_rw: String,
    #[serde(default)]
    pub passwd_rw: String,

    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub tunnel_host: Option<String>,
    #[serde(default)]
    pub tunnel_user: Option<String>,
    #[serde(default)]
    pub tunnel_identity: Option<String>,
}

fn default_port() -> u16 {
    3306
}

impl DbSection {
    /// Build the per-role candidate lists described by this section.
    ///
    /// `source` names the file the section came from and is used in error
    /// messages. A `tunnel_host` entry upgrades the MySQL connector to the
    /// tunnelled variant.
    pub(crate) fn into_candidates(
        self,
        source: &str,
        rank_eligible: bool,
    ) -> Result<(Vec<Connector>, Vec<Connector>)> {
        let db_type = self
            .db_type
            .as_deref()
            .unwrap_or("mysql")
            .to_ascii_lowercase();

        match db_type.as_str() {
            "sqlite" => Ok((
                vec![Connector::from(FileConnector::new(&self.db, false))],
                vec![Connector::from(FileConnector::new(&self.db, true))],
            )),
            "mysql" => {
                let ro = MysqlOptions {
                    db: self.db.clone(),
                    user: self.user_ro,
                    passwd: self.passwd_ro,
                    host: self.host.clone(),
                    port: self.port,
                };
                let rw = MysqlOptions {
                    db: self.db,
                    user: self.user_rw,
                    passwd: self.passwd_rw,
                    host: self.host,
                    port: self.port,
                };

                let tunnel = self.tunnel_host.map(|host| TunnelSpec {
                    host,
                    user: self.tunnel_user,
                    identity: self.tunnel_identity.as_deref().map(expand_user),
                });

                let build = |opts: MysqlOptions| match &tunnel {
                    Some(spec) => Connector::tunnelled(opts, spec.clone(), rank_eligible),
                    None => Connector::socket(opts),
                };

                Ok((vec![build(ro)], vec![build(rw)]))
            }
            other => Err(Error::Config(format!(
                "invalid database type ({other}) in {source}"
            ))),
        }
    }
}
