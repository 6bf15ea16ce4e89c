//! Connection broker
//!
//! A [`Broker`] caches the current connector for each role on behalf of one
//! execution context. Create one broker per thread or task; brokers own
//! non-`Sync` backend handles and cannot be shared, which is what makes the
//! per-context isolation structural.
//!
//! `connect` resolves configuration, walks each role's candidate list in
//! order, and caches the first connector whose probe succeeds. Subsequent
//! calls are no-ops until `reconnect` is requested or `close` is called.

use std::fmt;

use crate::config::{env_nonempty, resolve, test_enable, test_mode, CandidateProvider, Resolved, TEST_ENABLE_VAR};
use crate::connector::Connector;
use crate::db::Database;
use crate::metrics::{counters, labels};
use crate::{Error, Result};

/// Database access mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Read-only access
    ReadOnly,
    /// Read-write access
    ReadWrite,
}

impl Role {
    fn metric_label(self) -> &'static str {
        match self {
            Role::ReadOnly => labels::ROLE_READ_ONLY,
            Role::ReadWrite => labels::ROLE_READ_WRITE,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::ReadOnly => write!(f, "read-only"),
            Role::ReadWrite => write!(f, "read-write"),
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone, Default)]
pub struct BrokerOptions {
    /// Connect from every rank of a batch job, not just rank zero.
    pub all_ranks: bool,
}

/// Per-execution-context connection broker.
#[derive(Default)]
pub struct Broker {
    read_only: Option<Connector>,
    read_write: Option<Connector>,
    providers: Vec<Box<dyn CandidateProvider>>,
    options: BrokerOptions,
}

impl Broker {
    pub fn new() -> Self {
        Self::with_options(BrokerOptions::default())
    }

    pub fn with_options(options: BrokerOptions) -> Self {
        Self {
            read_only: None,
            read_write: None,
            providers: Vec::new(),
            options,
        }
    }

    /// Register an external configuration provider, consulted after the
    /// environment and RC files.
    pub fn register_provider(&mut self, provider: Box<dyn CandidateProvider>) {
        self.providers.push(provider);
    }

    /// The cached connector for `role`, if a connection has been made.
    pub fn current(&self, role: Role) -> Option<&Connector> {
        match role {
            Role::ReadOnly => self.read_only.as_ref(),
            Role::ReadWrite => self.read_write.as_ref(),
        }
    }

    /// Mutable access to the cached connector for `role`.
    pub fn current_mut(&mut self, role: Role) -> Option<&mut Connector> {
        match role {
            Role::ReadOnly => self.read_only.as_mut(),
            Role::ReadWrite => self.read_write.as_mut(),
        }
    }

    /// Connect to the database.
    ///
    /// A no-op when a connector is already cached for `role` and `reconnect`
    /// is false, and on ranks of a batch job that are not supposed to
    /// connect. Otherwise configuration is resolved once and both roles'
    /// empty cache slots are filled from their candidate lists.
    ///
    /// Fails with [`Error::NoRoute`] when no configuration source exists, and
    /// with [`Error::Connection`] when configuration was found but neither
    /// role could be connected.
    pub async fn connect(&mut self, role: Role, reconnect: bool) -> Result<()> {
        if !connect_this_rank(self.options.all_ranks) {
            return Ok(());
        }

        if env_nonempty(TEST_ENABLE_VAR).is_some() {
            test_enable();
        }

        if !reconnect && self.current(role).is_some() {
            tracing::debug!("connection already exists");
            return Ok(());
        }

        let resolved = resolve(test_mode(), &self.providers, true)?;

        if reconnect {
            self.close().await;
        }

        let Resolved {
            read_only,
            read_write,
            source,
        } = resolved;

        if self.read_only.is_none() {
            self.read_only = Self::try_candidates(Role::ReadOnly, read_only, &source).await;
        }
        if self.read_write.is_none() {
            self.read_write = Self::try_candidates(Role::ReadWrite, read_write, &source).await;
        }

        if self.read_only.is_none() && self.read_write.is_none() {
            return Err(Error::Connection(
                "connection data found, but no connection could be established".into(),
            ));
        }
        Ok(())
    }

    /// The database for `role`, lazily (re-)opened on the cached connector.
    pub async fn database(&mut self, role: Role) -> Result<&mut Database> {
        match self.current_mut(role) {
            Some(connector) => connector.database().await,
            None => Err(Error::Connection(format!(
                "no {role} connection established"
            ))),
        }
    }

    /// Close both connections and clear the cache slots.
    pub async fn close(&mut self) {
        if let Some(mut connector) = self.read_only.take() {
            connector.close().await;
        }
        if let Some(mut connector) = self.read_write.take() {
            connector.close().await;
        }
    }

    /// Try each candidate in order; the first whose probe succeeds wins.
    async fn try_candidates(
        role: Role,
        candidates: Vec<Connector>,
        source: &str,
    ) -> Option<Connector> {
        for mut connector in candidates {
            match connector.probe().await {
                Ok(()) => {
                    counters::connect_established(role.metric_label(), connector.backend_label());
                    tracing::info!(
                        "{role} connection to {} defined by {source} established",
                        connector.description()
                    );
                    return Some(connector);
                }
                Err(err) => {
                    tracing::debug!(
                        "unable to connect to {} defined by {source}: {err}",
                        connector.description()
                    );
                }
            }
        }

        tracing::warn!("could not establish {role} connection to the database");
        None
    }
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("read_only", &self.read_only)
            .field("read_write", &self.read_write)
            .field("providers", &self.providers.len())
            .field("options", &self.options)
            .finish()
    }
}

/// Returns true if this process should attempt a connection to the database
/// from its current batch-job rank (or if it is not part of a batch job).
pub(crate) fn connect_this_rank(all_ranks: bool) -> bool {
    if all_ranks {
        return true;
    }
    batch_rank().map_or(true, |rank| rank == 0)
}

/// The rank of this process in a batch job, if one is advertised by the
/// scheduler environment.
fn batch_rank() -> Option<u64> {
    ["SLURM_PROCID", "OMPI_COMM_WORLD_RANK", "PMI_RANK"]
        .iter()
        .find_map(|var| std::env::var(var).ok().and_then(|v| v.parse().ok()))
}
