//! Configuration-source resolution
//!
//! `resolve` walks an ordered list of configuration sources and returns the
//! candidate connector lists from the first source that is *present*, whether
//! or not connecting with it later succeeds:
//!
//! 1. the `CHIMEDB_SQLITE` environment variable (an SQLite path or URI),
//! 2. RC files: `$CHIMEDBRC` if set, then `./.chimedbrc`, `~/.chimedbrc`
//!    and `/etc/chime/chimedbrc`,
//! 3. any registered [`CandidateProvider`].
//!
//! In test-safe mode all of the above are disabled and replaced by
//! `CHIMEDB_TEST_SQLITE`, `CHIMEDB_TEST_RC` (rejected if it looks like a
//! deployment RC file) and, failing those, an in-memory SQLite database.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use super::schema::RcFile;
use crate::connector::{Connector, FileConnector};
use crate::{Error, Result};

pub(crate) const SQLITE_VAR: &str = "CHIMEDB_SQLITE";
pub(crate) const RC_VAR: &str = "CHIMEDBRC";
pub(crate) const TEST_SQLITE_VAR: &str = "CHIMEDB_TEST_SQLITE";
pub(crate) const TEST_RC_VAR: &str = "CHIMEDB_TEST_RC";
pub(crate) const TEST_ENABLE_VAR: &str = "CHIMEDB_TEST_ENABLE";
pub(crate) const CONNECT_TIMEOUT_VAR: &str = "CHIMEDB_CONNECT_TIMEOUT";

/// Shared-cache in-memory database, synthesized in test-safe mode when no
/// test-only source is configured. Lives until the last handle closes.
const MEMORY_DB: &str = "file::memory:?cache=shared";

// Test-safe mode is process-wide: it must cover every broker in the process,
// or a stray production connection would defeat its purpose.
static TEST_ENABLE: AtomicBool = AtomicBool::new(false);

/// Enable test-safe mode. Idempotent; cannot be undone.
///
/// Must be called (or `CHIMEDB_TEST_ENABLE` set) before the first
/// [`connect`](crate::Broker::connect).
pub fn test_enable() {
    if !TEST_ENABLE.swap(true, Ordering::Relaxed) {
        tracing::debug!("enabling test-safe mode");
    }
}

/// Whether test-safe mode is on.
pub(crate) fn test_mode() -> bool {
    TEST_ENABLE.load(Ordering::Relaxed)
}

/// Returns the value of the environment variable `name` if it is defined and
/// non-empty.
pub(crate) fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// An external source of candidate connector lists.
///
/// Providers are registered on a [`Broker`](crate::Broker) at startup and
/// consulted, in registration order, only when neither the environment nor an
/// RC file supplies configuration.
pub trait CandidateProvider: Send {
    /// Label used in log messages and connection reports.
    fn name(&self) -> &str;

    /// Produce ordered candidate lists (read-only, read-write).
    fn candidates(&self) -> Result<(Vec<Connector>, Vec<Connector>)>;
}

/// The outcome of a resolution pass.
#[derive(Debug)]
pub(crate) struct Resolved {
    pub read_only: Vec<Connector>,
    pub read_write: Vec<Connector>,
    /// Which source supplied the candidates, for diagnostics
    pub source: String,
}

/// Walk the configuration sources and return candidates from the first one
/// present, or fail with [`Error::NoRoute`].
pub(crate) fn resolve(
    test_mode: bool,
    providers: &[Box<dyn CandidateProvider>],
    rank_eligible: bool,
) -> Result<Resolved> {
    let sqlite_var = if test_mode { TEST_SQLITE_VAR } else { SQLITE_VAR };
    if let Some(db) = env_nonempty(sqlite_var) {
        return Ok(Resolved {
            read_only: vec![FileConnector::new(&db, false).into()],
            read_write: vec![FileConnector::new(&db, true).into()],
            source: sqlite_var.to_string(),
        });
    }

    if let Some(resolved) = try_rc_files(test_mode, rank_eligible)? {
        return Ok(resolved);
    }

    if test_mode {
        return Ok(Resolved {
            read_only: vec![FileConnector::new(MEMORY_DB, false).into()],
            read_write: vec![FileConnector::new(MEMORY_DB, true).into()],
            source: "test-safe mode".to_string(),
        });
    }

    for provider in providers {
        match provider.candidates() {
            Ok((read_only, read_write)) => {
                return Ok(Resolved {
                    read_only,
                    read_write,
                    source: provider.name().to_string(),
                });
            }
            Err(err) => {
                tracing::debug!(
                    provider = provider.name(),
                    "skipping failed configuration provider: {err}"
                );
            }
        }
    }

    Err(Error::NoRoute(
        "unable to find connection configuration for the database: provide a chimedb RC \
         file in one of the default locations or register a configuration provider"
            .into(),
    ))
}

/// The ordered list of RC files to probe.
fn rc_files(test_mode: bool) -> Result<Vec<PathBuf>> {
    if test_mode {
        return match env_nonempty(TEST_RC_VAR) {
            Some(value) if value.contains("chimedbrc") => Err(Error::Config(format!(
                "bad value for {TEST_RC_VAR}: cannot contain \"chimedbrc\""
            ))),
            Some(value) => Ok(vec![PathBuf::from(value)]),
            None => Ok(Vec::new()),
        };
    }

    let mut files = Vec::new();
    if let Some(value) = env_nonempty(RC_VAR) {
        files.push(PathBuf::from(value));
    }
    files.push(Path::new(".").join(".chimedbrc"));
    if let Some(home) = std::env::var_os("HOME") {
        files.push(Path::new(&home).join(".chimedbrc"));
    }
    files.push(PathBuf::from("/etc/chime/chimedbrc"));
    Ok(files)
}

/// Probe the RC files in order; the first one that parses to a non-empty
/// `chimedb` section wins.
fn try_rc_files(test_mode: bool, rank_eligible: bool) -> Result<Option<Resolved>> {
    for path in rc_files(test_mode)? {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => continue,
        };

        let rc: RcFile = match serde_yaml::from_str(&text) {
            Ok(rc) => rc,
            Err(err) => {
                tracing::debug!("skipping invalid RC file {}: {err}", path.display());
                continue;
            }
        };

        let Some(section) = rc.chimedb else {
            tracing::debug!("skipping RC file {} with no chimedb section", path.display());
            continue;
        };

        let source = path.display().to_string();
        let (read_only, read_write) = section.into_candidates(&source, rank_eligible)?;
        return Ok(Some(Resolved {
            read_only,
            read_write,
            source,
        }));
    }

    Ok(None)
}
