//! Registered configuration providers
//!
//! Providers are the last production source consulted, and their candidate
//! lists are walked in order until one connector succeeds.

use chimedb::{Broker, CandidateProvider, Connector, Error, FileConnector, Role};
use serial_test::serial;
use std::path::PathBuf;

fn clear_env() {
    for var in [
        "CHIMEDB_SQLITE",
        "CHIMEDBRC",
        "CHIMEDB_TEST_ENABLE",
        "CHIMEDB_TEST_SQLITE",
        "CHIMEDB_TEST_RC",
    ] {
        std::env::remove_var(var);
    }
}

/// Point HOME at an empty directory so no `~/.chimedbrc` interferes.
fn isolate_home(dir: &tempfile::TempDir) -> Option<std::ffi::OsString> {
    let old = std::env::var_os("HOME");
    std::env::set_var("HOME", dir.path());
    old
}

fn restore_home(old: Option<std::ffi::OsString>) {
    match old {
        Some(home) => std::env::set_var("HOME", home),
        None => std::env::remove_var("HOME"),
    }
}

struct TwoCandidateProvider {
    good: PathBuf,
}

impl CandidateProvider for TwoCandidateProvider {
    fn name(&self) -> &str {
        "two-candidates"
    }

    fn candidates(&self) -> chimedb::Result<(Vec<Connector>, Vec<Connector>)> {
        let good = self.good.to_str().expect("utf-8 path");
        Ok((
            vec![
                FileConnector::new("/nonexistent/dir/first.db", false).into(),
                FileConnector::new(good, false).into(),
            ],
            vec![
                FileConnector::new("/nonexistent/dir/first.db", true).into(),
                FileConnector::new(good, true).into(),
            ],
        ))
    }
}

#[tokio::test]
#[serial]
async fn test_second_candidate_wins() {
    clear_env();
    let home = tempfile::tempdir().unwrap();
    let old_home = isolate_home(&home);

    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.db");
    {
        let conn = rusqlite::Connection::open(&good).unwrap();
        conn.execute("CREATE TABLE testtable (datum INTEGER)", [])
            .unwrap();
        conn.execute("INSERT INTO testtable VALUES (83)", [])
            .unwrap();
    }

    let mut broker = Broker::new();
    broker.register_provider(Box::new(TwoCandidateProvider { good }));
    broker.connect(Role::ReadOnly, false).await.unwrap();

    // The cached connector is the second candidate, never the first.
    let description = broker.current(Role::ReadOnly).unwrap().description();
    assert!(description.contains("good.db"));
    assert!(!description.contains("first.db"));

    let db = broker.database(Role::ReadOnly).await.unwrap();
    assert_eq!(
        db.query_i64("SELECT datum FROM testtable").await.unwrap(),
        Some(83)
    );

    broker.close().await;
    restore_home(old_home);
}

#[tokio::test]
#[serial]
async fn test_no_route_without_any_source() {
    clear_env();
    let home = tempfile::tempdir().unwrap();
    let old_home = isolate_home(&home);

    let mut broker = Broker::new();
    let err = broker
        .connect(Role::ReadOnly, false)
        .await
        .expect_err("no configuration source anywhere");
    assert!(matches!(err, Error::NoRoute(_)));

    restore_home(old_home);
}
