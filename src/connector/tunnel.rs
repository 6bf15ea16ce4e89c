//! Tunnelled MySQL connector
//!
//! Reaches a MySQL server through an SSH local-port-forward. The forward is
//! provided by the system `ssh` client run with `-N -L`; the child process is
//! owned by the connector and killed when the connector closes.
//!
//! `ensure_route` is a small state machine. With no tunnel recorded it
//! establishes one, recording the OS-assigned local port and invalidating any
//! cached database handle. With a tunnel recorded it probes the bound port
//! with a short timeout and, if the forward has died, tears it down and
//! re-establishes.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::process::{Child, Command};

use super::socket::MysqlOptions;
use crate::db::{dial_mysql, Database, Target};
use crate::metrics::{counters, histograms, labels};
use crate::{Error, Result};

// This cannot be "localhost" because that is used as a special value by MySQL
// to indicate that it should connect to a local socket
pub(crate) const LOCALHOST: &str = "127.0.0.1";

/// How long a health-check probe of the bound local port may take.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for a freshly spawned forward to start accepting.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll interval while waiting for the forward to come up.
const STARTUP_POLL: Duration = Duration::from_millis(100);

/// SSH endpoint used to reach the database host.
#[derive(Debug, Clone)]
pub struct TunnelSpec {
    /// Hostname to tunnel through
    pub host: String,
    /// User name on the tunnel server, if not the ssh default
    pub user: Option<String>,
    /// Private key used to log into the tunnel server
    pub identity: Option<PathBuf>,
}

/// Connector for a MySQL server reachable only through an SSH tunnel.
#[derive(Debug)]
pub struct TunnelledConnector {
    opts: MysqlOptions,
    spec: TunnelSpec,
    rank_eligible: bool,
    tunnel: Option<Tunnel>,
    database: Option<Database>,
}

impl TunnelledConnector {
    pub fn new(opts: MysqlOptions, spec: TunnelSpec, rank_eligible: bool) -> Self {
        Self {
            opts,
            spec,
            rank_eligible,
            tunnel: None,
            database: None,
        }
    }

    /// A human-readable description of this connector.
    pub fn description(&self) -> String {
        let mut out = format!(
            "MySQL database at {} port {} tunnelled through {} to localhost",
            self.opts.host, self.opts.port, self.spec.host
        );
        if let Some(tunnel) = &self.tunnel {
            out.push_str(&format!(" port {}", tunnel.local_port));
        }
        out
    }

    /// Make sure a live forward to the database exists.
    ///
    /// Non-eligible ranks never establish a tunnel; their subsequent dials
    /// fail with a connection error instead.
    pub(crate) async fn ensure_route(&mut self) -> Result<()> {
        if let Some(tunnel) = &self.tunnel {
            if port_reachable(tunnel.local_port).await {
                return Ok(());
            }

            counters::tunnel_health_check_failed();
            tracing::debug!("tunnel through {} is down, re-establishing", self.spec.host);
            if let Some(tunnel) = self.tunnel.take() {
                tunnel.stop().await;
            }
        }

        if !self.rank_eligible {
            return Ok(());
        }

        // Abandon an existing database connection: if the tunnel isn't
        // active, presumably the connection isn't working
        self.database = None;

        let tunnel = Tunnel::start(&self.spec, &self.opts.host, self.opts.port).await?;
        self.tunnel = Some(tunnel);
        Ok(())
    }

    /// The bound local port of the active tunnel.
    fn local_port(&self) -> Result<u16> {
        match &self.tunnel {
            Some(tunnel) => Ok(tunnel.local_port),
            None => Err(Error::Connection(format!(
                "no tunnel through {} established",
                self.spec.host
            ))),
        }
    }

    /// Dial through the tunnel and immediately discard the connection.
    pub(crate) async fn probe(&mut self) -> Result<()> {
        self.ensure_route().await?;
        let port = self.local_port()?;

        counters::connect_attempted(labels::BACKEND_MYSQL);
        match dial_mysql(&self.opts, LOCALHOST, port).await {
            Ok(conn) => {
                let _ = conn.disconnect().await;
                Ok(())
            }
            Err(err) => {
                // The forward is up but the far side refused: stop the tunnel
                // so the next attempt starts from a clean slate.
                counters::connect_failed(labels::BACKEND_MYSQL);
                if let Some(tunnel) = self.tunnel.take() {
                    tunnel.stop().await;
                }
                Err(err)
            }
        }
    }

    /// The lazily-created database for this connector, dialled against the
    /// tunnel's local endpoint.
    pub(crate) async fn database(&mut self) -> Result<&mut Database> {
        self.ensure_route().await?;
        let port = self.local_port()?;

        let usable = match &mut self.database {
            Some(database) => database.is_usable().await,
            None => false,
        };

        if !usable {
            self.database = Some(Database::new(Target::MySql {
                opts: self.opts.clone(),
                host: LOCALHOST.to_string(),
                port,
            }));
        }

        let database = self.database.as_mut().expect("database just created");
        database.connect().await?;
        Ok(database)
    }

    /// Close the open database and stop the tunnel.
    pub(crate) async fn close(&mut self) {
        if let Some(mut database) = self.database.take() {
            if let Err(err) = database.close().await {
                tracing::debug!("error closing {}: {err}", self.description());
            }
        }
        if let Some(tunnel) = self.tunnel.take() {
            tracing::debug!("stopping tunnel");
            tunnel.stop().await;
        }
    }
}

/// A running SSH local-port-forward.
#[derive(Debug)]
pub(crate) struct Tunnel {
    child: Child,
    pub(crate) local_port: u16,
}

impl Tunnel {
    /// Spawn a forward of `remote_host:remote_port` through `spec.host` onto
    /// an OS-assigned local port, and wait for it to come up.
    pub(crate) async fn start(
        spec: &TunnelSpec,
        remote_host: &str,
        remote_port: u16,
    ) -> Result<Self> {
        if let Some(identity) = &spec.identity {
            if !identity.exists() {
                counters::tunnel_failed("auth");
                return Err(Error::NoRoute(format!(
                    "no authentication option for {}",
                    spec.host
                )));
            }
        }

        tracing::debug!(
            "attempting SSH tunnel to {remote_host}:{remote_port} through {}",
            spec.host
        );

        let local_port = free_local_port()?;
        let started = Instant::now();

        let mut command = Command::new("ssh");
        command
            .arg("-N")
            .args(["-o", "BatchMode=yes"])
            .args(["-o", "ExitOnForwardFailure=yes"])
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg("-L")
            .arg(format!(
                "{LOCALHOST}:{local_port}:{remote_host}:{remote_port}"
            ));
        if let Some(user) = &spec.user {
            command.arg("-l").arg(user);
        }
        if let Some(identity) = &spec.identity {
            command.arg("-i").arg(identity);
        }
        command
            .arg(&spec.host)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            counters::tunnel_failed("spawn");
            Error::NoRoute(format!("could not tunnel through {}: {err}", spec.host))
        })?;

        // Wait for the forward to be established
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        loop {
            if let Some(status) = child.try_wait()? {
                counters::tunnel_failed("exited");
                return Err(Error::NoRoute(format!(
                    "could not tunnel through {} (ssh exited with {status})",
                    spec.host
                )));
            }

            if port_reachable(local_port).await {
                break;
            }

            if Instant::now() >= deadline {
                let _ = child.kill().await;
                counters::tunnel_failed("timeout");
                return Err(Error::Connection(format!(
                    "an error occurred while setting up the tunnel through {}",
                    spec.host
                )));
            }

            tokio::time::sleep(STARTUP_POLL).await;
        }

        counters::tunnel_started();
        histograms::tunnel_startup_duration(started.elapsed().as_millis() as u64);

        Ok(Self { child, local_port })
    }

    /// Kill the forward.
    pub(crate) async fn stop(mut self) {
        let _ = self.child.kill().await;
    }
}

/// Returns true if a connection to local port `port` succeeds within the
/// probe timeout.
pub(crate) async fn port_reachable(port: u16) -> bool {
    matches!(
        tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((LOCALHOST, port))).await,
        Ok(Ok(_))
    )
}

/// Ask the OS for a currently free loopback port.
///
/// The listener is dropped before ssh binds the port, which leaves a small
/// window in which another process could claim it; a tunnel that then fails
/// to start is reported like any other forwarding failure.
fn free_local_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind((LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Expand a leading `~/` to the user's home directory.
pub(crate) fn expand_user(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> MysqlOptions {
        MysqlOptions {
            db: "chime".into(),
            user: "reader".into(),
            passwd: "".into(),
            host: "db.internal".into(),
            port: 3306,
        }
    }

    fn spec() -> TunnelSpec {
        TunnelSpec {
            host: "gateway.example.net".into(),
            user: Some("chime".into()),
            identity: None,
        }
    }

    #[tokio::test]
    async fn test_probe_dead_port_is_bounded() {
        let started = Instant::now();
        assert!(!port_reachable(1).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_probe_live_port() {
        let listener = tokio::net::TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_reachable(port).await);
    }

    #[tokio::test]
    async fn test_missing_identity_is_no_route() {
        let spec = TunnelSpec {
            identity: Some(PathBuf::from("/nonexistent/id_ed25519")),
            ..spec()
        };
        let err = Tunnel::start(&spec, "db.internal", 3306).await.unwrap_err();
        assert!(matches!(err, Error::NoRoute(_)));
        assert!(err.to_string().contains("gateway.example.net"));
    }

    #[test]
    fn test_description_without_tunnel() {
        let connector = TunnelledConnector::new(options(), spec(), true);
        assert_eq!(
            connector.description(),
            "MySQL database at db.internal port 3306 tunnelled through gateway.example.net to localhost"
        );
    }

    #[tokio::test]
    async fn test_ineligible_rank_does_not_tunnel() {
        let mut connector = TunnelledConnector::new(options(), spec(), false);
        connector.ensure_route().await.unwrap();
        assert!(connector.tunnel.is_none());

        let err = connector.probe().await.unwrap_err();
        assert!(err.is_connection_failure());
    }

    #[test]
    #[serial_test::serial]
    fn test_expand_user() {
        let old_home = std::env::var_os("HOME");
        std::env::set_var("HOME", "/home/chime");
        assert_eq!(
            expand_user("~/.ssh/id_rsa"),
            PathBuf::from("/home/chime/.ssh/id_rsa")
        );
        assert_eq!(expand_user("/etc/key"), PathBuf::from("/etc/key"));
        match old_home {
            Some(home) => std::env::set_var("HOME", home),
            None => std::env::remove_var("HOME"),
        }
    }

    #[test]
    fn test_free_local_port() {
        let port = free_local_port().unwrap();
        assert_ne!(port, 0);
    }
}
