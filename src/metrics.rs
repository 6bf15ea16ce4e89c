//! Metrics helpers
//!
//! Thin wrappers around the `metrics` facade so call sites stay terse and
//! metric names stay in one place.

pub(crate) mod labels {
    pub const BACKEND_MYSQL: &str = "mysql";
    pub const BACKEND_SQLITE: &str = "sqlite";

    pub const ROLE_READ_ONLY: &str = "read_only";
    pub const ROLE_READ_WRITE: &str = "read_write";
}

pub(crate) mod counters {
    use metrics::counter;

    pub fn connect_attempted(backend: &str) {
        counter!("chimedb_connect_attempted_total", "backend" => backend.to_string()).increment(1);
    }

    pub fn connect_established(role: &str, backend: &str) {
        counter!(
            "chimedb_connect_established_total",
            "role" => role.to_string(),
            "backend" => backend.to_string()
        )
        .increment(1);
    }

    pub fn connect_failed(backend: &str) {
        counter!("chimedb_connect_failed_total", "backend" => backend.to_string()).increment(1);
    }

    pub fn tunnel_started() {
        counter!("chimedb_tunnel_started_total").increment(1);
    }

    pub fn tunnel_failed(reason: &str) {
        counter!("chimedb_tunnel_failed_total", "reason" => reason.to_string()).increment(1);
    }

    pub fn tunnel_health_check_failed() {
        counter!("chimedb_tunnel_health_check_failed_total").increment(1);
    }

    pub fn query_retried(backend: &str) {
        counter!("chimedb_query_retried_total", "backend" => backend.to_string()).increment(1);
    }
}

pub(crate) mod histograms {
    use metrics::histogram;

    pub fn connect_duration(backend: &str, millis: u64) {
        histogram!("chimedb_connect_duration_ms", "backend" => backend.to_string())
            .record(millis as f64);
    }

    pub fn tunnel_startup_duration(millis: u64) {
        histogram!("chimedb_tunnel_startup_duration_ms").record(millis as f64);
    }
}
