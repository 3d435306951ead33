//! Core collector trait and error type.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::exposition::{MetricDesc, Sample};

/// Errors that can occur while talking to the monitored server.
///
/// These never fail a scrape. The PostgreSQL collector folds them into the
/// `pg_up` / `pg_exporter_last_scrape_error` indicator metrics and keeps
/// serving; the type exists so the failure reason can be logged with
/// structure before it is swallowed.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Connecting to or querying the server failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The bounded per-operation timeout elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Capability contract between the registry and anything that produces
/// metric samples on demand.
///
/// # Error Handling Philosophy
///
/// `collect()` distinguishes between **probe failures** and **exporter
/// errors**:
///
/// - **Probe failures** (server unreachable, query error, timeout) are valid
///   observation results. They are reported through indicator samples such as
///   an "up" gauge, and `collect()` still returns normally so the endpoint
///   stays alive through a server outage.
///
/// - **Exporter errors** (invalid mapping tables, bad configuration) indicate
///   the exporter itself cannot function. Those are surfaced at construction
///   or registration time and are fatal at startup, never at scrape time.
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Static identities of every metric this collector can produce.
    ///
    /// Must not touch the monitored resource; the registry calls this once,
    /// at registration time, to detect identity collisions.
    fn describe(&self) -> Vec<MetricDesc>;

    /// Produce the current samples.
    ///
    /// Each call is independent and restartable; the only state carried
    /// between calls is the reused connection handle. Implementations must be
    /// safe under concurrent invocation and serialize access to any
    /// underlying connection themselves.
    async fn collect(&self) -> Vec<Sample>;

    /// Release any held resources. Idempotent; invoked once at shutdown, and
    /// a no-op for collectors that hold nothing.
    async fn close(&self) {}
}
