//! PostgreSQL collector.
//!
//! Owns the single connection to the monitored server. The connection is
//! opened lazily on the first scrape and reused afterwards; all access goes
//! through a mutex because a PostgreSQL session cannot be shared between
//! concurrent callers. A scrape never fails: connection and query problems
//! are reported through `pg_up` and `pg_exporter_last_scrape_error` so the
//! endpoint stays alive through a server outage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Column, Connection, PgConnection, Row};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::collector::maps::{ColumnUsage, MapsError, MetricMaps, NamespaceMapping};
use crate::collector::traits::{Collector, CollectorError};
use crate::config::ExporterConfig;
use crate::exposition::{MetricDesc, MetricType, Sample};

const UP_METRIC: &str = "pg_up";
const SCRAPES_METRIC: &str = "pg_exporter_scrapes_total";
const ERROR_METRIC: &str = "pg_exporter_last_scrape_error";
const DURATION_METRIC: &str = "pg_exporter_last_scrape_duration_seconds";

/// Collector for a single PostgreSQL server.
pub struct PgCollector {
    dsn: String,
    maps: MetricMaps,
    query_timeout: Duration,
    scrapes: AtomicU64,
    conn: Mutex<Option<PgConnection>>,
}

impl PgCollector {
    /// Create a collector bound to the configured server.
    ///
    /// Loads the metric mapping tables (builtin plus the optional user query
    /// file); no connection is opened until the first scrape.
    pub fn new(config: &ExporterConfig) -> Result<Self, MapsError> {
        let maps = MetricMaps::load(config.queries_path.as_deref())?;
        debug!(namespaces = maps.len(), "metric maps loaded");
        Ok(Self {
            dsn: config.dsn.clone(),
            maps,
            query_timeout: config.query_timeout,
            scrapes: AtomicU64::new(0),
            conn: Mutex::new(None),
        })
    }

    /// Hand out the usable connection, opening one if none is held.
    ///
    /// A previously opened handle is pinged first; a dead session is dropped
    /// (the server side reaps it) and replaced by a fresh connection.
    async fn ensure_connection<'a>(
        &self,
        slot: &'a mut Option<PgConnection>,
    ) -> Result<&'a mut PgConnection, CollectorError> {
        let reusable = match slot.as_mut() {
            Some(conn) => match timeout(self.query_timeout, conn.ping()).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    warn!(error = %e, "lost connection to server, reconnecting");
                    false
                }
                Err(_) => {
                    warn!(timeout = ?self.query_timeout, "connection ping timed out, reconnecting");
                    false
                }
            },
            None => false,
        };
        if !reusable {
            *slot = None;
        }

        match slot {
            Some(conn) => Ok(conn),
            slot @ None => {
                let conn = match timeout(self.query_timeout, PgConnection::connect(&self.dsn)).await
                {
                    Ok(Ok(conn)) => conn,
                    Ok(Err(e)) => return Err(CollectorError::Database(e)),
                    Err(_) => return Err(CollectorError::Timeout(self.query_timeout)),
                };
                info!("established connection to server");
                Ok(slot.insert(conn))
            }
        }
    }
}

#[async_trait]
impl Collector for PgCollector {
    fn name(&self) -> &str {
        "postgres"
    }

    fn describe(&self) -> Vec<MetricDesc> {
        let mut descs = self.maps.descriptors();
        descs.push(MetricDesc::new(
            UP_METRIC,
            "Whether the last scrape of metrics from PostgreSQL was able to connect to the server (1 for yes, 0 for no).",
            MetricType::Gauge,
            vec![],
        ));
        descs.push(MetricDesc::new(
            SCRAPES_METRIC,
            "Total number of times PostgreSQL was scraped for metrics.",
            MetricType::Counter,
            vec![],
        ));
        descs.push(MetricDesc::new(
            ERROR_METRIC,
            "Whether the last scrape of metrics from PostgreSQL resulted in an error (1 for error, 0 for success).",
            MetricType::Gauge,
            vec![],
        ));
        descs.push(MetricDesc::new(
            DURATION_METRIC,
            "Duration of the last scrape of metrics from PostgreSQL.",
            MetricType::Gauge,
            vec![],
        ));
        descs
    }

    async fn collect(&self) -> Vec<Sample> {
        let start = Instant::now();
        let scrapes = self.scrapes.fetch_add(1, Ordering::Relaxed) + 1;
        let mut samples = Vec::new();
        let mut up = 0.0;
        let mut errors = false;
        let mut drop_conn = false;

        let mut slot = self.conn.lock().await;
        match self.ensure_connection(&mut slot).await {
            Ok(conn) => {
                up = 1.0;
                for (namespace, mapping) in self.maps.iter() {
                    match timeout(self.query_timeout, scrape_namespace(conn, namespace, mapping))
                        .await
                    {
                        Ok(Ok(mut collected)) => samples.append(&mut collected),
                        Ok(Err(e)) => {
                            warn!(namespace, error = %e, "namespace scrape failed");
                            errors = true;
                        }
                        Err(_) => {
                            warn!(namespace, timeout = ?self.query_timeout, "namespace scrape timed out");
                            errors = true;
                            // A cancelled query leaves the session
                            // mid-protocol; discard the handle and reconnect
                            // on the next scrape.
                            drop_conn = true;
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "cannot connect to server");
                errors = true;
            }
        }
        if drop_conn {
            *slot = None;
        }
        drop(slot);

        samples.push(Sample::new(UP_METRIC, vec![], up, MetricType::Gauge));
        samples.push(Sample::new(SCRAPES_METRIC, vec![], scrapes as f64, MetricType::Counter));
        samples.push(Sample::new(
            ERROR_METRIC,
            vec![],
            if errors { 1.0 } else { 0.0 },
            MetricType::Gauge,
        ));
        samples.push(Sample::new(
            DURATION_METRIC,
            vec![],
            start.elapsed().as_secs_f64(),
            MetricType::Gauge,
        ));
        samples
    }

    async fn close(&self) {
        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.take() {
            match conn.close().await {
                Ok(()) => info!("server connection closed"),
                Err(e) => warn!(error = %e, "error closing server connection"),
            }
        }
    }
}

/// Run one namespace query and map its rows to samples.
async fn scrape_namespace(
    conn: &mut PgConnection,
    namespace: &str,
    mapping: &NamespaceMapping,
) -> Result<Vec<Sample>, CollectorError> {
    let query = match &mapping.query {
        Some(query) => query.clone(),
        None => format!("SELECT * FROM {namespace};"),
    };
    let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;

    let mut samples = Vec::new();
    for row in &rows {
        let labels = row_labels(row, mapping);
        for (idx, column) in row.columns().iter().enumerate() {
            let Some(column_mapping) = mapping.columns.get(column.name()) else {
                debug!(namespace, column = column.name(), "unmapped result column discarded");
                continue;
            };
            let Some(metric_type) = column_mapping.usage.metric_type() else {
                continue;
            };
            let Some(value) = column_value(row, idx) else {
                debug!(namespace, column = column.name(), "null or untranslatable value skipped");
                continue;
            };
            samples.push(Sample::new(
                format!("{namespace}_{}", column.name()),
                labels.clone(),
                value,
                metric_type,
            ));
        }
    }
    Ok(samples)
}

/// Pull the label columns out of a row, in result-set order.
fn row_labels(row: &PgRow, mapping: &NamespaceMapping) -> Vec<(String, String)> {
    let mut labels = Vec::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let is_label = mapping
            .columns
            .get(column.name())
            .is_some_and(|m| m.usage == ColumnUsage::Label);
        if is_label {
            let value = column_text(row, idx).unwrap_or_default();
            labels.push((column.name().to_string(), value));
        }
    }
    labels
}

/// Best-effort conversion of a dynamically typed column to a sample value.
///
/// The monitoring views are loosely typed: integers, floats, booleans,
/// numeric text, and timestamps (as epoch seconds) all map to f64. NULL and
/// anything else yield `None` and the series is skipped for this scrape.
fn column_value(row: &PgRow, idx: usize) -> Option<f64> {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|v| v as f64);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(f64::from);
    }
    if let Ok(v) = row.try_get::<Option<i16>, _>(idx) {
        return v.map(f64::from);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<f32>, _>(idx) {
        return v.map(f64::from);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(|v| if v { 1.0 } else { 0.0 });
    }
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
        return v.map(|v| v.timestamp_millis() as f64 / 1000.0);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.and_then(|v| v.parse().ok());
    }
    None
}

/// Best-effort conversion of a dynamically typed column to a label value.
fn column_text(row: &PgRow, idx: usize) -> Option<String> {
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v;
    }
    if let Ok(v) = row.try_get::<Option<sqlx::postgres::types::Oid>, _>(idx) {
        return v.map(|v| v.0.to_string());
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(|v| v.to_string());
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|v| v.to_string());
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(|v| v.to_string());
    }
    if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
        return v.map(|v| v.to_rfc3339());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dsn: &str) -> ExporterConfig {
        ExporterConfig {
            listen_address: "127.0.0.1:9187".parse().unwrap(),
            telemetry_path: "/metrics".to_string(),
            queries_path: None,
            dump_maps: false,
            query_timeout: Duration::from_secs(2),
            dsn: dsn.to_string(),
        }
    }

    fn sample_value(samples: &[Sample], name: &str) -> f64 {
        samples.iter().find(|s| s.name == name).map(|s| s.value).unwrap()
    }

    #[test]
    fn test_describe_without_connection() {
        // Construction and describe never touch the server: a nonsense DSN
        // is perfectly fine here.
        let collector = PgCollector::new(&test_config("postgres://nowhere/invalid")).unwrap();
        let descs = collector.describe();

        for name in [UP_METRIC, SCRAPES_METRIC, ERROR_METRIC, DURATION_METRIC] {
            assert!(descs.iter().any(|d| d.name == name), "missing {name}");
        }
        assert!(descs.iter().any(|d| d.name == "pg_stat_database_xact_commit"));
    }

    #[tokio::test]
    async fn test_collect_with_unreachable_server() {
        // Port 1 on loopback refuses connections immediately.
        let collector = PgCollector::new(&test_config("postgres://127.0.0.1:1/postgres")).unwrap();

        let samples = collector.collect().await;
        assert_eq!(sample_value(&samples, UP_METRIC), 0.0);
        assert_eq!(sample_value(&samples, ERROR_METRIC), 1.0);
        assert_eq!(sample_value(&samples, SCRAPES_METRIC), 1.0);

        // Scrapes stay independent; the counter keeps advancing.
        let samples = collector.collect().await;
        assert_eq!(sample_value(&samples, UP_METRIC), 0.0);
        assert_eq!(sample_value(&samples, SCRAPES_METRIC), 2.0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let collector = PgCollector::new(&test_config("postgres://127.0.0.1:1/postgres")).unwrap();
        collector.close().await;
        collector.close().await;
    }
}
