//! Metric mapping tables.
//!
//! Maps result columns of monitoring queries to Prometheus metric
//! identities. Builtin tables cover the standard `pg_stat_*` views; a
//! user-supplied YAML file (`--extend.query-path`) can add further
//! namespaces, each with its own query. The tables drive both the scrape
//! loop and the `--dumpmaps` diagnostic mode, which only reads them and
//! never opens a connection.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::exposition::{MetricDesc, MetricType};

/// Failed to load or merge a user query definitions file.
#[derive(Debug, Error)]
pub enum MapsError {
    /// The file could not be read.
    #[error("failed to read query file: {0}")]
    Io(#[from] io::Error),

    /// The file is not valid YAML for the expected shape (including unknown
    /// `usage` strings).
    #[error("failed to parse query file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A namespace listed the same result column twice.
    #[error("namespace {namespace:?}: metric column {column:?} appears more than once")]
    DuplicateColumn { namespace: String, column: String },
}

/// How a result column is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnUsage {
    /// Ignored.
    Discard,
    /// Used as a label on every metric produced from the row.
    Label,
    /// Exported as a counter.
    Counter,
    /// Exported as a gauge.
    Gauge,
}

impl ColumnUsage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnUsage::Discard => "DISCARD",
            ColumnUsage::Label => "LABEL",
            ColumnUsage::Counter => "COUNTER",
            ColumnUsage::Gauge => "GAUGE",
        }
    }

    /// The metric type a value column maps to; `None` for non-value usages.
    pub fn metric_type(&self) -> Option<MetricType> {
        match self {
            ColumnUsage::Counter => Some(MetricType::Counter),
            ColumnUsage::Gauge => Some(MetricType::Gauge),
            ColumnUsage::Discard | ColumnUsage::Label => None,
        }
    }
}

/// Mapping for one result column.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    pub usage: ColumnUsage,
    #[serde(default)]
    pub description: String,
}

impl ColumnMapping {
    fn new(usage: ColumnUsage, description: &str) -> Self {
        Self { usage, description: description.to_string() }
    }
}

/// Mapping for one namespace: its columns and, optionally, a query that
/// replaces the default `SELECT * FROM <namespace>`.
#[derive(Debug, Clone, Default)]
pub struct NamespaceMapping {
    pub columns: BTreeMap<String, ColumnMapping>,
    pub query: Option<String>,
}

impl NamespaceMapping {
    /// Label schema of this namespace, in canonical (sorted) order.
    pub fn label_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, mapping)| mapping.usage == ColumnUsage::Label)
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// One entry of the user query definitions file.
#[derive(Debug, Deserialize)]
struct UserQuery {
    query: String,
    #[serde(default)]
    metrics: Vec<BTreeMap<String, ColumnMapping>>,
}

/// The full set of namespace mappings driving a scrape.
#[derive(Debug, Clone, Default)]
pub struct MetricMaps {
    namespaces: BTreeMap<String, NamespaceMapping>,
}

const PG_LOCKS_QUERY: &str = "SELECT pg_database.datname, tmp.mode, COALESCE(count, 0) AS count \
     FROM (VALUES ('accesssharelock'), ('rowsharelock'), ('rowexclusivelock'), \
     ('shareupdateexclusivelock'), ('sharelock'), ('sharerowexclusivelock'), \
     ('exclusivelock'), ('accessexclusivelock')) AS tmp(mode) \
     CROSS JOIN pg_database \
     LEFT JOIN (SELECT database, lower(mode) AS mode, count(*) AS count \
     FROM pg_locks WHERE database IS NOT NULL \
     GROUP BY database, lower(mode)) AS tmp2 \
     ON tmp.mode = tmp2.mode AND pg_database.oid = tmp2.database \
     ORDER BY 1";

const PG_STAT_ACTIVITY_QUERY: &str = "SELECT pg_database.datname, tmp.state, \
     COALESCE(count, 0) AS count, \
     COALESCE(max_tx_duration, 0) AS max_tx_duration \
     FROM (VALUES ('active'), ('idle'), ('idle in transaction'), \
     ('idle in transaction (aborted)'), ('fastpath function call'), ('disabled')) \
     AS tmp(state) CROSS JOIN pg_database \
     LEFT JOIN (SELECT datname, state, count(*) AS count, \
     MAX(extract(epoch FROM now() - xact_start))::float AS max_tx_duration \
     FROM pg_stat_activity GROUP BY datname, state) AS tmp2 \
     ON tmp.state = tmp2.state AND pg_database.datname = tmp2.datname";

impl MetricMaps {
    /// The builtin mapping tables for the standard statistics views.
    pub fn builtin() -> Self {
        use ColumnUsage::{Counter, Gauge, Label};

        let mut maps = Self::default();

        maps.insert_namespace(
            "pg_stat_bgwriter",
            None,
            &[
                ("checkpoints_timed", Counter, "Number of scheduled checkpoints that have been performed"),
                ("checkpoints_req", Counter, "Number of requested checkpoints that have been performed"),
                ("checkpoint_write_time", Counter, "Total amount of time that has been spent in the portion of checkpoint processing where files are written to disk, in milliseconds"),
                ("checkpoint_sync_time", Counter, "Total amount of time that has been spent in the portion of checkpoint processing where files are synchronized to disk, in milliseconds"),
                ("buffers_checkpoint", Counter, "Number of buffers written during checkpoints"),
                ("buffers_clean", Counter, "Number of buffers written by the background writer"),
                ("maxwritten_clean", Counter, "Number of times the background writer stopped a cleaning scan because it had written too many buffers"),
                ("buffers_backend", Counter, "Number of buffers written directly by a backend"),
                ("buffers_backend_fsync", Counter, "Number of times a backend had to execute its own fsync call (normally the background writer handles those even when the backend does its own write)"),
                ("buffers_alloc", Counter, "Number of buffers allocated"),
                ("stats_reset", Counter, "Time at which these statistics were last reset"),
            ],
        );

        maps.insert_namespace(
            "pg_stat_database",
            None,
            &[
                ("datid", Label, "OID of a database"),
                ("datname", Label, "Name of this database"),
                ("numbackends", Gauge, "Number of backends currently connected to this database. This is the only column in this view that returns a value reflecting current state; all other columns return the accumulated values since the last reset."),
                ("xact_commit", Counter, "Number of transactions in this database that have been committed"),
                ("xact_rollback", Counter, "Number of transactions in this database that have been rolled back"),
                ("blks_read", Counter, "Number of disk blocks read in this database"),
                ("blks_hit", Counter, "Number of times disk blocks were found already in the buffer cache, so that a read was not necessary (this only includes hits in the PostgreSQL buffer cache, not the operating system's file system cache)"),
                ("tup_returned", Counter, "Number of rows returned by queries in this database"),
                ("tup_fetched", Counter, "Number of rows fetched by queries in this database"),
                ("tup_inserted", Counter, "Number of rows inserted by queries in this database"),
                ("tup_updated", Counter, "Number of rows updated by queries in this database"),
                ("tup_deleted", Counter, "Number of rows deleted by queries in this database"),
                ("conflicts", Counter, "Number of queries canceled due to conflicts with recovery in this database"),
                ("temp_files", Counter, "Number of temporary files created by queries in this database"),
                ("temp_bytes", Counter, "Total amount of data written to temporary files by queries in this database"),
                ("deadlocks", Counter, "Number of deadlocks detected in this database"),
                ("blk_read_time", Counter, "Time spent reading data file blocks by backends in this database, in milliseconds"),
                ("blk_write_time", Counter, "Time spent writing data file blocks by backends in this database, in milliseconds"),
                ("stats_reset", Counter, "Time at which these statistics were last reset"),
            ],
        );

        maps.insert_namespace(
            "pg_stat_database_conflicts",
            None,
            &[
                ("datid", Label, "OID of a database"),
                ("datname", Label, "Name of this database"),
                ("confl_tablespace", Counter, "Number of queries in this database that have been canceled due to dropped tablespaces"),
                ("confl_lock", Counter, "Number of queries in this database that have been canceled due to lock timeouts"),
                ("confl_snapshot", Counter, "Number of queries in this database that have been canceled due to old snapshots"),
                ("confl_bufferpin", Counter, "Number of queries in this database that have been canceled due to pinned buffers"),
                ("confl_deadlock", Counter, "Number of queries in this database that have been canceled due to deadlocks"),
            ],
        );

        maps.insert_namespace(
            "pg_locks",
            Some(PG_LOCKS_QUERY),
            &[
                ("datname", Label, "Name of this database"),
                ("mode", Label, "Type of lock"),
                ("count", Gauge, "Number of locks"),
            ],
        );

        maps.insert_namespace(
            "pg_stat_activity",
            Some(PG_STAT_ACTIVITY_QUERY),
            &[
                ("datname", Label, "Name of this database"),
                ("state", Label, "Connection state"),
                ("count", Gauge, "Number of connections in this state"),
                ("max_tx_duration", Gauge, "Max duration in seconds any active transaction has been running"),
            ],
        );

        maps
    }

    /// The builtin tables, extended by a user query file when one is given.
    pub fn load(queries_path: Option<&Path>) -> Result<Self, MapsError> {
        let mut maps = Self::builtin();
        if let Some(path) = queries_path {
            maps.extend_from_file(path)?;
        }
        Ok(maps)
    }

    fn insert_namespace(
        &mut self,
        namespace: &str,
        query: Option<&str>,
        columns: &[(&str, ColumnUsage, &str)],
    ) {
        let mapping = NamespaceMapping {
            columns: columns
                .iter()
                .map(|(name, usage, description)| {
                    (name.to_string(), ColumnMapping::new(*usage, description))
                })
                .collect(),
            query: query.map(str::to_string),
        };
        self.namespaces.insert(namespace.to_string(), mapping);
    }

    /// Merge user query definitions from a YAML file.
    pub fn extend_from_file(&mut self, path: &Path) -> Result<(), MapsError> {
        let content = std::fs::read_to_string(path)?;
        self.extend_from_yaml(&content)
    }

    /// Merge user query definitions. A user namespace with the same name as
    /// a builtin replaces it.
    pub fn extend_from_yaml(&mut self, content: &str) -> Result<(), MapsError> {
        let user: BTreeMap<String, UserQuery> = serde_yaml::from_str(content)?;
        for (namespace, entry) in user {
            let mut columns = BTreeMap::new();
            for metric in entry.metrics {
                for (column, mapping) in metric {
                    if columns.insert(column.clone(), mapping).is_some() {
                        return Err(MapsError::DuplicateColumn { namespace, column });
                    }
                }
            }
            self.namespaces
                .insert(namespace, NamespaceMapping { columns, query: Some(entry.query) });
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &NamespaceMapping)> {
        self.namespaces.iter().map(|(name, mapping)| (name.as_str(), mapping))
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Derive the metric descriptors these tables can produce:
    /// `<namespace>_<column>` per value column, labeled with the namespace's
    /// label columns.
    pub fn descriptors(&self) -> Vec<MetricDesc> {
        let mut descs = Vec::new();
        for (namespace, mapping) in &self.namespaces {
            let label_names = mapping.label_names();
            for (column, column_mapping) in &mapping.columns {
                let Some(metric_type) = column_mapping.usage.metric_type() else {
                    continue;
                };
                descs.push(MetricDesc::new(
                    format!("{namespace}_{column}"),
                    column_mapping.description.clone(),
                    metric_type,
                    label_names.clone(),
                ));
            }
        }
        descs
    }

    /// Print the mapping tables. Used by `--dumpmaps`.
    pub fn dump(&self, out: &mut dyn io::Write) -> io::Result<()> {
        for (namespace, mapping) in &self.namespaces {
            writeln!(out, "{namespace}")?;
            if let Some(query) = &mapping.query {
                writeln!(out, "    query: {query}")?;
            }
            for (column, column_mapping) in &mapping.columns {
                writeln!(out, "    {column}")?;
                writeln!(out, "        usage: {}", column_mapping.usage.as_str())?;
                writeln!(out, "        description: {}", column_mapping.description)?;
            }
            writeln!(out)?;
        }
        Ok(())
    }
}
