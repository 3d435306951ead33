//! Collector Layer
//!
//! The capability contract between the registry and anything that produces
//! metric samples on demand, the registry itself, and the PostgreSQL
//! collector with its metric mapping tables.
//!
//! # Architecture
//!
//! - [`Collector`]: core trait, `describe` (static identities, no server
//!   contact) plus `collect` (fresh samples per scrape) plus `close`
//! - [`Registry`]: explicit registry value; rejects duplicate metric
//!   identities at registration time, renders the exposition on demand
//! - [`PgCollector`]: lazily connects to the monitored server, serializes
//!   handle access, and reports outages as metric values instead of errors
//! - [`MetricMaps`]: tables mapping query result columns to metric
//!   identities, extensible through a user YAML file

mod maps;
mod postgres;
mod registry;
mod traits;

pub use maps::{ColumnMapping, ColumnUsage, MapsError, MetricMaps, NamespaceMapping};
pub use postgres::PgCollector;
pub use registry::{Registry, RegistryError};
pub use traits::{Collector, CollectorError};
