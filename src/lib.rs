//! Prometheus exporter for PostgreSQL server metrics.
//!
//! The crate exposes a server's statistics views over HTTP in the text
//! exposition format. The core pieces:
//!
//! - **Config**: immutable [`ExporterConfig`](config::ExporterConfig)
//!   resolved once at startup (fail-fast on missing required settings)
//! - **Collector**: [`PgCollector`](collector::PgCollector) lazily opens a
//!   single connection to the monitored server and produces fresh samples
//!   on every scrape; outages show up as metric values, not exporter errors
//! - **Registry**: explicit [`Registry`](collector::Registry) that rejects
//!   duplicate metric identities at registration time
//! - **Server**: axum router serving the exposition payload and a landing
//!   page
//!
//! The binary in `main.rs` wires these together; the library surface exists
//! so the integration tests (and other tooling) can assemble the same
//! pipeline with their own collectors.

pub mod collector;
pub mod config;
pub mod exposition;
pub mod server;

pub use collector::{Collector, CollectorError, PgCollector, Registry, RegistryError};
pub use config::{ConfigError, ExporterConfig};
pub use exposition::{MetricDesc, MetricType, RenderError, Sample};
