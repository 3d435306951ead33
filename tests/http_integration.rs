//! HTTP integration tests for the exporter.
//!
//! Covers the scrape lifecycle end to end against a real bound listener:
//! landing page, repeated scrapes, behavior with an unreachable database,
//! and serialization of concurrent scrapes on a shared connection handle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use postgres_exporter::collector::{Collector, PgCollector, Registry};
use postgres_exporter::config::ExporterConfig;
use postgres_exporter::exposition::{MetricDesc, MetricType, Sample};
use postgres_exporter::server::{AppState, create_router, landing_page};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

// =============================================================================
// Test Helpers
// =============================================================================

/// A healthy collector producing a labeled gauge and a scrape counter.
struct HealthyCollector {
    scrapes: AtomicU64,
}

impl HealthyCollector {
    fn new() -> Self {
        Self { scrapes: AtomicU64::new(0) }
    }
}

#[async_trait]
impl Collector for HealthyCollector {
    fn name(&self) -> &str {
        "healthy"
    }

    fn describe(&self) -> Vec<MetricDesc> {
        vec![
            MetricDesc::new(
                "test_rows",
                "Rows per table.",
                MetricType::Gauge,
                vec!["table".to_string()],
            ),
            MetricDesc::new(
                "test_scrapes_total",
                "Scrapes served by this collector.",
                MetricType::Counter,
                vec![],
            ),
        ]
    }

    async fn collect(&self) -> Vec<Sample> {
        let scrapes = self.scrapes.fetch_add(1, Ordering::Relaxed) + 1;
        vec![
            Sample::new(
                "test_rows",
                vec![("table".to_string(), "accounts".to_string())],
                42.0,
                MetricType::Gauge,
            ),
            Sample::new("test_scrapes_total", vec![], scrapes as f64, MetricType::Counter),
        ]
    }
}

/// A collector that mimics the connection-handle discipline: the whole
/// collect body runs under a mutex, and the guarded flag asserts that no
/// second caller ever observes the handle mid-use.
struct GuardedCollector {
    handle: Mutex<()>,
    in_use: AtomicBool,
}

impl GuardedCollector {
    fn new() -> Self {
        Self { handle: Mutex::new(()), in_use: AtomicBool::new(false) }
    }
}

#[async_trait]
impl Collector for GuardedCollector {
    fn name(&self) -> &str {
        "guarded"
    }

    fn describe(&self) -> Vec<MetricDesc> {
        vec![MetricDesc::new("guarded_up", "Guarded gauge.", MetricType::Gauge, vec![])]
    }

    async fn collect(&self) -> Vec<Sample> {
        let _guard = self.handle.lock().await;
        assert!(
            !self.in_use.swap(true, Ordering::SeqCst),
            "concurrent access to the connection handle"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.in_use.store(false, Ordering::SeqCst);
        vec![Sample::new("guarded_up", vec![], 1.0, MetricType::Gauge)]
    }
}

fn app_state(registry: Registry) -> AppState {
    AppState { registry: Arc::new(registry), landing_page: landing_page("/metrics") }
}

/// Start a server on a random port and return its base URL.
async fn start_test_server(registry: Registry) -> String {
    let router = create_router(app_state(registry), "/metrics");

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("failed to bind random port");
    let addr = listener.local_addr().expect("failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{addr}")
}

fn unreachable_pg_config() -> ExporterConfig {
    ExporterConfig {
        listen_address: "127.0.0.1:9187".parse().unwrap(),
        telemetry_path: "/metrics".to_string(),
        queries_path: None,
        dump_maps: false,
        query_timeout: Duration::from_secs(2),
        // Port 1 on loopback refuses connections immediately.
        dsn: "postgres://127.0.0.1:1/postgres".to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_landing_page_links_metrics() {
    let mut registry = Registry::new();
    registry.register(Arc::new(HealthyCollector::new())).unwrap();
    let base_url = start_test_server(registry).await;

    let resp = reqwest::get(&base_url).await.expect("failed to fetch landing page");
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("<a href='/metrics'>Metrics</a>"));
}

#[tokio::test]
async fn test_scrape_contains_declared_samples() {
    let mut registry = Registry::new();
    registry.register(Arc::new(HealthyCollector::new())).unwrap();
    let base_url = start_test_server(registry).await;

    let resp = reqwest::get(format!("{base_url}/metrics")).await.expect("scrape failed");
    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").and_then(|v| v.to_str().ok()),
        Some("text/plain; version=0.0.4")
    );

    let body = resp.text().await.unwrap();
    assert!(body.contains("# HELP test_rows Rows per table.\n"));
    assert!(body.contains("# TYPE test_rows gauge\n"));
    assert!(body.contains("test_rows{table=\"accounts\"} 42\n"));
}

#[tokio::test]
async fn test_repeated_scrapes_are_independent_collect_calls() {
    let mut registry = Registry::new();
    registry.register(Arc::new(HealthyCollector::new())).unwrap();
    let base_url = start_test_server(registry).await;
    let url = format!("{base_url}/metrics");

    let first = reqwest::get(&url).await.unwrap().text().await.unwrap();
    let second = reqwest::get(&url).await.unwrap().text().await.unwrap();

    assert!(first.contains("test_scrapes_total 1\n"));
    assert!(second.contains("test_scrapes_total 2\n"));
    // The gauge is re-produced every scrape, not cached.
    assert!(second.contains("test_rows{table=\"accounts\"} 42\n"));
}

#[tokio::test]
async fn test_unreachable_database_keeps_endpoint_alive() {
    let mut registry = Registry::new();
    registry.register(Arc::new(PgCollector::new(&unreachable_pg_config()).unwrap())).unwrap();
    let base_url = start_test_server(registry).await;
    let url = format!("{base_url}/metrics");

    let resp = reqwest::get(&url).await.expect("scrape failed");
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("pg_up 0\n"));
    assert!(body.contains("pg_exporter_last_scrape_error 1\n"));

    // The outage is data, not a crash: the next scrape still works.
    let resp = reqwest::get(&url).await.expect("second scrape failed");
    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.contains("pg_up 0\n"));
    assert!(body.contains("pg_exporter_scrapes_total 2\n"));
}

#[tokio::test]
async fn test_concurrent_scrapes_serialize_on_the_handle() {
    let mut registry = Registry::new();
    registry.register(Arc::new(GuardedCollector::new())).unwrap();
    let base_url = start_test_server(registry).await;
    let url = format!("{base_url}/metrics");

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let url = url.clone();
        tasks.push(tokio::spawn(async move { reqwest::get(&url).await.unwrap().status() }));
    }
    for task in tasks {
        // A violated single-caller assertion panics the handler and fails
        // the request.
        assert_eq!(task.await.unwrap(), 200);
    }
}
