//! Collector registry.
//!
//! An explicit registry value owned by bootstrap and shared with the HTTP
//! server: collectors are registered once at startup, with identity-collision
//! checking against everything registered before them, and collected from on
//! every scrape.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::collector::traits::Collector;
use crate::exposition::{self, MetricDesc, RenderError, Sample};

/// Registration failed.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A collector declared a metric name that is already registered. The
    /// collision is rejected whether or not the label schemas agree: a
    /// same-shape duplicate would produce conflicting series, and a
    /// different-shape one a self-contradictory exposition.
    #[error("duplicate metric identity {name:?} (labels {labels:?})")]
    DuplicateMetric { name: String, labels: Vec<String> },
}

/// Registry of collectors and the metric identities they declared.
#[derive(Default)]
pub struct Registry {
    collectors: Vec<Arc<dyn Collector>>,
    descs: Vec<MetricDesc>,
    names: HashMap<String, Vec<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector.
    ///
    /// Calls [`Collector::describe`] and checks every declared identity
    /// against all previously registered ones (and against the rest of the
    /// batch); any collision rejects the whole collector and nothing is
    /// registered.
    pub fn register(&mut self, collector: Arc<dyn Collector>) -> Result<(), RegistryError> {
        let descs = collector.describe();

        let mut batch: HashMap<String, Vec<String>> = HashMap::new();
        for desc in &descs {
            let labels = desc.identity_labels();
            if self.names.contains_key(&desc.name) || batch.contains_key(&desc.name) {
                return Err(RegistryError::DuplicateMetric { name: desc.name.clone(), labels });
            }
            batch.insert(desc.name.clone(), labels);
        }

        tracing::info!(
            collector = collector.name(),
            metrics = descs.len(),
            "collector registered"
        );
        self.names.extend(batch);
        self.descs.extend(descs);
        self.collectors.push(collector);
        Ok(())
    }

    /// Number of registered collectors.
    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Collect from every registered collector and serialize the combined
    /// samples into the text exposition format.
    ///
    /// Collectors are independent and invoked in registration order, though
    /// no ordering is guaranteed to scrapers. The call returns only once
    /// every collector has finished; slow collectors bound their own work
    /// with per-operation timeouts.
    pub async fn render(&self) -> Result<String, RenderError> {
        let mut samples: Vec<Sample> = Vec::new();
        for collector in &self.collectors {
            let mut collected = collector.collect().await;
            debug!(collector = collector.name(), samples = collected.len(), "collected");
            samples.append(&mut collected);
        }
        exposition::render_text(&self.descs, &samples)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("collectors", &self.collectors.len())
            .field("metrics", &self.descs.len())
            .finish_non_exhaustive()
    }
}
