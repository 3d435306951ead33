//! Prometheus text exposition format (version 0.0.4).
//!
//! Defines the sample/descriptor model shared by the collector layer and the
//! renderer that turns collected samples into the payload served at the
//! telemetry path. Samples are immutable and produced fresh on every scrape;
//! nothing in here caches.

use std::collections::{HashMap, HashSet};
use std::fmt::Write;

use thiserror::Error;

/// Content type reported for the rendered payload.
pub const TEXT_FORMAT_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Serializing samples into the exposition format failed.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Writing into the output buffer failed.
    #[error("failed to serialize exposition payload: {0}")]
    Format(#[from] std::fmt::Error),
}

/// Metric type tag carried by descriptors and samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    /// Monotonically increasing value.
    Counter,
    /// Point-in-time value.
    Gauge,
}

impl MetricType {
    /// Spelling used in `# TYPE` lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Static identity of a metric: name, help text, type, and label schema.
///
/// Declared by [`Collector::describe`](crate::collector::Collector::describe)
/// without touching the monitored server; the registry uses these to detect
/// identity collisions at registration time and to emit `# HELP`/`# TYPE`
/// headers when rendering.
#[derive(Debug, Clone)]
pub struct MetricDesc {
    /// Fully qualified metric name.
    pub name: String,
    /// Help text for the `# HELP` line.
    pub help: String,
    /// Metric type for the `# TYPE` line.
    pub metric_type: MetricType,
    /// Names of the labels every sample of this metric carries.
    pub label_names: Vec<String>,
}

impl MetricDesc {
    pub fn new(
        name: impl Into<String>,
        help: impl Into<String>,
        metric_type: MetricType,
        label_names: Vec<String>,
    ) -> Self {
        Self { name: name.into(), help: help.into(), metric_type, label_names }
    }

    /// Label schema in canonical (sorted) order, for identity comparison.
    pub fn identity_labels(&self) -> Vec<String> {
        let mut labels = self.label_names.clone();
        labels.sort_unstable();
        labels
    }
}

/// One collected sample: an immutable (name, labels, value, type) tuple.
#[derive(Debug, Clone)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
    pub metric_type: MetricType,
}

impl Sample {
    pub fn new(
        name: impl Into<String>,
        labels: Vec<(String, String)>,
        value: f64,
        metric_type: MetricType,
    ) -> Self {
        Self { name: name.into(), labels, value, metric_type }
    }
}

/// Serialize samples into the text format, using `descs` for `# HELP` and
/// `# TYPE` headers.
///
/// Samples are grouped by metric name: declared names first, in descriptor
/// order, then any undeclared names in first-seen order with a `# TYPE` line
/// derived from the sample's own tag. Declared metrics with no samples this
/// scrape are omitted entirely.
pub fn render_text(descs: &[MetricDesc], samples: &[Sample]) -> Result<String, RenderError> {
    let mut by_name: HashMap<&str, Vec<&Sample>> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for sample in samples {
        by_name
            .entry(sample.name.as_str())
            .or_insert_with(|| {
                order.push(sample.name.as_str());
                Vec::new()
            })
            .push(sample);
    }

    let mut buffer = String::with_capacity(4096);
    let mut emitted: HashSet<&str> = HashSet::new();

    for desc in descs {
        let Some(group) = by_name.get(desc.name.as_str()) else {
            continue;
        };
        emitted.insert(desc.name.as_str());
        let name = sanitize_metric_name(&desc.name);
        writeln!(buffer, "# HELP {} {}", name, escape_help(&desc.help))?;
        writeln!(buffer, "# TYPE {} {}", name, desc.metric_type.as_str())?;
        for sample in group {
            write_sample_line(&mut buffer, sample)?;
        }
    }

    for name in order {
        if emitted.contains(name) {
            continue;
        }
        let group = &by_name[name];
        writeln!(
            buffer,
            "# TYPE {} {}",
            sanitize_metric_name(name),
            group[0].metric_type.as_str()
        )?;
        for sample in group {
            write_sample_line(&mut buffer, sample)?;
        }
    }

    Ok(buffer)
}

fn write_sample_line(buffer: &mut String, sample: &Sample) -> std::fmt::Result {
    buffer.push_str(&sanitize_metric_name(&sample.name));
    if !sample.labels.is_empty() {
        buffer.push('{');
        for (i, (key, value)) in sample.labels.iter().enumerate() {
            if i > 0 {
                buffer.push(',');
            }
            write!(buffer, "{}=\"{}\"", sanitize_label_key(key), escape_label_value(value))?;
        }
        buffer.push('}');
    }
    writeln!(buffer, " {}", format_value(sample.value))
}

/// Format a sample value using the exposition spellings for the
/// non-finite cases.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Sanitize a metric name to `[a-zA-Z_:][a-zA-Z0-9_:]*`.
pub fn sanitize_metric_name(name: &str) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = if i == 0 {
                c.is_ascii_alphabetic() || c == '_' || c == ':'
            } else {
                c.is_ascii_alphanumeric() || c == '_' || c == ':'
            };
            if valid { c } else { '_' }
        })
        .collect()
}

/// Sanitize a label key to `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn sanitize_label_key(key: &str) -> String {
    key.chars()
        .enumerate()
        .map(|(i, c)| {
            let valid = if i == 0 {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if valid { c } else { '_' }
        })
        .collect()
}

/// Escape a label value: backslashes, double quotes, and line feeds.
pub fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Escape help text: backslashes and line feeds (quotes stay literal).
pub fn escape_help(help: &str) -> String {
    let mut escaped = String::with_capacity(help.len());
    for c in help.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}
