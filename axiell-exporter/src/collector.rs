//! Metrics surface: turns scrapes into Prometheus metrics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::warn;

use crate::classify::Classifier;
use crate::client::AxiellClient;
use crate::config::ExporterConfig;
use crate::pipeline::{MetricSample, ScrapePipeline, ScrapeReport};

/// Static description of a metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub label_names: &'static [&'static str],
    pub metric_type: &'static str,
}

/// The `dataset_items` family.
pub const DATASET_ITEMS: MetricDescriptor = MetricDescriptor {
    name: "dataset_items",
    help: "Number of items in each database",
    label_names: &["dataset_name", "collection_type"],
    metric_type: "gauge",
};

/// Prefix of the exporter's own health metrics.
const EXPORTER_PREFIX: &str = "axiell_exporter";

/// Label set of a `dataset_items` series.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DatasetLabels {
    pub dataset_name: String,
    pub collection_type: String,
}

impl From<&MetricSample> for DatasetLabels {
    fn from(sample: &MetricSample) -> Self {
        Self {
            dataset_name: escape_label_value(&sample.label),
            collection_type: sample.category.as_str().to_string(),
        }
    }
}

/// Escape a label value for the text exposition format.
///
/// The encoder writes label values verbatim; `\`, `"` and line feeds are
/// escaped here.
fn escape_label_value(value: &str) -> String {
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

/// Scrape-driven collector for dataset item counts.
///
/// Holds no metric state: every [`collect`](Self::collect) or
/// [`render`](Self::render) runs a fresh scrape against the upstream API.
pub struct DatasetCollector {
    pipeline: ScrapePipeline,
}

impl DatasetCollector {
    /// Create a collector around a pipeline.
    pub fn new(pipeline: ScrapePipeline) -> Self {
        Self { pipeline }
    }

    /// Build the HTTP client and pipeline described by the configuration.
    pub fn from_config(config: &ExporterConfig) -> anyhow::Result<Self> {
        let client = AxiellClient::new(&config.api)?;
        let pipeline = ScrapePipeline::new(
            Arc::new(client),
            Classifier::from_enabled(config.classifier.enabled),
            config.api.max_concurrent_fetches,
        );
        Ok(Self::new(pipeline))
    }

    /// Describe the metric families this collector produces. Performs no I/O.
    pub fn describe(&self) -> Vec<MetricDescriptor> {
        vec![DATASET_ITEMS]
    }

    /// Run a scrape and return its samples in discovery order.
    ///
    /// Upstream failures are handled by the pipeline, so this always returns,
    /// possibly with no samples.
    pub async fn collect(&self) -> Vec<MetricSample> {
        self.pipeline
            .run_scrape()
            .await
            .into_iter()
            .map(|(_, sample)| sample)
            .collect()
    }

    /// Run a scrape and encode it in the OpenMetrics text format.
    pub async fn render(&self) -> String {
        let report = self.pipeline.scrape().await;
        encode_report(&report)
    }
}

/// Create a shareable collector handle.
pub type SharedCollector = Arc<DatasetCollector>;

/// Encode one scrape report.
///
/// A fresh registry is built for every report so no series outlives the
/// scrape that produced it.
pub fn encode_report(report: &ScrapeReport) -> String {
    let mut registry = Registry::default();

    let dataset_items = Family::<DatasetLabels, Gauge>::default();
    registry.register(DATASET_ITEMS.name, DATASET_ITEMS.help, dataset_items.clone());

    let mut owners: HashMap<DatasetLabels, &str> = HashMap::new();
    for (dataset, sample) in &report.results {
        let labels = DatasetLabels::from(sample);
        if let Some(previous) = owners.insert(labels.clone(), &dataset.raw_name) {
            warn!(
                previous = %previous,
                dataset = %dataset.raw_name,
                label = %sample.label,
                collection_type = %sample.category,
                "Datasets share a label set, keeping the later value"
            );
        }
        dataset_items.get_or_create(&labels).set(sample.value);
    }

    let exporter = registry.sub_registry_with_prefix(EXPORTER_PREFIX);

    let up = Gauge::<i64>::default();
    up.set(i64::from(report.is_up()));
    exporter.register("up", "Whether the last dataset discovery succeeded", up);

    let discovered = Gauge::<i64>::default();
    discovered.set(report.discovered as i64);
    exporter.register(
        "datasets_discovered",
        "Number of datasets returned by discovery",
        discovered,
    );

    let failures = Gauge::<i64>::default();
    failures.set(report.failures.len() as i64);
    exporter.register(
        "dataset_fetch_failures",
        "Number of datasets skipped because their item count could not be fetched",
        failures,
    );

    let duration = Gauge::<f64, AtomicU64>::default();
    duration.set(report.duration.as_secs_f64());
    exporter.register(
        "scrape_duration_seconds",
        "Time taken to scrape the upstream API",
        duration,
    );

    let mut body = String::new();
    if let Err(e) = encode(&mut body, &registry) {
        warn!(error = %e, "Failed to encode metrics");
    }
    body
}
