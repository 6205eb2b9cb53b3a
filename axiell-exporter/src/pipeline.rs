//! The per-scrape collection pipeline.
//!
//! Each scrape lists the datasets known upstream, fetches the item count of
//! every dataset, classifies it and returns one sample per dataset whose
//! count could be fetched. Nothing is kept between scrapes.
//!
//! Failure policy:
//!
//! - If discovery fails, the scrape is aborted and yields no samples. Without
//!   the dataset list there is nothing meaningful to report.
//! - If fetching one dataset's count fails, that dataset is logged and
//!   skipped; the remaining datasets are still reported.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use tracing::{debug, error, warn};

use crate::classify::{Category, Classifier};
use crate::client::{DatasetSource, UpstreamError};

/// A dataset discovered during one scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    /// Name exactly as returned by discovery.
    pub raw_name: String,
    /// Display label derived from the raw name.
    pub label: String,
    /// Category derived from the raw name.
    pub category: Category,
}

impl Dataset {
    /// Classify a raw name into a dataset.
    pub fn new(raw_name: impl Into<String>, classifier: &Classifier) -> Self {
        let raw_name = raw_name.into();
        let (label, category) = classifier.classify(&raw_name);
        Self {
            raw_name,
            label,
            category,
        }
    }
}

/// One `dataset_items` observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    /// Value of the `dataset_name` label.
    pub label: String,
    /// Value of the `collection_type` label.
    pub category: Category,
    /// Item count as reported upstream.
    pub value: i64,
}

/// A dataset whose count could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetFailure {
    pub dataset: String,
    pub error: UpstreamError,
}

/// How a scrape ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeOutcome {
    /// Discovery succeeded and every dataset was attempted.
    Completed,
    /// Discovery failed; no dataset was attempted.
    DiscoveryFailed(UpstreamError),
}

/// Everything one scrape produced.
#[derive(Debug, Clone)]
pub struct ScrapeReport {
    /// Samples in discovery order, paired with their dataset.
    pub results: Vec<(Dataset, MetricSample)>,
    /// Number of datasets returned by discovery.
    pub discovered: usize,
    /// Datasets skipped because their count fetch failed.
    pub failures: Vec<DatasetFailure>,
    pub outcome: ScrapeOutcome,
    pub duration: Duration,
}

impl ScrapeReport {
    fn aborted(error: UpstreamError, duration: Duration) -> Self {
        Self {
            results: Vec::new(),
            discovered: 0,
            failures: Vec::new(),
            outcome: ScrapeOutcome::DiscoveryFailed(error),
            duration,
        }
    }

    /// Whether discovery succeeded.
    pub fn is_up(&self) -> bool {
        self.outcome == ScrapeOutcome::Completed
    }
}

/// Runs scrapes against a dataset source.
#[derive(Clone)]
pub struct ScrapePipeline {
    source: Arc<dyn DatasetSource>,
    classifier: Classifier,
    max_concurrent_fetches: usize,
}

impl ScrapePipeline {
    /// Create a pipeline.
    ///
    /// `max_concurrent_fetches` bounds how many count requests are in flight
    /// at once; 1 fetches strictly one dataset after another.
    pub fn new(
        source: Arc<dyn DatasetSource>,
        classifier: Classifier,
        max_concurrent_fetches: usize,
    ) -> Self {
        Self {
            source,
            classifier,
            max_concurrent_fetches: max_concurrent_fetches.max(1),
        }
    }

    /// Run one scrape and return its samples in discovery order.
    pub async fn run_scrape(&self) -> Vec<(Dataset, MetricSample)> {
        self.scrape().await.results
    }

    /// Run one scrape and return the full report.
    ///
    /// Count fetches are driven by an ordered buffered stream: they may run
    /// concurrently but results are yielded in discovery order, and all of
    /// them have finished when this returns. Dropping the returned future
    /// abandons any fetches still in flight.
    pub async fn scrape(&self) -> ScrapeReport {
        let started = Instant::now();

        let names = match self.source.list_datasets().await {
            Ok(names) => names,
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Failed to fetch databases, aborting scrape");
                return ScrapeReport::aborted(e, started.elapsed());
            }
        };

        let discovered = names.len();
        debug!(datasets = discovered, "Discovered datasets");

        let fetched: Vec<(String, Result<i64, UpstreamError>)> = stream::iter(names)
            .map(|name| async move {
                let count = self.source.fetch_count(&name).await;
                (name, count)
            })
            .buffered(self.max_concurrent_fetches)
            .collect()
            .await;

        let mut results = Vec::with_capacity(fetched.len());
        let mut failures = Vec::new();

        for (name, count) in fetched {
            match count {
                Ok(value) => {
                    let dataset = Dataset::new(name, &self.classifier);
                    let sample = MetricSample {
                        label: dataset.label.clone(),
                        category: dataset.category,
                        value,
                    };
                    results.push((dataset, sample));
                }
                Err(e) => {
                    warn!(
                        dataset = %name,
                        kind = e.kind(),
                        error = %e,
                        "Failed to fetch number of items, skipping dataset"
                    );
                    failures.push(DatasetFailure {
                        dataset: name,
                        error: e,
                    });
                }
            }
        }

        let duration = started.elapsed();
        debug!(
            discovered,
            exported = results.len(),
            failed = failures.len(),
            duration_ms = duration.as_millis() as u64,
            "Scrape complete"
        );

        ScrapeReport {
            results,
            discovered,
            failures,
            outcome: ScrapeOutcome::Completed,
            duration,
        }
    }
}
