//! Prometheus metrics exporter for Axiell Collections.
//!
//! On every scrape the exporter lists the databases known to an Axiell
//! `wwwopac.ashx` endpoint, fetches the item count of each one and exposes
//! them as the `dataset_items` gauge.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Axiell API    │<────│    Pipeline     │<────│   HTTP Server   │
//! │ (wwwopac.ashx)  │     │ (per scrape)    │     │   (/metrics)    │
//! └─────────────────┘     └─────────────────┘     └─────────────────┘
//! ```
//!
//! Nothing is cached between scrapes. A failed database listing yields no
//! dataset samples for that scrape; a failed count only drops that dataset.
//!
//! # Usage
//!
//! ```bash
//! axiell-exporter --api.base-url http://collections.local/api/wwwopac.ashx
//! axiell-exporter --config config.json5
//! ```
//!
//! # Configuration
//!
//! See [`config::ExporterConfig`] for configuration options.

pub mod classify;
pub mod client;
pub mod collector;
pub mod config;
pub mod http;
pub mod pipeline;

pub use classify::{Category, Classifier, classify};
pub use client::{AxiellClient, DatasetSource, UpstreamError};
pub use collector::{DatasetCollector, MetricDescriptor, SharedCollector};
pub use config::ExporterConfig;
pub use http::HttpServer;
pub use pipeline::{Dataset, MetricSample, ScrapePipeline, ScrapeReport};
