//! Infrastructure layer: relational store, cache, object storage, submission
//! service, job pipeline, statistics and configuration.

pub mod cache;
pub mod config;
pub mod db;
pub mod exports;
pub mod jobs;
pub mod metrics;
pub mod stats;
pub mod storage;
pub mod surveys;

pub use config::{AppConfig, ConfigError};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use stats::{DailyCount, StatisticsAggregator, StatsSummary, render_exposition};
