//! Services - windowed aggregation and pipeline composition
//!
//! This module contains the core processing logic:
//! - `aggregator` - Deduplicating windowed aggregator (the stateful core)
//! - `window` - Per-window reading buckets
//! - `stats` - Mean helpers over window buckets
//! - `pipeline` - Pipeline/Sink traits, `compose`, and helper sinks

pub mod aggregator;
pub mod pipeline;
pub mod stats;
pub mod window;

// Re-export commonly used types
pub use aggregator::{Aggregator, AggregatorConfig, AggregatorStats, StopReason};
pub use pipeline::{compose, Collector, FnSink, Pipeline, PipelineWithSink, Sink, Split, Tee};
