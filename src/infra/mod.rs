//! Infrastructure - configuration, clock, and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `clock` - Processing-time source (real and manual)
//! - `metrics` - Lock-free ingest and window counters

pub mod clock;
pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, SourceKind, UnknownLocationPolicy};
pub use metrics::Metrics;
