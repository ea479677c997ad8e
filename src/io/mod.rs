//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `source` - JSONL event reader for files and stdin
//! - `listener` - TCP listener for networked event producers
//! - `egress` - Window output to JSONL files and the log

pub mod egress;
pub mod listener;
pub mod source;

// Re-export commonly used types
pub use egress::{JsonlSink, LogSink};
pub use listener::{bind_event_listener, run_event_listener, ChannelSource};
pub use source::{parse_event_line, JsonLinesSource};
