//! Error type shared by the aggregation core and its collaborators

use crate::domain::types::LocationId;
use thiserror::Error;

/// Errors surfaced by the pipeline, its sources and its sinks.
///
/// `EmptyWindow` marks a broken internal invariant and is never caused by
/// input data. Source and sink failures wrap the collaborator's own error
/// unchanged.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("location {location_id} is not in the location catalog")]
    UnknownLocation { location_id: LocationId },

    #[error("statistic requested over an empty window bucket")]
    EmptyWindow,

    #[error("location catalog unavailable: {reason}")]
    CatalogUnavailable { reason: String },

    #[error("event source failed: {0}")]
    Source(#[source] std::io::Error),

    #[error("sink failed: {0}")]
    Sink(#[source] std::io::Error),

    #[error("event serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// True for errors that indicate a logic bug rather than a data or I/O problem
    pub fn is_internal(&self) -> bool {
        matches!(self, PipelineError::EmptyWindow)
    }
}
