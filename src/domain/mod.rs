//! Domain models - sensor readings, locations and window averages
//!
//! This module contains the canonical data types used throughout the system:
//! - `RawEvent` - a gas concentration reading from the event source
//! - `Location` / `LocationCatalog` - sensor positions, loaded once per run
//! - `AveragedEvent` - one location's mean over one window
//! - `SensorsAverage` - the cross-location mean for one window

pub mod catalog;
pub mod types;

// Re-export commonly used types at module level
pub use catalog::LocationCatalog;
pub use types::{
    AveragedEvent, EventId, Location, LocationId, RawEvent, SensorsAverage, WindowOutput,
};
