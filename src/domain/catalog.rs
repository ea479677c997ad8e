//! Location catalog - immutable location id to coordinates lookup
//!
//! The catalog is loaded once before the pipeline starts, from the JSON
//! array published alongside the sensor feed:
//! `[{"id": "...", "x": 123.4, "y": 567.8}, ...]`

use crate::domain::types::{Location, LocationId};
use crate::error::{PipelineError, Result};
use rustc_hash::FxHashMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Read-only mapping from location id to `Location`
#[derive(Debug, Clone, Default)]
pub struct LocationCatalog {
    locations: FxHashMap<LocationId, Location>,
}

impl LocationCatalog {
    /// Build a catalog from already-parsed locations (last duplicate wins)
    pub fn from_locations(locations: impl IntoIterator<Item = Location>) -> Self {
        let mut map = FxHashMap::default();
        for location in locations {
            if let Some(previous) = map.insert(location.id.clone(), location) {
                warn!(location_id = %previous.id, "catalog_duplicate_location");
            }
        }
        Self { locations: map }
    }

    /// Parse the locations JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let parsed: Vec<Location> =
            serde_json::from_str(json).map_err(|e| PipelineError::CatalogUnavailable {
                reason: format!("malformed locations document: {}", e),
            })?;

        if parsed.is_empty() {
            return Err(PipelineError::CatalogUnavailable {
                reason: "locations document contains no locations".to_string(),
            });
        }

        Ok(Self::from_locations(parsed))
    }

    /// Load and parse the locations file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| PipelineError::CatalogUnavailable {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;

        let catalog = Self::from_json_str(&content)?;
        info!(file = %path.display(), locations = %catalog.len(), "catalog_loaded");
        Ok(catalog)
    }

    pub fn get(&self, id: &LocationId) -> Option<&Location> {
        self.locations.get(id)
    }

    pub fn contains(&self, id: &LocationId) -> bool {
        self.locations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }
}
