//! Per-window accumulation of accepted readings
//!
//! A `Window` keeps one bucket per location, in the order locations were
//! first seen inside the window. A location only gets a bucket when its
//! first reading is recorded, so every bucket is non-empty.

use crate::domain::types::LocationId;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::time::{Duration, Instant};

/// One accepted reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub value: f64,
    pub timestamp: i64,
}

/// Readings for one location within one window
#[derive(Debug, Clone)]
pub struct LocationBucket {
    pub location_id: LocationId,
    pub readings: SmallVec<[Reading; 8]>,
}

impl LocationBucket {
    pub fn values(&self) -> Vec<f64> {
        self.readings.iter().map(|r| r.value).collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.readings.iter().map(|r| r.timestamp).collect()
    }
}

/// Mutable accumulation for one time bucket
#[derive(Debug)]
pub struct Window {
    seq: u64,
    opened_at: Instant,
    index: FxHashMap<LocationId, usize>,
    buckets: Vec<LocationBucket>,
    readings: usize,
}

impl Window {
    pub fn open(seq: u64, opened_at: Instant) -> Self {
        Self { seq, opened_at, index: FxHashMap::default(), buckets: Vec::new(), readings: 0 }
    }

    /// Append a reading to its location's bucket
    pub fn record(&mut self, location_id: &LocationId, value: f64, timestamp: i64) {
        let reading = Reading { value, timestamp };
        match self.index.get(location_id) {
            Some(&idx) => self.buckets[idx].readings.push(reading),
            None => {
                self.index.insert(location_id.clone(), self.buckets.len());
                let mut readings = SmallVec::new();
                readings.push(reading);
                self.buckets.push(LocationBucket { location_id: location_id.clone(), readings });
            }
        }
        self.readings += 1;
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// Processing time since the window opened
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.opened_at)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of distinct locations seen
    pub fn location_count(&self) -> usize {
        self.buckets.len()
    }

    /// Total readings recorded
    pub fn reading_count(&self) -> usize {
        self.readings
    }

    /// Location ids in first-seen order
    pub fn locations(&self) -> impl Iterator<Item = &LocationId> {
        self.buckets.iter().map(|b| &b.location_id)
    }

    /// Consume the window, yielding its buckets in first-seen order
    pub fn into_buckets(self) -> Vec<LocationBucket> {
        self.buckets
    }
}
