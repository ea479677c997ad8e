//! Deduplicating windowed aggregator
//!
//! Consumes raw sensor events in arrival order and produces, per closed
//! window, one `AveragedEvent` per location followed by one `SensorsAverage`.
//!
//! Timing is processing-time only: a window closes when an accepted event
//! arrives at or after `window_duration` since the window opened, and the
//! run stops at the first event pulled at or after the run deadline. Event
//! timestamps never drive window boundaries. A trailing window that has not
//! reached its duration is dropped without output.

#[cfg(test)]
mod tests;

use crate::domain::catalog::LocationCatalog;
use crate::domain::types::{AveragedEvent, EventId, RawEvent, SensorsAverage, WindowOutput};
use crate::error::{PipelineError, Result};
use crate::infra::clock::{Clock, SystemClock};
use crate::infra::config::{Config, UnknownLocationPolicy};
use crate::infra::metrics::Metrics;
use crate::services::pipeline::{Items, Pipeline};
use crate::services::stats;
use crate::services::window::Window;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Durations and policies for one aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    pub run_duration: Duration,
    pub window_duration: Duration,
    pub unknown_location: UnknownLocationPolicy,
}

impl AggregatorConfig {
    pub fn new(run_duration: Duration, window_duration: Duration) -> Self {
        Self { run_duration, window_duration, unknown_location: UnknownLocationPolicy::Fail }
    }

    pub fn from_secs(run_secs: u64, window_secs: u64) -> Self {
        Self::new(Duration::from_secs(run_secs), Duration::from_secs(window_secs))
    }

    pub fn from_config(config: &Config) -> Self {
        Self::from_secs(config.run_secs(), config.window_secs())
            .with_unknown_location(config.unknown_location())
    }

    pub fn with_unknown_location(mut self, policy: UnknownLocationPolicy) -> Self {
        self.unknown_location = policy;
        self
    }

    /// Reject zero durations and windows longer than the run
    pub fn validate(&self) -> Result<()> {
        if self.run_duration.is_zero() {
            return Err(PipelineError::Configuration("run duration must be positive".into()));
        }
        if self.window_duration.is_zero() {
            return Err(PipelineError::Configuration("window duration must be positive".into()));
        }
        if self.window_duration > self.run_duration {
            return Err(PipelineError::Configuration(format!(
                "window duration {:?} exceeds run duration {:?}",
                self.window_duration, self.run_duration
            )));
        }
        Ok(())
    }
}

/// Why a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An event was pulled at or after the run deadline
    Deadline,
    /// The input sequence ended before the deadline
    SourceExhausted,
    /// A source, catalog, or internal error ended the run
    Failed,
    /// The consumer dropped the output sequence early
    Abandoned,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Deadline => "deadline",
            StopReason::SourceExhausted => "source_exhausted",
            StopReason::Failed => "failed",
            StopReason::Abandoned => "abandoned",
        }
    }
}

/// Counters for one `process` run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatorStats {
    /// Events pulled before the deadline, duplicates included
    pub received: u64,
    /// Events credited to a window (distinct ids)
    pub accepted: u64,
    /// Events dropped because their id was already credited
    pub duplicates: u64,
    pub windows_closed: u64,
    pub averaged_events: u64,
    pub sensors_averages: u64,
    /// Locations left out of a window because the catalog lacks them
    pub unknown_skipped: u64,
    /// Readings in the trailing partial window dropped at stop
    pub discarded_readings: u64,
    /// `None` while the run is in progress
    pub stop_reason: Option<StopReason>,
}

/// Converts source items into raw events; `Err` items end the run
pub trait IntoEvent {
    fn into_event(self) -> Result<RawEvent>;
}

impl IntoEvent for RawEvent {
    #[inline]
    fn into_event(self) -> Result<RawEvent> {
        Ok(self)
    }
}

impl IntoEvent for Result<RawEvent> {
    #[inline]
    fn into_event(self) -> Result<RawEvent> {
        self
    }
}

/// Windowed averaging stage with run-scoped deduplication
pub struct Aggregator<C: Clock = SystemClock> {
    config: AggregatorConfig,
    catalog: LocationCatalog,
    clock: C,
    metrics: Option<Arc<Metrics>>,
    seen_ids: FxHashSet<EventId>,
    stats: AggregatorStats,
}

impl Aggregator<SystemClock> {
    pub fn new(config: AggregatorConfig, catalog: LocationCatalog) -> Result<Self> {
        Self::with_clock(config, catalog, SystemClock)
    }
}

impl<C: Clock> Aggregator<C> {
    /// Create an aggregator reading processing time from `clock`
    pub fn with_clock(config: AggregatorConfig, catalog: LocationCatalog, clock: C) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            catalog,
            clock,
            metrics: None,
            seen_ids: FxHashSet::default(),
            stats: AggregatorStats::default(),
        })
    }

    /// Record window close latency into shared metrics
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn catalog(&self) -> &LocationCatalog {
        &self.catalog
    }

    /// Counters of the current or most recent run
    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    /// Number of distinct event ids credited in the current or most recent run
    pub fn distinct_ids(&self) -> usize {
        self.seen_ids.len()
    }

    /// Start a run over `events`
    ///
    /// The run clock starts now. Dedup state and counters are reset, so each
    /// call is an isolated run. Events are pulled only as the returned
    /// sequence is advanced.
    pub fn process<E, I>(&mut self, events: I) -> WindowedAverages<'_, C, I::IntoIter>
    where
        E: IntoEvent,
        I: IntoIterator<Item = E>,
    {
        let started_at = self.clock.now();
        self.seen_ids.clear();
        self.stats = AggregatorStats::default();

        info!(
            run_secs = %self.config.run_duration.as_secs_f64(),
            window_secs = %self.config.window_duration.as_secs_f64(),
            locations = %self.catalog.len(),
            on_unknown_location = %self.config.unknown_location.as_str(),
            "aggregation_started"
        );

        WindowedAverages {
            deadline: started_at + self.config.run_duration,
            window: Window::open(0, started_at),
            pending: VecDeque::new(),
            done: false,
            input: events.into_iter(),
            aggregator: self,
        }
    }

    /// Average every bucket of a closed window into `out`
    ///
    /// Items computed before a failure stay in `out` ahead of the error.
    fn average_window(
        &mut self,
        window: Window,
        out: &mut VecDeque<Result<WindowOutput>>,
    ) -> Result<()> {
        let seq = window.seq();
        let mut values = Vec::with_capacity(window.location_count());
        let mut timestamps = Vec::with_capacity(window.location_count());

        for bucket in window.into_buckets() {
            let Some(location) = self.catalog.get(&bucket.location_id) else {
                match self.config.unknown_location {
                    UnknownLocationPolicy::Fail => {
                        error!(window = %seq, location_id = %bucket.location_id, "unknown_location");
                        return Err(PipelineError::UnknownLocation {
                            location_id: bucket.location_id,
                        });
                    }
                    UnknownLocationPolicy::Skip => {
                        warn!(
                            window = %seq,
                            location_id = %bucket.location_id,
                            readings = %bucket.readings.len(),
                            "unknown_location_skipped"
                        );
                        self.stats.unknown_skipped += 1;
                        continue;
                    }
                }
            };

            let average_value = stats::mean(&bucket.values())?;
            let average_timestamp = stats::rounded_mean(&bucket.timestamps())?;
            values.push(average_value);
            timestamps.push(average_timestamp);

            let event = AveragedEvent {
                x: location.x,
                y: location.y,
                location_id: bucket.location_id,
                average_value,
                average_timestamp,
            };
            debug!(
                window = %seq,
                location_id = %event.location_id,
                readings = %bucket.readings.len(),
                average_value = %event.average_value,
                average_timestamp = %event.average_timestamp,
                "location_averaged"
            );
            self.stats.averaged_events += 1;
            out.push_back(Ok(WindowOutput::Averaged(event)));
        }

        // Every location was skipped
        if values.is_empty() {
            return Ok(());
        }

        let sensors = SensorsAverage {
            window: seq,
            locations: values.len(),
            average_value: stats::mean(&values)?,
            average_timestamp: stats::truncated_mean(&timestamps)?,
        };
        debug!(
            window = %seq,
            locations = %sensors.locations,
            average_value = %sensors.average_value,
            average_timestamp = %sensors.average_timestamp,
            "sensors_averaged"
        );
        self.stats.sensors_averages += 1;
        out.push_back(Ok(WindowOutput::Sensors(sensors)));
        Ok(())
    }
}

impl<C: Clock, E: IntoEvent> Pipeline<E> for Aggregator<C> {
    type Output = WindowOutput;

    fn process<'a, I>(&'a mut self, input: I) -> Items<'a, WindowOutput>
    where
        I: IntoIterator<Item = E>,
        I::IntoIter: 'a,
    {
        Box::new(Aggregator::process(self, input))
    }
}

/// Lazy output sequence of one aggregation run
///
/// Holds the aggregator mutably for the run; its counters are readable
/// through `Aggregator::stats` once this sequence is dropped.
pub struct WindowedAverages<'a, C: Clock, I> {
    aggregator: &'a mut Aggregator<C>,
    input: I,
    window: Window,
    deadline: Instant,
    pending: VecDeque<Result<WindowOutput>>,
    done: bool,
}

impl<C: Clock, I> WindowedAverages<'_, C, I> {
    /// Counters so far
    pub fn stats(&self) -> &AggregatorStats {
        &self.aggregator.stats
    }

    /// Close the current window and open the next one at `now`
    fn close_window(&mut self, now: Instant) {
        let close_start = Instant::now();
        let next = Window::open(self.window.seq() + 1, now);
        let closing = std::mem::replace(&mut self.window, next);
        let seq = closing.seq();
        let locations = closing.location_count();
        let readings = closing.reading_count();

        if closing.is_empty() {
            debug!(window = %seq, "window_empty");
            return;
        }

        self.aggregator.stats.windows_closed += 1;
        if let Err(e) = self.aggregator.average_window(closing, &mut self.pending) {
            if e.is_internal() {
                error!(window = %seq, error = %e, "window_invariant_violated");
            }
            self.pending.push_back(Err(e));
            self.finish(StopReason::Failed);
            return;
        }

        let latency_us = close_start.elapsed().as_micros() as u64;
        if let Some(metrics) = &self.aggregator.metrics {
            metrics.record_window_closed(latency_us);
        }
        info!(
            window = %seq,
            locations = %locations,
            readings = %readings,
            close_us = %latency_us,
            "window_closed"
        );
    }

    /// Mark the run as ended and report its counters (first call wins)
    fn finish(&mut self, reason: StopReason) {
        if self.done {
            return;
        }
        self.done = true;

        let discarded = self.window.reading_count() as u64;
        if discarded > 0 {
            info!(
                window = %self.window.seq(),
                locations = %self.window.location_count(),
                readings = %discarded,
                "partial_window_discarded"
            );
        }

        let distinct_ids = self.aggregator.seen_ids.len();
        let stats = &mut self.aggregator.stats;
        stats.discarded_readings = discarded;
        stats.stop_reason = Some(reason);

        info!(
            reason = %reason.as_str(),
            received = %stats.received,
            accepted = %stats.accepted,
            duplicates = %stats.duplicates,
            distinct_ids = %distinct_ids,
            windows_closed = %stats.windows_closed,
            averaged_events = %stats.averaged_events,
            sensors_averages = %stats.sensors_averages,
            unknown_skipped = %stats.unknown_skipped,
            "aggregation_finished"
        );
    }
}

impl<C, E, I> Iterator for WindowedAverages<'_, C, I>
where
    C: Clock,
    E: IntoEvent,
    I: Iterator<Item = E>,
{
    type Item = Result<WindowOutput>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }

            let Some(item) = self.input.next() else {
                // Deadline-bounded sources end once the run is over
                let reason = if self.aggregator.clock.now() >= self.deadline {
                    StopReason::Deadline
                } else {
                    StopReason::SourceExhausted
                };
                self.finish(reason);
                return None;
            };

            let now = self.aggregator.clock.now();
            if now >= self.deadline {
                self.finish(StopReason::Deadline);
                return None;
            }

            let event = match item.into_event() {
                Ok(event) => event,
                Err(e) => {
                    error!(error = %e, "event_source_failed");
                    self.finish(StopReason::Failed);
                    return Some(Err(e));
                }
            };

            self.aggregator.stats.received += 1;
            if self.aggregator.seen_ids.contains(&event.event_id) {
                self.aggregator.stats.duplicates += 1;
                debug!(event_id = %event.event_id, "event_duplicate");
                continue;
            }

            debug!(
                event_id = %event.event_id,
                location_id = %event.location_id,
                value = %event.value,
                timestamp = %event.timestamp,
                "event_accepted"
            );
            self.window.record(&event.location_id, event.value, event.timestamp);
            self.aggregator.seen_ids.insert(event.event_id);
            self.aggregator.stats.accepted += 1;

            if self.window.elapsed(now) >= self.aggregator.config.window_duration {
                self.close_window(now);
            }
        }
    }
}

impl<C: Clock, I> Drop for WindowedAverages<'_, C, I> {
    fn drop(&mut self) {
        self.finish(StopReason::Abandoned);
    }
}
