//! Tests for the windowed aggregator

use super::*;
use crate::domain::types::{Location, LocationId};
use crate::infra::clock::ManualClock;
use crate::services::pipeline::{compose, Collector};

const RUN_SECS: u64 = 60;
const WINDOW_SECS: u64 = 10;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn location(id: &str, x: f64, y: f64) -> Location {
    Location { id: LocationId::from(id), x, y }
}

fn test_catalog() -> LocationCatalog {
    LocationCatalog::from_locations([
        location("A", 100.0, 200.0),
        location("B", 300.0, 400.0),
        location("C", 500.0, 600.0),
    ])
}

fn create_test_aggregator(clock: &ManualClock) -> Aggregator<ManualClock> {
    create_test_aggregator_with_config(clock, AggregatorConfig::from_secs(RUN_SECS, WINDOW_SECS))
}

fn create_test_aggregator_with_config(
    clock: &ManualClock,
    config: AggregatorConfig,
) -> Aggregator<ManualClock> {
    Aggregator::with_clock(config, test_catalog(), clock.clone()).unwrap()
}

/// Scripted source: each event is delivered after its gap elapses on the clock
struct Script {
    clock: ManualClock,
    steps: Vec<(Duration, RawEvent)>,
}

impl Script {
    fn new(clock: &ManualClock) -> Self {
        Self { clock: clock.clone(), steps: Vec::new() }
    }

    /// Deliver an event `gap` after the previous one
    fn after(mut self, gap: Duration, id: &str, loc: &str, value: f64, ts: i64) -> Self {
        self.steps.push((gap, RawEvent::new(id, loc, value, ts)));
        self
    }

    /// Deliver an event with no clock movement
    fn then(self, id: &str, loc: &str, value: f64, ts: i64) -> Self {
        self.after(Duration::ZERO, id, loc, value, ts)
    }

    fn events(self) -> impl Iterator<Item = RawEvent> {
        let clock = self.clock;
        self.steps.into_iter().map(move |(gap, event)| {
            clock.advance(gap);
            event
        })
    }
}

fn collect_ok(aggregator: &mut Aggregator<ManualClock>, script: Script) -> Vec<WindowOutput> {
    aggregator.process(script.events()).collect::<Result<Vec<_>>>().unwrap()
}

fn averaged(outputs: &[WindowOutput]) -> Vec<&AveragedEvent> {
    outputs.iter().filter_map(WindowOutput::as_averaged).collect()
}

fn sensors(outputs: &[WindowOutput]) -> Vec<&SensorsAverage> {
    outputs.iter().filter_map(WindowOutput::as_sensors).collect()
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_zero_run_duration_rejected() {
    let config = AggregatorConfig::from_secs(0, 0);
    let result = Aggregator::new(config, test_catalog());
    assert!(matches!(result, Err(PipelineError::Configuration(_))));
}

#[test]
fn test_zero_window_duration_rejected() {
    let config = AggregatorConfig::from_secs(60, 0);
    assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));
}

#[test]
fn test_window_longer_than_run_rejected() {
    let config = AggregatorConfig::from_secs(10, 30);
    assert!(matches!(config.validate(), Err(PipelineError::Configuration(_))));
}

#[test]
fn test_aggregator_keeps_config_and_catalog() {
    let clock = ManualClock::new();
    let aggregator = create_test_aggregator(&clock);
    assert_eq!(aggregator.config().window_duration, secs(WINDOW_SECS));
    assert_eq!(aggregator.config().run_duration, secs(RUN_SECS));
    assert_eq!(aggregator.catalog().len(), 3);
    assert!(aggregator.catalog().contains(&LocationId::from("B")));
}

#[test]
fn test_window_equal_to_run_accepted() {
    assert!(AggregatorConfig::from_secs(30, 30).validate().is_ok());
}

#[test]
fn test_config_from_app_config() {
    let app = Config::default().with_run_secs(90).with_window_secs(15);
    let config = AggregatorConfig::from_config(&app);
    assert_eq!(config.run_duration, secs(90));
    assert_eq!(config.window_duration, secs(15));
    assert_eq!(config.unknown_location, UnknownLocationPolicy::Fail);
}

// ============================================================================
// Averaging
// ============================================================================

#[test]
fn test_single_location_window_average() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        .after(secs(1), "e1", "A", 10.0, 100)
        .after(secs(1), "e2", "A", 20.0, 200)
        .after(secs(8), "e3", "A", 30.0, 300);

    let outputs = collect_ok(&mut aggregator, script);
    assert_eq!(outputs.len(), 2);

    let event = outputs[0].as_averaged().unwrap();
    assert_eq!(event.location_id, LocationId::from("A"));
    assert_eq!(event.x, 100.0);
    assert_eq!(event.y, 200.0);
    assert_eq!(event.average_value, 20.0);
    assert_eq!(event.average_timestamp, 200);

    let overall = outputs[1].as_sensors().unwrap();
    assert_eq!(overall.window, 0);
    assert_eq!(overall.locations, 1);
    assert_eq!(overall.average_value, 20.0);
    assert_eq!(overall.average_timestamp, 200);
}

#[test]
fn test_sensors_average_across_locations() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        .after(secs(1), "e1", "A", 5.0, 100)
        .after(secs(9), "e2", "B", 15.0, 101);

    let outputs = collect_ok(&mut aggregator, script);
    let overall = sensors(&outputs);
    assert_eq!(overall.len(), 1);
    assert_eq!(overall[0].average_value, 10.0);
    assert_eq!(overall[0].locations, 2);
    // (100 + 101) / 2 = 100.5 truncates to 100
    assert_eq!(overall[0].average_timestamp, 100);
}

#[test]
fn test_locations_emitted_in_first_seen_order_then_sensors() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        .then("e1", "C", 1.0, 10)
        .then("e2", "A", 2.0, 11)
        .then("e3", "C", 3.0, 12)
        .after(secs(10), "e4", "B", 4.0, 13);

    let outputs = collect_ok(&mut aggregator, script);
    let kinds: Vec<String> = outputs
        .iter()
        .map(|o| match o {
            WindowOutput::Averaged(e) => e.location_id.to_string(),
            WindowOutput::Sensors(_) => "sensors".to_string(),
        })
        .collect();
    assert_eq!(kinds, vec!["C", "A", "B", "sensors"]);

    let c = outputs[0].as_averaged().unwrap();
    assert_eq!(c.average_value, 2.0);
    assert_eq!(c.average_timestamp, 11);
}

#[test]
fn test_average_timestamp_ties_round_to_even() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        .then("e1", "A", 1.0, 100)
        .after(secs(10), "e2", "A", 1.0, 101);

    let outputs = collect_ok(&mut aggregator, script);
    assert_eq!(averaged(&outputs)[0].average_timestamp, 100);
}

#[test]
fn test_single_reading_is_its_own_average() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock).after(secs(10), "e1", "B", 7.25, 999);

    let outputs = collect_ok(&mut aggregator, script);
    let event = averaged(&outputs)[0];
    assert_eq!(event.average_value, 7.25);
    assert_eq!(event.average_timestamp, 999);
}

// ============================================================================
// Deduplication
// ============================================================================

#[test]
fn test_duplicates_counted_not_reprocessed() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let events: Vec<RawEvent> = (0..30)
        .map(|i| {
            let id = format!("e{}", i % 10);
            RawEvent::new(id.as_str(), "A", 1.0, 100)
        })
        .collect();

    let outputs: Vec<_> = aggregator.process(events).collect();
    assert!(outputs.is_empty());

    let stats = aggregator.stats();
    assert_eq!(stats.received, 30);
    assert_eq!(stats.accepted, 10);
    assert_eq!(stats.duplicates, 20);
    assert_eq!(aggregator.distinct_ids(), 10);
}

#[test]
fn test_resubmitted_ids_do_not_change_averages() {
    let clock_once = ManualClock::new();
    let mut once = create_test_aggregator(&clock_once);
    let script_once = Script::new(&clock_once)
        .then("e1", "A", 10.0, 100)
        .then("e2", "A", 30.0, 300)
        .after(secs(10), "e3", "B", 5.0, 500);
    let expected = collect_ok(&mut once, script_once);

    let clock_repeat = ManualClock::new();
    let mut repeat = create_test_aggregator(&clock_repeat);
    let script_repeat = Script::new(&clock_repeat)
        .then("e1", "A", 10.0, 100)
        .then("e1", "A", 10.0, 100)
        .then("e2", "A", 30.0, 300)
        .then("e1", "A", 10.0, 100)
        .then("e2", "A", 30.0, 300)
        .after(secs(10), "e3", "B", 5.0, 500);
    let actual = collect_ok(&mut repeat, script_repeat);

    assert_eq!(actual, expected);
    assert_eq!(repeat.stats().duplicates, 3);
}

#[test]
fn test_dedup_spans_windows() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        .after(secs(10), "e1", "A", 10.0, 100)
        // Same id in the next window is still a duplicate
        .after(secs(1), "e1", "A", 99.0, 200)
        .after(secs(10), "e2", "A", 20.0, 300);

    let outputs = collect_ok(&mut aggregator, script);
    let events = averaged(&outputs);
    assert_eq!(events.len(), 2);
    assert_eq!(events[1].average_value, 20.0);
    assert_eq!(aggregator.stats().duplicates, 1);
}

#[test]
fn test_duplicate_does_not_close_window() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        .then("e1", "A", 10.0, 100)
        .after(secs(12), "e1", "A", 10.0, 100);

    let outputs = collect_ok(&mut aggregator, script);
    assert!(outputs.is_empty());
    assert_eq!(aggregator.stats().windows_closed, 0);
    assert_eq!(aggregator.stats().discarded_readings, 1);
}

// ============================================================================
// Window timing
// ============================================================================

#[test]
fn test_window_never_closes_on_count() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let events: Vec<RawEvent> =
        (0..1000).map(|i| RawEvent::new(format!("e{}", i).as_str(), "A", 1.0, i)).collect();

    let outputs: Vec<_> = aggregator.process(events).collect();
    assert!(outputs.is_empty());

    let stats = aggregator.stats();
    assert_eq!(stats.accepted, 1000);
    assert_eq!(stats.windows_closed, 0);
    assert_eq!(stats.discarded_readings, 1000);
    assert_eq!(stats.stop_reason, Some(StopReason::SourceExhausted));
}

#[test]
fn test_window_closes_at_exact_duration() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        .after(Duration::from_millis(9_999), "e1", "A", 1.0, 1)
        .after(Duration::from_millis(1), "e2", "A", 3.0, 3);

    let outputs = collect_ok(&mut aggregator, script);
    assert_eq!(averaged(&outputs).len(), 1);
    assert_eq!(averaged(&outputs)[0].average_value, 2.0);
}

#[test]
fn test_next_window_starts_at_close_time() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        // Closes window 0 at t=15
        .after(secs(15), "e1", "A", 1.0, 1)
        // t=24: 9s into window 1, stays open
        .after(secs(9), "e2", "B", 2.0, 2)
        // t=25: 10s into window 1, closes it
        .after(secs(1), "e3", "B", 4.0, 4);

    let outputs = collect_ok(&mut aggregator, script);
    let overall = sensors(&outputs);
    assert_eq!(overall.len(), 2);
    assert_eq!(overall[0].window, 0);
    assert_eq!(overall[1].window, 1);
    assert_eq!(overall[1].average_value, 3.0);
    assert_eq!(aggregator.stats().windows_closed, 2);
}

#[test]
fn test_trailing_partial_window_dropped() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        .after(secs(10), "e1", "A", 1.0, 1)
        .after(secs(1), "e2", "B", 2.0, 2)
        .after(secs(1), "e3", "C", 3.0, 3);

    let outputs = collect_ok(&mut aggregator, script);
    assert_eq!(averaged(&outputs).len(), 1);
    assert_eq!(aggregator.stats().discarded_readings, 2);
}

// ============================================================================
// Deadline
// ============================================================================

#[test]
fn test_deadline_stops_processing() {
    let clock = ManualClock::new();
    let config = AggregatorConfig::from_secs(20, 10);
    let mut aggregator = create_test_aggregator_with_config(&clock, config);

    let script = Script::new(&clock)
        .after(secs(10), "e1", "A", 1.0, 1)
        .after(secs(5), "e2", "A", 2.0, 2)
        // t=20: at the deadline, not processed
        .after(secs(5), "e3", "A", 3.0, 3)
        .after(secs(1), "e4", "A", 4.0, 4);

    let outputs = collect_ok(&mut aggregator, script);
    assert_eq!(averaged(&outputs).len(), 1);

    let stats = aggregator.stats();
    assert_eq!(stats.stop_reason, Some(StopReason::Deadline));
    assert_eq!(stats.received, 2);
    assert_eq!(stats.accepted, 2);
    assert_eq!(stats.discarded_readings, 1);
}

#[test]
fn test_deadline_leaves_rest_of_source_unread() {
    let clock = ManualClock::new();
    let config = AggregatorConfig::from_secs(20, 10);
    let mut aggregator = create_test_aggregator_with_config(&clock, config);

    let mut pulled = 0;
    let events = (0..100).map(|i| {
        pulled += 1;
        clock.advance(secs(1));
        RawEvent::new(format!("e{}", i).as_str(), "A", 1.0, i)
    });

    let outputs: Vec<_> = aggregator.process(events).collect();
    assert_eq!(outputs.len(), 2);
    assert_eq!(pulled, 20);
    assert_eq!(aggregator.stats().stop_reason, Some(StopReason::Deadline));
}

#[test]
fn test_deadline_checked_before_dedup() {
    let clock = ManualClock::new();
    let config = AggregatorConfig::from_secs(20, 10);
    let mut aggregator = create_test_aggregator_with_config(&clock, config);

    let script = Script::new(&clock)
        .after(secs(5), "e1", "A", 1.0, 1)
        // t=20: a repeat of e1 is the first item at the deadline
        .after(secs(15), "e1", "A", 1.0, 1);

    let outputs = collect_ok(&mut aggregator, script);
    assert!(outputs.is_empty());

    let stats = aggregator.stats();
    assert_eq!(stats.stop_reason, Some(StopReason::Deadline));
    assert_eq!(stats.received, 1);
    assert_eq!(stats.duplicates, 0);
}

#[test]
fn test_source_ending_after_deadline_reports_deadline() {
    let clock = ManualClock::new();
    let config = AggregatorConfig::from_secs(20, 10);
    let mut aggregator = create_test_aggregator_with_config(&clock, config);

    // A deadline-bounded source gives up once the run is over
    let idle = clock.clone();
    let events = Script::new(&clock).after(secs(5), "e1", "A", 1.0, 1).events().chain(
        std::iter::from_fn(move || -> Option<RawEvent> {
            idle.advance(secs(16));
            None
        }),
    );

    let outputs: Vec<_> = aggregator.process(events).collect();
    assert!(outputs.is_empty());
    assert_eq!(aggregator.stats().stop_reason, Some(StopReason::Deadline));
    assert_eq!(aggregator.stats().discarded_readings, 1);
}

#[test]
fn test_source_ending_before_deadline_is_exhausted() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock).after(secs(5), "e1", "A", 1.0, 1);
    collect_ok(&mut aggregator, script);
    assert_eq!(aggregator.stats().stop_reason, Some(StopReason::SourceExhausted));
}

// ============================================================================
// Unknown locations
// ============================================================================

#[test]
fn test_unknown_location_fails_at_window_boundary() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock)
        .then("e1", "A", 1.0, 1)
        .then("e2", "Z", 2.0, 2)
        .after(secs(10), "e3", "A", 3.0, 3);

    let mut outputs = aggregator.process(script.events());
    let first = outputs.next().unwrap().unwrap();
    assert_eq!(first.as_averaged().unwrap().location_id, LocationId::from("A"));

    match outputs.next() {
        Some(Err(PipelineError::UnknownLocation { location_id })) => {
            assert_eq!(location_id, LocationId::from("Z"))
        }
        other => panic!("expected unknown location error, got {:?}", other),
    }
    assert!(outputs.next().is_none());
    drop(outputs);

    assert_eq!(aggregator.stats().stop_reason, Some(StopReason::Failed));
    assert_eq!(aggregator.stats().sensors_averages, 0);
}

#[test]
fn test_unknown_location_not_reported_before_boundary() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let script = Script::new(&clock).then("e1", "Z", 1.0, 1).after(secs(5), "e2", "Z", 2.0, 2);

    let outputs: Vec<_> = aggregator.process(script.events()).collect();
    assert!(outputs.is_empty());
    assert_eq!(aggregator.stats().stop_reason, Some(StopReason::SourceExhausted));
}

#[test]
fn test_unknown_location_skip_policy() {
    let clock = ManualClock::new();
    let config = AggregatorConfig::from_secs(RUN_SECS, WINDOW_SECS)
        .with_unknown_location(UnknownLocationPolicy::Skip);
    let mut aggregator = create_test_aggregator_with_config(&clock, config);

    let script = Script::new(&clock)
        .then("e1", "A", 4.0, 10)
        .then("e2", "Z", 1000.0, 10)
        .after(secs(10), "e3", "B", 8.0, 20);

    let outputs = collect_ok(&mut aggregator, script);
    assert_eq!(averaged(&outputs).len(), 2);

    let overall = sensors(&outputs);
    assert_eq!(overall[0].locations, 2);
    assert_eq!(overall[0].average_value, 6.0);
    assert_eq!(aggregator.stats().unknown_skipped, 1);
}

#[test]
fn test_skip_policy_all_unknown_emits_nothing() {
    let clock = ManualClock::new();
    let config = AggregatorConfig::from_secs(RUN_SECS, WINDOW_SECS)
        .with_unknown_location(UnknownLocationPolicy::Skip);
    let mut aggregator = create_test_aggregator_with_config(&clock, config);

    let script = Script::new(&clock).after(secs(10), "e1", "Z", 1.0, 1);

    let outputs = collect_ok(&mut aggregator, script);
    assert!(outputs.is_empty());
    assert_eq!(aggregator.stats().windows_closed, 1);
    assert_eq!(aggregator.stats().sensors_averages, 0);
}

// ============================================================================
// Run lifecycle
// ============================================================================

#[test]
fn test_source_error_propagates_and_ends_run() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let items: Vec<Result<RawEvent>> = vec![
        Ok(RawEvent::new("e1", "A", 1.0, 1)),
        Err(PipelineError::Source(std::io::Error::other("connection reset"))),
        Ok(RawEvent::new("e2", "A", 1.0, 2)),
    ];

    let outputs: Vec<_> = aggregator.process(items).collect();
    assert_eq!(outputs.len(), 1);
    assert!(matches!(outputs[0], Err(PipelineError::Source(_))));
    assert_eq!(aggregator.stats().received, 1);
    assert_eq!(aggregator.stats().stop_reason, Some(StopReason::Failed));
}

#[test]
fn test_each_run_is_isolated() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let first: Vec<RawEvent> = vec![RawEvent::new("e1", "A", 1.0, 1)];
    let _ = aggregator.process(first).count();
    assert_eq!(aggregator.stats().accepted, 1);

    let second: Vec<RawEvent> =
        vec![RawEvent::new("e1", "A", 1.0, 1), RawEvent::new("e1", "A", 1.0, 1)];
    let _ = aggregator.process(second).count();
    assert_eq!(aggregator.stats().accepted, 1);
    assert_eq!(aggregator.stats().duplicates, 1);
}

#[test]
fn test_lazy_until_pulled() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);

    let mut pulled = 0;
    let events = std::iter::from_fn(|| {
        pulled += 1;
        clock.advance(secs(5));
        Some(RawEvent::new(format!("e{}", pulled).as_str(), "A", 1.0, 0))
    });

    let mut outputs = aggregator.process(events);
    let first = outputs.next().unwrap().unwrap();
    assert!(first.as_averaged().is_some());
    assert_eq!(outputs.stats().accepted, 2);
    assert_eq!(outputs.stats().stop_reason, None);
    drop(outputs);

    // Window closes on the second event (t=10); nothing else was read
    assert_eq!(pulled, 2);
    assert_eq!(aggregator.stats().stop_reason, Some(StopReason::Abandoned));
}

#[test]
fn test_runs_through_composite_with_sink() {
    let clock = ManualClock::new();
    let mut aggregator = create_test_aggregator(&clock);
    let mut collector = Collector::new();

    let script = Script::new(&clock)
        .then("e1", "A", 5.0, 100)
        .after(secs(10), "e2", "B", 15.0, 200);

    let passed = compose(&mut aggregator, &mut collector).run(script.events()).unwrap();
    assert_eq!(passed, 3);
    assert!(collector.is_finished());
    assert_eq!(sensors(collector.items())[0].average_value, 10.0);
    assert_eq!(aggregator.stats().stop_reason, Some(StopReason::SourceExhausted));
}

#[test]
fn test_window_close_recorded_in_metrics() {
    let clock = ManualClock::new();
    let metrics = Arc::new(Metrics::new());
    let mut aggregator = create_test_aggregator(&clock).with_metrics(metrics.clone());

    let script = Script::new(&clock).after(secs(10), "e1", "A", 1.0, 1);
    collect_ok(&mut aggregator, script);

    assert_eq!(metrics.summary().windows_closed, 1);
}
