//! Pipeline stages and terminal sinks
//!
//! A `Pipeline` turns an input sequence into a lazy output sequence; a
//! `Sink` accepts output items one at a time. `compose` joins the two into
//! a `PipelineWithSink`, which is itself a `Pipeline` whose items pass
//! through after the sink accepted them, so composites chain:
//!
//! ```ignore
//! let mut chain = compose(compose(aggregator, log_sink), file_sink);
//! chain.run(events)?;
//! ```

use crate::domain::types::{AveragedEvent, SensorsAverage, WindowOutput};
use crate::error::Result;

/// Boxed lazy output sequence of a pipeline stage
///
/// An `Err` item ends the sequence.
pub type Items<'a, T> = Box<dyn Iterator<Item = Result<T>> + 'a>;

/// A stage that transforms an input sequence into a lazy output sequence
pub trait Pipeline<In> {
    type Output;

    /// Start processing `input`. Nothing is pulled from `input` until the
    /// returned sequence is advanced.
    fn process<'a, I>(&'a mut self, input: I) -> Items<'a, Self::Output>
    where
        I: IntoIterator<Item = In>,
        I::IntoIter: 'a;
}

impl<In, P: Pipeline<In> + ?Sized> Pipeline<In> for &mut P {
    type Output = P::Output;

    fn process<'a, I>(&'a mut self, input: I) -> Items<'a, Self::Output>
    where
        I: IntoIterator<Item = In>,
        I::IntoIter: 'a,
    {
        (**self).process(input)
    }
}

/// Terminal consumer accepting one item at a time
pub trait Sink<T> {
    fn accept(&mut self, item: T) -> Result<()>;

    /// Called once after the last item of a completed run
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<T, S: Sink<T> + ?Sized> Sink<T> for &mut S {
    fn accept(&mut self, item: T) -> Result<()> {
        (**self).accept(item)
    }

    fn finish(&mut self) -> Result<()> {
        (**self).finish()
    }
}

/// A pipeline whose every output item is fed to a sink
pub struct PipelineWithSink<P, S> {
    pipeline: P,
    sink: S,
}

/// Combine a pipeline with a terminal sink
pub fn compose<P, S>(pipeline: P, sink: S) -> PipelineWithSink<P, S> {
    PipelineWithSink { pipeline, sink }
}

impl<P, S> PipelineWithSink<P, S> {
    /// Drive the pipeline over `input`, feeding every item to the sink in order
    ///
    /// Returns the number of items the sink accepted. The first pipeline or
    /// sink error stops the run and is returned unchanged.
    pub fn run<In, I>(&mut self, input: I) -> Result<u64>
    where
        P: Pipeline<In>,
        S: Sink<P::Output>,
        I: IntoIterator<Item = In>,
    {
        let mut passed = 0u64;
        for item in self.pipeline.process(input) {
            self.sink.accept(item?)?;
            passed += 1;
        }
        self.sink.finish()?;
        Ok(passed)
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_parts(self) -> (P, S) {
        (self.pipeline, self.sink)
    }
}

impl<In, P, S> Pipeline<In> for PipelineWithSink<P, S>
where
    P: Pipeline<In>,
    P::Output: Clone + 'static,
    S: Sink<P::Output>,
{
    type Output = P::Output;

    fn process<'a, I>(&'a mut self, input: I) -> Items<'a, Self::Output>
    where
        I: IntoIterator<Item = In>,
        I::IntoIter: 'a,
    {
        let sink = &mut self.sink;
        Box::new(self.pipeline.process(input).map(move |item| {
            let item = item?;
            sink.accept(item.clone())?;
            Ok(item)
        }))
    }
}

/// Sink that keeps every item in memory
#[derive(Debug, Clone)]
pub struct Collector<T> {
    items: Vec<T>,
    finished: bool,
}

impl<T> Collector<T> {
    pub fn new() -> Self {
        Self { items: Vec::new(), finished: false }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<T> Default for Collector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Sink<T> for Collector<T> {
    fn accept(&mut self, item: T) -> Result<()> {
        self.items.push(item);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }
}

/// Sink backed by a closure
pub struct FnSink<F>(pub F);

impl<T, F> Sink<T> for FnSink<F>
where
    F: FnMut(T) -> Result<()>,
{
    fn accept(&mut self, item: T) -> Result<()> {
        (self.0)(item)
    }
}

/// Fan-out: every item goes to both sinks, first then second
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A, B> Tee<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<T: Clone, A: Sink<T>, B: Sink<T>> Sink<T> for Tee<A, B> {
    fn accept(&mut self, item: T) -> Result<()> {
        self.first.accept(item.clone())?;
        self.second.accept(item)
    }

    fn finish(&mut self) -> Result<()> {
        self.first.finish()?;
        self.second.finish()
    }
}

/// Routes the two logical output streams to their own sinks
pub struct Split<A, S> {
    averaged: A,
    sensors: S,
}

impl<A, S> Split<A, S> {
    pub fn new(averaged: A, sensors: S) -> Self {
        Self { averaged, sensors }
    }

    pub fn averaged(&self) -> &A {
        &self.averaged
    }

    pub fn sensors(&self) -> &S {
        &self.sensors
    }

    pub fn into_parts(self) -> (A, S) {
        (self.averaged, self.sensors)
    }
}

impl<A, S> Sink<WindowOutput> for Split<A, S>
where
    A: Sink<AveragedEvent>,
    S: Sink<SensorsAverage>,
{
    fn accept(&mut self, item: WindowOutput) -> Result<()> {
        match item {
            WindowOutput::Averaged(event) => self.averaged.accept(event),
            WindowOutput::Sensors(avg) => self.sensors.accept(avg),
        }
    }

    fn finish(&mut self) -> Result<()> {
        self.averaged.finish()?;
        self.sensors.finish()
    }
}
