//! Line-delimited JSON event source
//!
//! One `RawEvent` JSON object per line. Blank lines are ignored and
//! malformed lines are logged and counted; read failures are passed on as
//! `PipelineError::Source` items for the aggregator to surface.

use crate::domain::types::RawEvent;
use crate::error::{PipelineError, Result};
use crate::infra::metrics::Metrics;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines, StdinLock};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Parse one event line
pub fn parse_event_line(line: &str) -> serde_json::Result<RawEvent> {
    serde_json::from_str(line)
}

/// Iterator of events read from a buffered reader
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line_no: u64,
    metrics: Option<Arc<Metrics>>,
}

impl<R: BufRead> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: reader.lines(), line_no: 0, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl JsonLinesSource<BufReader<File>> {
    /// Open a JSONL event file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(PipelineError::Source)?;
        info!(file = %path.display(), "event_file_opened");
        Ok(Self::new(BufReader::new(file)))
    }
}

impl JsonLinesSource<StdinLock<'static>> {
    /// Read events from standard input
    pub fn stdin() -> Self {
        Self::new(std::io::stdin().lock())
    }
}

impl<R: BufRead> Iterator for JsonLinesSource<R> {
    type Item = Result<RawEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(PipelineError::Source(e))),
            };
            self.line_no += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(metrics) = &self.metrics {
                metrics.record_line_received();
            }

            match parse_event_line(line) {
                Ok(event) => return Some(Ok(event)),
                Err(e) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_line_malformed();
                    }
                    warn!(line_no = %self.line_no, error = %e, "event_line_malformed");
                }
            }
        }
    }
}
