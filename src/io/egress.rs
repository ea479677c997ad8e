//! Window output egress - writes averaged results to files and logs
//!
//! Results are written in JSONL format (one JSON object per line), appended
//! to the files named in config.

use crate::domain::types::{AveragedEvent, SensorsAverage, WindowOutput};
use crate::error::{PipelineError, Result};
use crate::services::pipeline::Sink;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Appends each accepted item as one JSON line
///
/// The file (and its parent directories) is created on the first write.
pub struct JsonlSink<T> {
    file_path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
    _item: PhantomData<fn(T)>,
}

impl<T> JsonlSink<T> {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        info!(file_path = %file_path.display(), "egress_initialized");
        Self { file_path, writer: None, written: 0, _item: PhantomData }
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Lines written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    fn writer(&mut self) -> std::io::Result<&mut BufWriter<File>> {
        if self.writer.is_none() {
            // Create parent directories if they don't exist
            if let Some(parent) = self.file_path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let file = OpenOptions::new().create(true).append(true).open(&self.file_path)?;
            self.writer = Some(BufWriter::new(file));
        }
        match self.writer.as_mut() {
            Some(writer) => Ok(writer),
            None => Err(std::io::Error::other("egress writer unavailable")),
        }
    }
}

impl<T: Serialize> Sink<T> for JsonlSink<T> {
    fn accept(&mut self, item: T) -> Result<()> {
        let line = serde_json::to_string(&item)?;
        let writer = self.writer().map_err(PipelineError::Sink)?;
        writeln!(writer, "{}", line).map_err(PipelineError::Sink)?;
        self.written += 1;
        debug!(file = %self.file_path.display(), bytes = %line.len(), "egress_written");
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush().map_err(PipelineError::Sink)?;
        }
        info!(file = %self.file_path.display(), lines = %self.written, "egress_flushed");
        Ok(())
    }
}

/// Logs every window result at info level
#[derive(Debug, Default)]
pub struct LogSink {
    averaged: u64,
    sensors: u64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn averaged(&self) -> u64 {
        self.averaged
    }

    pub fn sensors(&self) -> u64 {
        self.sensors
    }
}

impl Sink<WindowOutput> for LogSink {
    fn accept(&mut self, item: WindowOutput) -> Result<()> {
        match item {
            WindowOutput::Averaged(event) => Sink::<AveragedEvent>::accept(self, event),
            WindowOutput::Sensors(avg) => Sink::<SensorsAverage>::accept(self, avg),
        }
    }
}

impl Sink<AveragedEvent> for LogSink {
    fn accept(&mut self, event: AveragedEvent) -> Result<()> {
        self.averaged += 1;
        info!(
            location_id = %event.location_id,
            x = %event.x,
            y = %event.y,
            value = %event.average_value,
            timestamp = %event.average_timestamp,
            "averaged_event"
        );
        Ok(())
    }
}

impl Sink<SensorsAverage> for LogSink {
    fn accept(&mut self, avg: SensorsAverage) -> Result<()> {
        self.sensors += 1;
        info!(
            window = %avg.window,
            locations = %avg.locations,
            value = %avg.average_value,
            timestamp = %avg.average_timestamp,
            "sensors_average"
        );
        Ok(())
    }
}
