//! TCP listener for networked event producers
//!
//! Producers connect and write one JSON `RawEvent` per line. Connections are
//! served on tokio tasks and forwarded into a bounded channel with
//! `try_send`; drops are counted in metrics. The aggregator stays on a
//! single consuming thread by pulling from `ChannelSource`.

use crate::domain::types::RawEvent;
use crate::infra::metrics::Metrics;
use crate::io::source::parse_event_line;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Extra wait past the run duration before `ChannelSource` gives up
pub const DEADLINE_GRACE: Duration = Duration::from_millis(250);

/// Bind the event listener on all interfaces
pub async fn bind_event_listener(port: u16) -> std::io::Result<TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %listener.local_addr()?, "event_listener_started");
    Ok(listener)
}

/// Accept producer connections until shutdown
pub async fn run_event_listener(
    listener: TcpListener,
    event_tx: mpsc::Sender<RawEvent>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("event_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        metrics.record_connection();
                        let tx = event_tx.clone();
                        let m = metrics.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, addr, tx, m).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "event_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    socket: tokio::net::TcpStream,
    addr: SocketAddr,
    event_tx: mpsc::Sender<RawEvent>,
    metrics: Arc<Metrics>,
) {
    debug!(peer = %addr, "producer_connected");

    let reader = BufReader::new(socket);
    let mut lines = reader.lines();

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                metrics.record_read_failed();
                warn!(peer = %addr, error = %e, "producer_read_failed");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        metrics.record_line_received();

        let event = match parse_event_line(line) {
            Ok(event) => event,
            Err(e) => {
                metrics.record_line_malformed();
                warn!(peer = %addr, error = %e, "event_line_malformed");
                continue;
            }
        };

        match event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                metrics.record_event_dropped();
                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!(peer = %addr, "event_dropped: channel full");
                    last_drop_warn = Instant::now();
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(peer = %addr, "event_channel_closed");
                break;
            }
        }
    }

    debug!(peer = %addr, "producer_disconnected");
}

/// Blocking iterator over events received on the ingest channel
///
/// Must be driven from a thread outside the tokio runtime. Ends when the
/// channel closes or, if set, when `deadline` passes with no event pending.
pub struct ChannelSource {
    rx: mpsc::Receiver<RawEvent>,
    runtime: Handle,
    deadline: Option<Instant>,
}

impl ChannelSource {
    pub fn new(rx: mpsc::Receiver<RawEvent>, runtime: Handle) -> Self {
        Self { rx, runtime, deadline: None }
    }

    /// Stop waiting for events at `deadline`
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Stop waiting once a run of `run_duration` starting now is over
    ///
    /// Adds `DEADLINE_GRACE` so the aggregator, whose run clock starts a
    /// moment later, reaches its own deadline before this source ends.
    pub fn with_run_deadline(self, run_duration: Duration) -> Self {
        self.with_deadline(Instant::now() + run_duration + DEADLINE_GRACE)
    }
}

impl Iterator for ChannelSource {
    type Item = RawEvent;

    fn next(&mut self) -> Option<RawEvent> {
        let Some(deadline) = self.deadline else {
            return self.rx.blocking_recv();
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return None;
        }

        let rx = &mut self.rx;
        match self.runtime.block_on(async { tokio::time::timeout(remaining, rx.recv()).await }) {
            Ok(event) => event,
            Err(_) => {
                debug!("event_channel_wait_timed_out");
                None
            }
        }
    }
}
