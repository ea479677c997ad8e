//! Gas sensor simulator - generates a reading feed for gasmon
//!
//! Places sensors on a square grid around a single leak source and emits
//! JSONL `RawEvent`s whose values follow a Gaussian plume plus noise. Every
//! Nth event is delivered twice to exercise duplicate suppression.
//!
//! Usage:
//!   gasmon-sim --locations-out data/locations.json > events.jsonl
//!   gasmon-sim --tcp 127.0.0.1:7878 --rate 50

use clap::Parser;
use gasmon::domain::types::{EventId, Location, LocationId, RawEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::{self, BufWriter, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "gasmon-sim")]
#[command(about = "Gas sensor event simulator for local testing")]
struct Args {
    /// Number of sensor locations
    #[arg(long, default_value = "12")]
    locations: usize,

    /// Side length of the square grid
    #[arg(long, default_value = "1000.0")]
    grid: f64,

    /// Events per second
    #[arg(long, default_value = "20")]
    rate: u32,

    /// How long to generate events for
    #[arg(long, default_value = "90")]
    duration_secs: u64,

    /// Repeat every Nth event (0 disables duplicates)
    #[arg(long, default_value = "10")]
    duplicate_every: u64,

    /// Seed for locations, leak position and noise
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Write the generated location catalog to this file
    #[arg(long)]
    locations_out: Option<PathBuf>,

    /// Send events to a gasmon TCP listener instead of stdout
    #[arg(long)]
    tcp: Option<String>,
}

/// A single leak with Gaussian falloff
struct Plume {
    x: f64,
    y: f64,
    peak: f64,
    spread: f64,
}

impl Plume {
    fn concentration(&self, x: f64, y: f64) -> f64 {
        let d2 = (x - self.x).powi(2) + (y - self.y).powi(2);
        self.peak * (-d2 / (2.0 * self.spread * self.spread)).exp()
    }
}

fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

fn generate_locations(rng: &mut StdRng, count: usize, grid: f64) -> Vec<Location> {
    (0..count)
        .map(|_| Location {
            id: LocationId(Uuid::now_v7().to_string()),
            x: rng.gen_range(0.0..grid),
            y: rng.gen_range(0.0..grid),
        })
        .collect()
}

fn open_output(args: &Args) -> anyhow::Result<Box<dyn Write>> {
    match &args.tcp {
        Some(addr) => {
            let stream = TcpStream::connect(addr)?;
            info!(addr = %addr, "sim_connected");
            Ok(Box::new(BufWriter::new(stream)))
        }
        None => Ok(Box::new(BufWriter::new(io::stdout().lock()))),
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    anyhow::ensure!(args.locations > 0, "--locations must be at least 1");
    anyhow::ensure!(args.rate > 0, "--rate must be at least 1");

    let mut rng = StdRng::seed_from_u64(args.seed);
    let locations = generate_locations(&mut rng, args.locations, args.grid);
    let plume = Plume {
        x: rng.gen_range(0.0..args.grid),
        y: rng.gen_range(0.0..args.grid),
        peak: 100.0,
        spread: args.grid / 4.0,
    };

    if let Some(path) = &args.locations_out {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(&locations)?)?;
        info!(file = %path.display(), locations = %locations.len(), "sim_locations_written");
    }

    info!(
        locations = %locations.len(),
        rate = %args.rate,
        duration_secs = %args.duration_secs,
        leak_x = %format!("{:.1}", plume.x),
        leak_y = %format!("{:.1}", plume.y),
        "sim_started"
    );

    let mut out = open_output(&args)?;
    let interval = Duration::from_secs(1) / args.rate;
    let end = Instant::now() + Duration::from_secs(args.duration_secs);
    let mut sent = 0u64;
    let mut duplicates = 0u64;

    while Instant::now() < end {
        let location = &locations[rng.gen_range(0..locations.len())];
        let noise: f64 = rng.gen_range(-2.0..2.0);
        let event = RawEvent {
            event_id: EventId(Uuid::now_v7().to_string()),
            location_id: location.id.clone(),
            value: (plume.concentration(location.x, location.y) + noise).max(0.0),
            timestamp: now_millis(),
        };

        let line = serde_json::to_string(&event)?;
        sent += 1;
        let repeat = args.duplicate_every > 0 && sent % args.duplicate_every == 0;

        if let Err(e) = writeln!(out, "{}", line).and_then(|_| {
            if repeat {
                writeln!(out, "{}", line)?;
            }
            out.flush()
        }) {
            warn!(error = %e, "sim_write_failed");
            break;
        }
        if repeat {
            duplicates += 1;
        }

        std::thread::sleep(interval);
    }

    info!(events = %sent, duplicates = %duplicates, "sim_finished");
    Ok(())
}
