use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use punchcard_core::{
    CaptureMethod, GeoPoint, GeofenceConfig, PunchOrigin, PunchOutcome, PunchRequest, RfidCode,
    WorkerId,
};
use punchcard_hw::{ExtractorProcess, FixedLocation, LineRfidReader, LocationProvider, NoLocation};
use tracing_subscriber::EnvFilter;

mod client;
mod mirror;
mod session;

use client::{Bus, DbusClient, PunchClient};
use mirror::SharedMirror;
use session::{CaptureSession, Device, SessionConfig, SessionContext, SessionEvent, SessionState};

#[derive(Parser)]
#[command(name = "punchcard", about = "Punchcard attendance CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session_bus: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a capture session until interrupted
    Kiosk {
        /// Capture method: face or rfid
        #[arg(long, default_value = "face")]
        method: CaptureMethod,
        /// Face extractor command line
        #[arg(long, default_value = "punchcard-extractor")]
        extractor: String,
        /// RFID reader device node (stdin when omitted)
        #[arg(long)]
        reader: Option<PathBuf>,
        /// Self-service session for this worker ID (personal device)
        #[arg(long)]
        employee: Option<String>,
        /// Device latitude for self-service geofence checks
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Device longitude for self-service geofence checks
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
        /// Face detection tick in milliseconds
        #[arg(long, default_value_t = 1000)]
        tick_ms: u64,
        /// Maximum gap between two matching ticks, in milliseconds
        #[arg(long, default_value_t = 2000)]
        stability_window_ms: u64,
        /// Consecutive matching ticks required to confirm an identity
        #[arg(long, default_value_t = 3)]
        stability_hits: u32,
        /// Bound on a position fix, in seconds
        #[arg(long, default_value_t = 15)]
        location_timeout_secs: u64,
    },
    /// Submit a single RFID punch from the console
    Punch {
        /// RFID code, e.g. AB1234
        code: String,
    },
    /// Enroll a new worker
    Enroll {
        #[arg(short, long)]
        name: String,
        /// RFID code to assign
        #[arg(long)]
        rfid: Option<String>,
    },
    /// Add a reference face embedding (JSON array file) to a worker
    AddEmbedding {
        worker_id: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// List enrolled workers
    List,
    /// Remove a worker with their embeddings and records
    Remove {
        /// Worker ID to remove
        id: String,
    },
    /// Show today's attendance records for a worker
    Today { worker_id: String },
    /// Show or change the geofence
    Geofence {
        #[command(subcommand)]
        action: Option<GeofenceAction>,
    },
    /// Show daemon status
    Status,
}

#[derive(Subcommand)]
enum GeofenceAction {
    /// Enable the geofence around a center point
    Set {
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Radius in meters
        #[arg(long)]
        radius: f64,
    },
    /// Disable the geofence (self-service face punches are then rejected)
    Disable,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let bus = if cli.session_bus {
        Bus::Session
    } else {
        Bus::System
    };
    let client = DbusClient::connect(bus)
        .await
        .context("failed to connect to punchcardd")?;

    match cli.command {
        Commands::Kiosk {
            method,
            extractor,
            reader,
            employee,
            lat,
            lon,
            tick_ms,
            stability_window_ms,
            stability_hits,
            location_timeout_secs,
        } => {
            let device = match method {
                CaptureMethod::Face => Device::Face(Box::new(
                    ExtractorProcess::from_command_line(&extractor)
                        .context("extractor command is empty")?,
                )),
                CaptureMethod::Rfid => Device::Rfid(Box::new(match reader {
                    Some(path) => LineRfidReader::device(path),
                    None => LineRfidReader::stdin(),
                })),
            };
            let context = match employee {
                Some(id) => SessionContext::personal(WorkerId::new(id)),
                None => SessionContext::console(),
            };
            let location: Box<dyn LocationProvider> = match (lat, lon) {
                (Some(lat), Some(lon)) => Box::new(FixedLocation(GeoPoint::new(lat, lon))),
                _ => Box::new(NoLocation),
            };
            let config = SessionConfig {
                tick_interval: Duration::from_millis(tick_ms.max(1)),
                stability_window: Duration::from_millis(stability_window_ms),
                stability_threshold: stability_hits,
                location_timeout: Duration::from_secs(location_timeout_secs),
                ..SessionConfig::default()
            };
            run_kiosk(client, context, device, location, config).await?;
        }
        Commands::Punch { code } => {
            let code = RfidCode::parse(&code)?;
            let request = PunchRequest::for_rfid(code.as_str(), PunchOrigin::Console);
            let outcome = client.submit_punch(&request).await?;
            print_outcome(&outcome);
        }
        Commands::Enroll { name, rfid } => {
            if let Some(code) = &rfid {
                RfidCode::parse(code)?;
            }
            let worker = client.enroll_worker(&name, rfid.as_deref()).await?;
            println!("Enrolled {} ({})", worker.name, worker.id);
        }
        Commands::AddEmbedding { worker_id, file } => {
            let json = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let values: Vec<f32> = serde_json::from_str(&json)
                .with_context(|| format!("{} is not a JSON array of numbers", file.display()))?;
            let id = client
                .add_embedding(&WorkerId::new(worker_id), &punchcard_core::Embedding::new(values))
                .await?;
            println!("Added embedding {id}");
        }
        Commands::List => {
            let workers = client.list_workers().await?;
            if workers.is_empty() {
                println!("No workers enrolled");
            }
            for worker in workers {
                let rfid = worker
                    .rfid_code
                    .as_ref()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_else(|| "-".into());
                println!("{}  {:<8}  {}", worker.id, rfid, worker.name);
            }
        }
        Commands::Remove { id } => {
            if client.remove_worker(&WorkerId::new(id.clone())).await? {
                println!("Removed {id}");
            } else {
                bail!("no worker with id {id}");
            }
        }
        Commands::Today { worker_id } => {
            let records = client.records_today(&WorkerId::new(worker_id)).await?;
            if records.is_empty() {
                println!("No punches today");
            }
            for record in records {
                let fmt = |t: Option<chrono::DateTime<Utc>>| {
                    t.map(|t| t.format("%H:%M:%S").to_string())
                        .unwrap_or_else(|| "--:--:--".into())
                };
                let flag = if record.needs_reconciliation {
                    "  needs reconciliation"
                } else {
                    ""
                };
                println!(
                    "in {}  out {}  ({}){flag}",
                    fmt(record.check_in),
                    fmt(record.check_out),
                    record.method
                );
            }
        }
        Commands::Geofence { action } => {
            let config = match action {
                None => client.geofence().await?,
                Some(GeofenceAction::Set { lat, lon, radius }) => {
                    let config = GeofenceConfig::around(GeoPoint::new(lat, lon), radius);
                    config.check()?;
                    client.set_geofence(&config).await?;
                    config
                }
                Some(GeofenceAction::Disable) => {
                    let mut config = client.geofence().await?;
                    config.enabled = false;
                    client.set_geofence(&config).await?;
                    config
                }
            };
            print_geofence(&config);
        }
        Commands::Status => {
            let status = client.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

async fn run_kiosk(
    client: DbusClient,
    context: SessionContext,
    device: Device,
    location: Box<dyn LocationProvider>,
    config: SessionConfig,
) -> Result<()> {
    let mirror = SharedMirror::new();
    let mut countdown = mirror.subscribe();
    let session = CaptureSession::new(Arc::new(client), mirror.clone(), context, device)
        .with_config(config)
        .with_location(location);
    let (mut handle, mut events) = session.spawn();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                let state = handle.close().await;
                tracing::info!(?state, "kiosk closed");
                return Ok(());
            }
            state = handle.finished() => {
                if let SessionState::Error(e) = state {
                    bail!(e);
                }
                return Ok(());
            }
            Some(event) = events.recv() => print_event(&event),
            Ok(()) = countdown.changed() => {
                if let Some((worker_id, secs)) = mirror.countdown(Utc::now()) {
                    println!("cooldown: {worker_id} may punch again in {secs}s");
                }
            }
        }
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::State(SessionState::Ready) => println!("Ready"),
        SessionEvent::State(SessionState::Error(e)) => eprintln!("Error: {e}"),
        SessionEvent::State(state) => tracing::trace!(?state, "kiosk state"),
        SessionEvent::Accepted {
            worker_name,
            direction,
            ..
        } => println!("{worker_name}: checked {direction}"),
        SessionEvent::Rejected(rejection) => println!("Rejected: {rejection}"),
    }
}

fn print_outcome(outcome: &PunchOutcome) {
    match outcome {
        PunchOutcome::Accepted {
            worker_name,
            direction,
            record_id,
            ..
        } => println!("{worker_name}: checked {direction} (record {record_id})"),
        PunchOutcome::CooldownActive {
            worker_id,
            remaining_seconds,
        } => println!("Rejected: {worker_id} punched recently, wait {remaining_seconds}s"),
        PunchOutcome::OutOfRange { distance_meters } => {
            println!("Rejected: outside the shop area ({distance_meters:.0} m away)")
        }
        PunchOutcome::UnknownIdentity => println!("Rejected: unknown RFID code"),
        PunchOutcome::LocationUnavailable => println!("Rejected: location unavailable"),
        PunchOutcome::GeofenceNotConfigured => println!("Rejected: shop area not configured"),
    }
}

fn print_geofence(config: &GeofenceConfig) {
    let state = if config.enabled { "enabled" } else { "disabled" };
    match (config.center, config.radius_m) {
        (Some(center), Some(radius)) => println!(
            "Geofence {state}: {:.6}, {:.6} radius {radius} m",
            center.latitude, center.longitude
        ),
        _ => println!("Geofence {state}: no center or radius set"),
    }
}
