use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    analysis::{AnalysisClient, AnalysisService, StrokeParams},
    device::{discover, DeviceEvent, MotionProfile, SimulatedDevice, DEFAULT_SCAN_WINDOW},
    models::{AnalysisOutcome, AnalysisResult, DeviceInfo},
    recorder::{parse_csv, RecordingStore},
    sensing::LiveSource,
    session::SessionController,
    settings::{default_settings_path, SettingsStore},
};

const SIMULATED_NAME: &str = "WT901BLE68";
const SIMULATED_MAC: &str = "5C:00:00:00:00:01";

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Settings file, defaults to the user config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Analysis server base URL, overrides the settings file
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the analysis server answers
    Health,
    /// Record from the simulated sensor, then upload or save the CSV
    Record {
        #[arg(short, long, default_value_t = 5)]
        seconds: u64,

        #[arg(short, long, value_enum, default_value_t = Profile::Swing)]
        profile: Profile,

        /// Save to DIR (or the configured recordings directory) instead of uploading
        #[arg(long, value_name = "DIR", num_args = 0..=1)]
        save: Option<Option<PathBuf>>,
    },
    /// Run server-side stroke detection on a saved CSV
    Strokes {
        csv: PathBuf,

        #[arg(long)]
        threshold: Option<f64>,

        #[arg(long)]
        slice_len: Option<usize>,
    },
    /// Recordings stored on the server
    Recordings {
        #[command(subcommand)]
        command: RecordingsCommand,
    },
    /// Recordings saved on this machine
    Files {
        #[command(subcommand)]
        command: FilesCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RecordingsCommand {
    List,
    Show { id: String },
}

#[derive(Subcommand, Debug)]
enum FilesCommand {
    List {
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    Info { path: PathBuf },
    /// Delete a recording; bare file names are looked up in DIR
    Delete {
        path: PathBuf,

        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Profile {
    Rest,
    Swing,
}

impl From<Profile> for MotionProfile {
    fn from(value: Profile) -> Self {
        match value {
            Profile::Rest => MotionProfile::Resting,
            Profile::Swing => MotionProfile::Swinging,
        }
    }
}

pub async fn execute(args: Args) -> Result<()> {
    let settings_path = args.config.unwrap_or_else(default_settings_path);
    let settings = SettingsStore::new(settings_path)?;
    if let Some(url) = args.server {
        settings.override_server_url(url);
    }
    log::debug!("Settings loaded from {}", settings.path().display());

    match args.command {
        Commands::Health => health(&settings).await,
        Commands::Record {
            seconds,
            profile,
            save,
        } => record(&settings, seconds, profile, save).await,
        Commands::Strokes {
            csv,
            threshold,
            slice_len,
        } => {
            let mut params = settings.stroke();
            if let Some(threshold) = threshold {
                params.threshold = threshold;
            }
            if let Some(slice_len) = slice_len {
                params.slice_len = slice_len;
            }
            strokes(&settings, csv, params).await
        }
        Commands::Recordings { command } => recordings(&settings, command).await,
        Commands::Files { command } => files(&settings, command),
    }
}

async fn health(settings: &SettingsStore) -> Result<()> {
    let client = AnalysisClient::new(&settings.server())?;
    let status = client.health_check().await;

    println!("{}: {}", client.base_url(), status.message);
    if !status.reachable {
        bail!("analysis server unreachable");
    }
    Ok(())
}

async fn record(
    settings: &SettingsStore,
    seconds: u64,
    profile: Profile,
    save: Option<Option<PathBuf>>,
) -> Result<()> {
    if seconds == 0 {
        bail!("--seconds must be at least 1");
    }

    let device = SimulatedDevice::new(SIMULATED_NAME, SIMULATED_MAC, profile.into());

    // The simulated radio advertises exactly one device and then goes quiet.
    let (radio, mut scan) = mpsc::channel(8);
    radio
        .send(DeviceEvent::Found(DeviceInfo::new(SIMULATED_NAME, SIMULATED_MAC)))
        .await
        .context("simulated radio closed")?;
    drop(radio);
    let found = discover(&mut scan, DEFAULT_SCAN_WINDOW).await;
    for info in &found {
        println!("found {} ({})", info.name, info.mac);
    }

    let client = Arc::new(AnalysisClient::new(&settings.server())?);
    let controller =
        SessionController::new(Arc::new(LiveSource::new(device)), client, &settings.get());

    let connected = controller.connect().await?;
    println!(
        "connected to {} ({}), {} configuration step(s) ok",
        connected.device.name,
        connected.device.mac,
        connected.config.completed.len()
    );
    for failure in &connected.config.failures {
        println!("  {} failed: {}", failure.step, failure.message);
    }

    let recording_id = controller.start_recording().await?;
    println!("recording {recording_id} for {seconds}s");
    for _ in 0..seconds {
        tokio::time::sleep(Duration::from_secs(1)).await;
        let snapshot = controller.snapshot().await;
        let magnitude = controller
            .latest_reading()
            .map(|reading| reading.acceleration_magnitude())
            .unwrap_or_default();
        println!(
            "  {:>6} rows  |a| = {:.3} g",
            snapshot.recorded_rows, magnitude
        );
    }

    let finished = match save {
        Some(dir) => {
            let dir = dir.unwrap_or_else(|| settings.recording().output_dir);
            let store = RecordingStore::new(dir);
            controller
                .stop_recording_and_save(&store)
                .await
                .map(|path| println!("saved {}", path.display()))
        }
        None => controller
            .stop_recording_and_upload()
            .await
            .map(|outcome| print_outcome(&outcome)),
    };

    controller.disconnect().await?;
    finished.map_err(Into::into)
}

async fn strokes(settings: &SettingsStore, csv: PathBuf, params: StrokeParams) -> Result<()> {
    let text = std::fs::read_to_string(&csv)
        .with_context(|| format!("Failed to read {}", csv.display()))?;
    let readings = parse_csv(&text).with_context(|| format!("{} is not a recording", csv.display()))?;
    if readings.is_empty() {
        bail!("{} has no data rows", csv.display());
    }
    println!(
        "{} rows from {}, threshold {}, slice length {}",
        readings.len(),
        readings[0].device.name,
        params.threshold,
        params.slice_len
    );

    let client = AnalysisClient::new(&settings.server())?;
    let result = client.analyze_strokes(&text, params).await?;
    print_result(&result)
}

async fn recordings(settings: &SettingsStore, command: RecordingsCommand) -> Result<()> {
    let client = AnalysisClient::new(&settings.server())?;
    match command {
        RecordingsCommand::List => {
            let list = client.list_recordings().await?;
            if list.is_empty() {
                println!("no recordings on {}", client.base_url());
            }
            for summary in list {
                println!(
                    "{:<12} {:<16} {:>8} rows {:>7.1}s  strokes: {}",
                    summary.session_id.as_deref().unwrap_or("-"),
                    summary.device_name.as_deref().unwrap_or("-"),
                    summary.data_points.unwrap_or_default(),
                    summary.recording_duration.unwrap_or_default(),
                    summary
                        .strokes_detected
                        .map(|count| count.to_string())
                        .unwrap_or_else(|| "-".into()),
                );
            }
            Ok(())
        }
        RecordingsCommand::Show { id } => {
            let result = client.fetch_recording(&id).await?;
            print_result(&result)
        }
    }
}

fn files(settings: &SettingsStore, command: FilesCommand) -> Result<()> {
    match command {
        FilesCommand::List { dir } => {
            let store = RecordingStore::new(dir.unwrap_or_else(|| settings.recording().output_dir));
            let paths = store.list()?;
            if paths.is_empty() {
                println!("no recordings in {}", store.dir().display());
            }
            for path in paths {
                let info = store.info(&path)?;
                println!("{:<36} {:>8} {:>8} rows", info.name, info.size_label, info.data_rows);
            }
            Ok(())
        }
        FilesCommand::Info { path } => {
            let store = store_for(&path);
            print_json(&store.info(&path)?)
        }
        FilesCommand::Delete { path, dir } => {
            let store = RecordingStore::new(dir.unwrap_or_else(|| settings.recording().output_dir));
            let path = if path.components().count() == 1 {
                store.dir().join(path)
            } else {
                path
            };
            store.delete(&path)?;
            println!("deleted {}", path.display());
            Ok(())
        }
    }
}

fn store_for(path: &std::path::Path) -> RecordingStore {
    RecordingStore::new(path.parent().map(PathBuf::from).unwrap_or_default())
}

fn print_outcome(outcome: &AnalysisOutcome) {
    if let Some(reason) = &outcome.fallback_reason {
        println!("server unavailable ({reason}), showing offline analysis");
    }
    if let Err(err) = print_result(&outcome.result) {
        log::warn!("Could not print analysis result: {}", err);
    }
}

fn print_result(result: &AnalysisResult) -> Result<()> {
    println!("{} analysis:", result.origin.as_str());
    print_json(&result.payload)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
