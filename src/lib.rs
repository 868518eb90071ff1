pub mod alarm;
pub mod audio;
pub mod commands;
pub mod db;
pub mod engine;
pub mod error;
pub mod models;
pub mod notification;
pub mod overlay;
pub mod registry;
pub mod scheduler;
pub mod settings;
mod utils;

pub use engine::AlarmEngine;

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use audio::{sounds::SoundLibrary, AudioEngineHandle};
use db::Database;
use log::{info, warn};
use notification::MarkerStore;
use overlay::OverlayEvent;
use settings::SettingsStore;
use tokio::sync::{broadcast::error::RecvError, mpsc};

fn data_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("DAWNBELL_DATA_DIR") {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_dir()
        .map(|dir| dir.join("dawnbell"))
        .ok_or_else(|| anyhow!("no data directory available; set DAWNBELL_DATA_DIR"))
}

fn debug_enabled() -> bool {
    std::env::var("DAWNBELL_DEBUG")
        .map(|value| value == "1")
        .unwrap_or(false)
}

pub fn run() {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("dawnbell starting up...");

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
        .and_then(|runtime| runtime.block_on(serve()));

    if let Err(err) = result {
        log::error!("dawnbell stopped: {err:#}");
        std::process::exit(1);
    }
}

async fn serve() -> Result<()> {
    let app_data_dir = data_dir()?;
    std::fs::create_dir_all(&app_data_dir)
        .with_context(|| format!("failed to create {}", app_data_dir.display()))?;

    let debug = debug_enabled();
    if debug {
        info!("Debug mode: short poll interval");
    }

    let settings = SettingsStore::new(app_data_dir.join("settings.json"))?;
    let snapshot = settings.snapshot();
    let sounds_dir = snapshot
        .audio
        .sounds_dir
        .clone()
        .unwrap_or_else(|| app_data_dir.join("sounds"));

    let audio = AudioEngineHandle::new(SoundLibrary::new(sounds_dir), snapshot.audio.to_config());
    if let Err(e) = audio.start_background_keep_alive() {
        warn!("Keep-alive tone unavailable: {e}");
    }

    let database = Database::new(app_data_dir.join("dawnbell.sqlite3"))?;
    let markers = MarkerStore::new(app_data_dir.join("dismissal_marker.json"));
    let engine = AlarmEngine::open(
        database,
        settings,
        Arc::new(audio.clone()),
        markers,
        debug,
    )
    .await?;

    let mut events = engine.overlay().subscribe();
    let overlay_log = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(OverlayEvent::Ringing { alarm }) => {
                    info!(
                        "RINGING: {} ({}); type 'dismiss' or 'snooze'",
                        alarm.label,
                        alarm.display_time
                    )
                }
                Ok(OverlayEvent::Dismissed { alarm }) => info!("Dismissed: {}", alarm.label),
                Ok(OverlayEvent::Snoozed { alarm, until }) => {
                    info!("Snoozed: {} until {}", alarm.label, until.to_rfc3339())
                }
                Err(RecvError::Lagged(skipped)) => warn!("Overlay log skipped {skipped} events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    engine.start().await?;
    info!(
        "Watching {} alarm(s); type 'help' for commands",
        engine.alarms().len()
    );

    let mut lines = spawn_stdin_reader();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result.context("failed to listen for ctrl-c")?;
                break;
            }
            line = lines.recv(), if stdin_open => {
                let Some(line) = line else {
                    info!("stdin closed; commands disabled until restart");
                    stdin_open = false;
                    continue;
                };
                let reply = match commands::Command::parse(&line) {
                    Ok(command) => commands::execute(&engine, command).await,
                    Err(e) => Err(e),
                };
                match reply {
                    Ok(text) => println!("{text}"),
                    Err(e) => eprintln!("error: {e:#}"),
                }
            }
        }
    }
    info!("Shutting down");

    engine.shutdown().await;
    overlay_log.abort();
    let _ = audio.stop_background_keep_alive();
    Ok(())
}

/// Reads non-empty stdin lines on a detached thread, outside the runtime's
/// blocking pool so a pending read never holds up shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let trimmed = line.trim().to_owned();
            if trimmed.is_empty() {
                continue;
            }
            if tx.blocking_send(trimmed).is_err() {
                break;
            }
        }
    });
    rx
}
