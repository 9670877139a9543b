mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cli::Cli;
use karaoke_scorer::audio::capture::FileCapture;
use karaoke_scorer::audio::decode::{decode_mono, DecodedAudio};
use karaoke_scorer::config::{self, EngineConfig};
use karaoke_scorer::{run_to_end, LiveSession, ReferenceTrack, SessionReport};

#[derive(Serialize)]
struct TakeReport {
    take: String,
    report: SessionReport,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    // Load config: explicit --config path, or auto-detect karaoke.toml / global config
    let config_path = cli.config.clone().or_else(|| {
        let local = PathBuf::from("karaoke.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("karaoke").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    });
    let mut config = match config_path {
        Some(ref path) => match config::load_config(path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            Err(err) => {
                log::warn!("Failed to load config ({}), using defaults", err);
                EngineConfig::default()
            }
        },
        None => EngineConfig::default(),
    };
    if cli.no_echo {
        config.echo.enabled = false;
    }
    config.validate().context("Invalid configuration")?;

    for take in &cli.takes {
        if !take.exists() {
            anyhow::bail!("Take not found: {}", take.display());
        }
    }

    let track = ReferenceTrack::load(&cli.reference)
        .with_context(|| format!("Failed to load reference {}", cli.reference.display()))?;
    let track = Arc::new(track);

    let playback = match &cli.playback {
        Some(path) => Some(
            decode_mono(path).with_context(|| format!("Failed to decode playback {}", path.display()))?,
        ),
        None => None,
    };

    log::info!("karaoke-scorer - {} take(s)", cli.takes.len());
    log::info!("Reference: {} ({:.1}s)", cli.reference.display(), track.duration());
    log::info!(
        "Weights: pitch {:.2} / energy {:.2}",
        config.scoring.pitch_weight,
        config.scoring.energy_weight
    );

    let reports: Vec<TakeReport> = if cli.realtime {
        cli.takes
            .iter()
            .map(|take| score_live(take, playback.clone(), &config, track.clone(), cli.start_time))
            .collect::<Result<_>>()?
    } else if cli.takes.len() == 1 {
        vec![score_take(&cli.takes[0], playback.clone(), &config, track.clone(), cli.start_time, true)?]
    } else {
        cli.takes
            .par_iter()
            .map(|take| score_take(take, playback.clone(), &config, track.clone(), cli.start_time, false))
            .collect::<Result<_>>()?
    };

    let json = if reports.len() == 1 {
        serde_json::to_string_pretty(&reports[0])?
    } else {
        serde_json::to_string_pretty(&reports)?
    };
    match &cli.output {
        Some(path) => {
            std::fs::write(path, json)
                .with_context(|| format!("Failed to write report {}", path.display()))?;
            log::info!("Done! Report: {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn open_take(take: &Path, playback: Option<DecodedAudio>) -> Result<FileCapture> {
    let mic = decode_mono(take).with_context(|| format!("Failed to decode {}", take.display()))?;
    log::info!("Take {}: {:.1}s @ {} Hz", take.display(), mic.duration(), mic.sample_rate);
    Ok(FileCapture::new(mic, playback))
}

fn progress_bar(duration: f64) -> Result<ProgressBar> {
    let pb = ProgressBar::new((duration * 1000.0) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {percent}% {msg}")?
            .progress_chars("=>-"),
    );
    Ok(pb)
}

fn score_take(
    take: &Path,
    playback: Option<DecodedAudio>,
    config: &EngineConfig,
    track: Arc<ReferenceTrack>,
    start_time: f64,
    show_progress: bool,
) -> Result<TakeReport> {
    let mut capture = open_take(take, playback)?;
    let pb = if show_progress {
        Some(progress_bar(capture.duration())?)
    } else {
        None
    };

    let report = run_to_end(config, track, &mut capture, start_time, |score| {
        if let Some(pb) = &pb {
            pb.set_position(((score.sample.timestamp - start_time).max(0.0) * 1000.0) as u64);
            pb.set_message(format!("combo {}", score.combo.display_streak));
        }
    })
    .with_context(|| format!("Failed to score {}", take.display()))?;

    if let Some(pb) = pb {
        pb.finish_with_message("Scoring complete");
    }
    Ok(TakeReport {
        take: take.display().to_string(),
        report,
    })
}

fn score_live(
    take: &Path,
    playback: Option<DecodedAudio>,
    config: &EngineConfig,
    track: Arc<ReferenceTrack>,
    start_time: f64,
) -> Result<TakeReport> {
    let capture = open_take(take, playback)?.paced(true);
    let pb = progress_bar(capture.duration())?;
    let mut session = LiveSession::start(config, track, Box::new(capture), start_time)
        .with_context(|| format!("Failed to start session for {}", take.display()))?;

    let interval = Duration::from_secs_f64(config.frame_interval_seconds());
    while session.is_running() {
        for score in session.pump() {
            pb.set_position(((score.sample.timestamp - start_time).max(0.0) * 1000.0) as u64);
            let combined = score
                .sample
                .combined
                .map_or_else(|| "-".to_string(), |c| format!("{:.2}", c));
            pb.set_message(format!("score {} combo {}", combined, score.combo.display_streak));
        }
        std::thread::sleep(interval);
    }
    let report = session.stop();
    pb.finish_with_message("Session complete");

    Ok(TakeReport {
        take: take.display().to_string(),
        report,
    })
}
