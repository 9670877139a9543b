use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "karaoke-scorer", about = "Score karaoke vocal takes against a reference track")]
pub struct Cli {
    /// Microphone recordings to score (WAV, MP3, FLAC, OGG)
    #[arg(required = true)]
    pub takes: Vec<PathBuf>,

    /// Reference track produced by preprocessing (reference.json)
    #[arg(short, long)]
    pub reference: PathBuf,

    /// Backing track that was audible to the microphone, for echo cancellation
    #[arg(short, long)]
    pub playback: Option<PathBuf>,

    /// Config file (defaults to karaoke.toml, then the user config dir)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write the report JSON here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Playback position of the first recorded sample, in seconds
    #[arg(long, default_value_t = 0.0)]
    pub start_time: f64,

    /// Replay takes at real-time pace through the threaded live session
    #[arg(long)]
    pub realtime: bool,

    /// Disable echo cancellation even when a playback track is given
    #[arg(long)]
    pub no_echo: bool,
}
