use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "tagbox", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// TOML config file (tracks, storage, motor, transport)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long, global = true)]
    pub list_devices: bool,

    /// Use a specific output device by substring match (overrides config)
    #[arg(long, global = true)]
    pub device: Option<String>,

    /// Stream buffer size in bytes (overrides config; rounded down to whole frames)
    #[arg(long, global = true)]
    pub buffer_bytes: Option<usize>,

    /// Where pulled audio goes
    #[arg(long, global = true, value_enum, default_value_t = Sink::Cpal)]
    pub sink: Sink,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Wait for tags and play the mapped tracks (default)
    Run,

    /// Stream one track and exit when it finishes
    Play {
        /// Storage path (`/sdcard/...`) or a host path to a WAV file
        path: String,
    },

    /// Print the parsed format and data length of a WAV file
    Inspect {
        path: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sink {
    /// Play on an audio output device
    Cpal,
    /// Pull at the real-time rate and discard the audio
    Null,
}
