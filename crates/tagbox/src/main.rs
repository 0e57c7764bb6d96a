//! tagbox: plays a WAV track when a mapped tag is presented.
//!
//! ## Modes
//! - `run`: tag-driven control loop; UIDs are typed on stdin as hex.
//! - `play`: stream one file to the output and exit when it drains.
//! - `inspect`: print a file's parsed format and data length.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use tagbox::cli::{Args, Command};
use tagbox::config::AppConfig;
use tagbox::runtime;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,tagbox=info,tag_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = match args.config.as_deref() {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match args.cmd.clone().unwrap_or(Command::Run) {
        Command::Run => runtime::run(&args, &config),
        Command::Play { path } => runtime::play_one(&args, &config, &path),
        Command::Inspect { path } => runtime::inspect(&path),
    }
}
