//! Stdin tag reader: one hex UID per line stands in for a tag presentation.

use std::io::{self, BufRead};
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;

use tag_player::tags::{ChannelTagReader, Uid};

/// Spawn a thread that parses UIDs from stdin and feeds the returned reader.
///
/// The reader reports an error once stdin closes.
pub(crate) fn spawn_stdin_reader() -> Result<ChannelTagReader> {
    let (tx, rx) = crossbeam_channel::unbounded();
    thread::Builder::new()
        .name("tag-input".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            forward_lines(stdin.lock(), &tx);
            tracing::debug!("stdin closed");
        })
        .context("spawn tag input thread")?;
    Ok(ChannelTagReader::new(rx))
}

/// Parse each non-empty line as a UID and send it. Returns when input ends or
/// the receiver is gone.
fn forward_lines<B: BufRead>(input: B, tx: &Sender<Uid>) {
    for line in input.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("tag input read failed: {e}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match line.parse::<Uid>() {
            Ok(uid) => {
                if tx.send(uid).is_err() {
                    break;
                }
            }
            Err(e) => tracing::warn!(input = line, "ignoring tag input: {e}"),
        }
    }
}
