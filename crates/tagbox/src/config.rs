//! Configuration loading and parsing.
//!
//! Every field is optional; anything missing falls back to the firmware
//! defaults (factory tag table, `/sdcard` mount, 2 KiB buffer, 200 ms polling).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use tag_player::config::StreamConfig;
use tag_player::motor::{MotorConfig, Phase};
use tag_player::storage::FsStorage;
use tag_player::tags::{TrackMap, Uid};
use tag_player::transport::ResumePolicy;

const DEFAULT_MOUNT_POINT: &str = "/sdcard";

/// Top-level tagbox configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Path prefix used by track paths (default `/sdcard`).
    pub mount_point: Option<String>,
    /// Host directory the mount point maps onto (default: current directory).
    pub storage_root: Option<PathBuf>,
    /// Tag reader / session poll interval in milliseconds (default 200).
    pub tag_poll_ms: Option<u64>,
    pub stream: Option<StreamSection>,
    /// Tag → track table. Replaces the factory table when present.
    pub tracks: Option<Vec<TrackEntry>>,
    pub motor: Option<MotorSection>,
    pub transport: Option<TransportSection>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StreamSection {
    /// Stream buffer size in bytes.
    pub buffer_bytes: Option<usize>,
}

/// One `[[tracks]]` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackEntry {
    /// Hex UID, e.g. `DE:AD:BE:EF`.
    pub uid: String,
    pub path: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MotorSection {
    pub enabled: Option<bool>,
    pub rpm: Option<u32>,
    pub steps_per_revolution: Option<u32>,
    /// Phase table as 4-character coil strings, e.g. `["1000", "1100"]`.
    pub sequence: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportSection {
    /// Output device substring.
    pub device: Option<String>,
    pub resume_on_suspend: Option<ResumeSetting>,
}

/// Config spelling of [`ResumePolicy`].
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResumeSetting {
    Always,
    WhileStreaming,
}

impl From<ResumeSetting> for ResumePolicy {
    fn from(value: ResumeSetting) -> Self {
        match value {
            ResumeSetting::Always => ResumePolicy::Always,
            ResumeSetting::WhileStreaming => ResumePolicy::WhileStreaming,
        }
    }
}

impl AppConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<AppConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Stream settings, with an optional buffer size override from the CLI.
    pub fn stream_config(&self, buffer_bytes: Option<usize>) -> StreamConfig {
        let mut cfg = StreamConfig::default();
        if let Some(bytes) = buffer_bytes.or(self.stream.as_ref().and_then(|s| s.buffer_bytes)) {
            cfg.buffer_capacity = bytes;
        }
        if let Some(ms) = self.tag_poll_ms {
            cfg.poll_interval = Duration::from_millis(ms.max(1));
        }
        cfg
    }

    pub fn storage(&self) -> FsStorage {
        let mount = self.mount_point.as_deref().unwrap_or(DEFAULT_MOUNT_POINT);
        let root = self.storage_root.clone().unwrap_or_else(|| PathBuf::from("."));
        FsStorage::new(mount, root)
    }

    pub fn track_map(&self) -> Result<TrackMap> {
        let Some(entries) = self.tracks.as_ref() else {
            return Ok(TrackMap::factory());
        };
        let mut map = TrackMap::new();
        for entry in entries {
            let uid: Uid = entry
                .uid
                .parse()
                .with_context(|| format!("parse track uid {:?}", entry.uid))?;
            map.insert(uid, entry.path.clone());
        }
        Ok(map)
    }

    pub fn motor_config(&self) -> Result<MotorConfig> {
        let mut cfg = MotorConfig::default();
        let Some(motor) = self.motor.as_ref() else {
            return Ok(cfg);
        };
        if let Some(enabled) = motor.enabled {
            cfg.enabled = enabled;
        }
        if let Some(rpm) = motor.rpm {
            cfg.rpm = rpm;
        }
        if let Some(spr) = motor.steps_per_revolution {
            cfg.steps_per_revolution = spr;
        }
        if let Some(seq) = motor.sequence.as_ref() {
            cfg.sequence = seq
                .iter()
                .map(|s| parse_phase(s))
                .collect::<Result<Vec<_>>>()
                .context("parse motor sequence")?;
            if cfg.sequence.is_empty() {
                return Err(anyhow!("motor sequence must not be empty"));
            }
        }
        Ok(cfg)
    }

    pub fn resume_policy(&self) -> ResumePolicy {
        self.transport
            .as_ref()
            .and_then(|t| t.resume_on_suspend)
            .map(ResumePolicy::from)
            .unwrap_or_default()
    }

    /// Output device, with the CLI flag taking precedence.
    pub fn device(&self, cli: Option<&str>) -> Option<String> {
        let configured = self.transport.as_ref().and_then(|t| t.device.as_deref());
        normalize_device_name(cli.or(configured))
    }
}

fn parse_phase(s: &str) -> Result<Phase> {
    let bits: Vec<bool> = s
        .trim()
        .chars()
        .map(|c| match c {
            '1' => Ok(true),
            '0' => Ok(false),
            other => Err(anyhow!("invalid coil level {other:?} in {s:?}")),
        })
        .collect::<Result<_>>()?;
    <Phase>::try_from(bits.as_slice())
        .map_err(|_| anyhow!("phase {s:?} must have exactly 4 coils"))
}

fn normalize_device_name(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
