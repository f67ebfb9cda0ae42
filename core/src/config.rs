use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
pub use toml::Value as TomlValue;
use tracing::debug;

use crate::error::LivepatchErr;
use crate::error::Result;

pub const CONFIG_TOML_FILE: &str = "livepatch.toml";

const DEFAULT_MIN_DWELL_MS: u64 = 600;
const DEFAULT_CASCADE_STEP_MS: u64 = 150;
const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;
const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 300_000;
const DEFAULT_SIGNAL_CHANNEL_CAPACITY: usize = 256;
const DEFAULT_PREVIEW_WIDTH: usize = 80;

/// Raw shape of `livepatch.toml`. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigToml {
    /// Minimum time a run's progress stays pending before it may succeed.
    pub min_dwell_ms: Option<u64>,
    /// Delay between client-side cascade steps.
    pub cascade_step_ms: Option<u64>,
    /// Text coalescing tick.
    pub frame_interval_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub signal_channel_capacity: Option<usize>,
    /// Maximum characters shown in an inserted-text preview.
    pub preview_width: Option<usize>,
}

/// Resolved pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub min_dwell: Duration,
    pub cascade_step: Duration,
    pub frame_interval: Duration,
    pub stream_idle_timeout: Duration,
    pub signal_channel_capacity: usize,
    pub preview_width: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_toml(ConfigToml::default())
    }
}

impl PipelineConfig {
    pub fn from_toml(cfg: ConfigToml) -> Self {
        Self {
            min_dwell: Duration::from_millis(cfg.min_dwell_ms.unwrap_or(DEFAULT_MIN_DWELL_MS)),
            cascade_step: Duration::from_millis(
                cfg.cascade_step_ms.unwrap_or(DEFAULT_CASCADE_STEP_MS),
            ),
            // A zero tick would spin the coalescer.
            frame_interval: Duration::from_millis(
                cfg.frame_interval_ms
                    .unwrap_or(DEFAULT_FRAME_INTERVAL_MS)
                    .max(1),
            ),
            stream_idle_timeout: Duration::from_millis(
                cfg.stream_idle_timeout_ms
                    .unwrap_or(DEFAULT_STREAM_IDLE_TIMEOUT_MS),
            ),
            signal_channel_capacity: cfg
                .signal_channel_capacity
                .unwrap_or(DEFAULT_SIGNAL_CHANNEL_CAPACITY)
                .max(1),
            preview_width: cfg.preview_width.unwrap_or(DEFAULT_PREVIEW_WIDTH).max(1),
        }
    }

    /// Load `path` (when given and present) and layer `cli_overrides` on top.
    /// Overrides are `(key, value)` pairs as produced by `-c key=value`.
    pub fn load_with_overrides(
        path: Option<&Path>,
        cli_overrides: Vec<(String, TomlValue)>,
    ) -> Result<Self> {
        let mut table = match path {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "loading config");
                let raw = std::fs::read_to_string(path)?;
                toml::from_str::<toml::Table>(&raw)?
            }
            Some(path) => {
                debug!(path = %path.display(), "config file missing; using defaults");
                toml::Table::new()
            }
            None => toml::Table::new(),
        };
        for (key, value) in cli_overrides {
            table.insert(key, value);
        }

        let cfg: ConfigToml = TomlValue::Table(table).try_into()?;
        Ok(Self::from_toml(cfg))
    }
}

/// Parse one `key=value` override. The value is read as TOML, falling back
/// to a plain string when it does not parse.
pub fn parse_override(raw: &str) -> Result<(String, TomlValue)> {
    let Some((key, value)) = raw.split_once('=') else {
        return Err(LivepatchErr::Config(format!(
            "override `{raw}` is not of the form key=value"
        )));
    };
    let key = key.trim();
    if key.is_empty() {
        return Err(LivepatchErr::Config(format!("override `{raw}` has an empty key")));
    }
    let value = value.trim();
    let parsed = toml::from_str::<toml::Table>(&format!("v = {value}"))
        .ok()
        .and_then(|mut table| table.remove("v"))
        .unwrap_or_else(|| TomlValue::String(value.to_string()));
    Ok((key.to_string(), parsed))
}
