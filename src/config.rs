//! Config Watcher.
//!
//! A `serde`-derived document loaded from YAML, with the normalization the
//! original Python `load_config` did by hand (`database.path` `~`/`$VAR`
//! expansion, resolution against the config file's directory), plus an
//! mtime-polling reload discipline that never drops a good config for a bad
//! one.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};
use crate::hopper::{HopConfig, HopMode};
use crate::model::Band;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: "piguard.db".to_string() }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HopConfigDoc {
    pub enabled: bool,
    pub mode: String,
    pub bands: Vec<String>,
    pub lock_channel: Option<i32>,
    pub list_channels: Option<Vec<i32>>,
    pub channels_24: Option<Vec<i32>>,
    pub channels_5: Option<Vec<i32>>,
    pub channels_6: Option<Vec<i32>>,
    pub dwell_ms: u64,
}

impl Default for HopConfigDoc {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: "all".to_string(),
            bands: vec!["2.4".to_string(), "5".to_string()],
            lock_channel: None,
            list_channels: None,
            channels_24: None,
            channels_5: None,
            channels_6: None,
            dwell_ms: 100,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub iface: String,
    pub hop: HopConfigDoc,
    pub log_stats: bool,
    pub stats_period_sec: u64,
    pub debug_print: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            iface: String::new(),
            hop: HopConfigDoc::default(),
            log_stats: false,
            stats_period_sec: 10,
            debug_print: false,
        }
    }
}

impl CaptureConfig {
    /// Translates the YAML-shaped hop document into the hopper's own
    /// config type, defaulting an unrecognized `mode` string to `all`.
    pub fn hop_config(&self) -> HopConfig {
        let mode = match self.hop.mode.as_str() {
            "lock" => HopMode::Lock(self.hop.lock_channel.unwrap_or(1)),
            "list" => HopMode::List(self.hop.list_channels.clone().unwrap_or_default()),
            _ => HopMode::All,
        };
        let bands = if self.hop.bands.is_empty() {
            vec![Band::TwoPointFour, Band::Five]
        } else {
            self.hop.bands.iter().filter_map(|s| s.parse().ok()).collect()
        };
        HopConfig {
            enabled: self.hop.enabled,
            mode,
            bands,
            channels_24: self.hop.channels_24.clone(),
            channels_5: self.hop.channels_5.clone(),
            channels_6: self.hop.channels_6.clone(),
            dwell_ms: self.hop.dwell_ms,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefenseConfig {
    pub ssid: Option<String>,
    pub allowed_bssids: Vec<String>,
    pub allowed_channels: Vec<i32>,
    pub allowed_bands: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeauthThresholds {
    pub window_sec: i64,
    pub per_src_limit: i64,
    pub global_limit: i64,
    pub cooldown_sec: i64,
}

impl Default for DeauthThresholds {
    fn default() -> Self {
        Self { window_sec: 10, per_src_limit: 30, global_limit: 80, cooldown_sec: 60 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RogueThresholds {
    pub pwr_window: usize,
    pub pwr_var_threshold: f64,
    pub pwr_cooldown_sec: i64,
}

impl Default for RogueThresholds {
    fn default() -> Self {
        Self { pwr_window: 20, pwr_var_threshold: 150.0, pwr_cooldown_sec: 60 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    pub deauth: DeauthThresholds,
    pub rogue: RogueThresholds,
}

/// Top-level configuration document.
/// Unknown keys are ignored by `serde_yaml`'s default behavior (no `deny_unknown_fields`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub capture: CaptureConfig,
    pub defense: DefenseConfig,
    pub thresholds: ThresholdsConfig,
}

impl Config {
    /// Reads and parses `path`, normalizing `database.path` the way the
    /// original `wids/common.py::load_config` did: `~`/`$VAR` expansion,
    /// then resolution against `path`'s own directory if still relative.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::with_message(ErrorKind::ConfigRead(path.display().to_string()), e.to_string()))?;
        let mut cfg: Config = serde_yaml::from_str(&text)
            .map_err(|e| Error::with_message(ErrorKind::ConfigInvalid(path.display().to_string()), e.to_string()))?;

        if cfg.capture.iface.trim().is_empty() {
            return Err(Error::with_message(
                ErrorKind::ConfigInvalid(path.display().to_string()),
                "capture.iface is required".to_string(),
            ));
        }

        let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
        cfg.database.path = normalize_db_path(&cfg.database.path, config_dir);
        Ok(cfg)
    }
}

impl DefenseConfig {
    /// Parses the allowed bands from their string tags to `Band`, ignoring
    /// unrecognized entries.
    pub fn allowed_bands(&self) -> Vec<Band> {
        self.allowed_bands.iter().filter_map(|s| s.parse().ok()).collect()
    }
}

fn normalize_db_path(raw: &str, config_dir: &Path) -> String {
    let expanded = expand_tilde_and_vars(raw);
    let expanded_path = PathBuf::from(&expanded);
    if expanded_path.is_absolute() {
        expanded
    } else {
        config_dir.join(expanded_path).to_string_lossy().into_owned()
    }
}

fn expand_tilde_and_vars(raw: &str) -> String {
    let with_home = if let Some(rest) = raw.strip_prefix("~/") {
        match std::env::var("HOME") {
            Ok(home) => format!("{home}/{rest}"),
            Err(_) => raw.to_string(),
        }
    } else {
        raw.to_string()
    };

    let mut out = String::with_capacity(with_home.len());
    let mut chars = with_home.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '$' {
            let mut name = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    name.push(next);
                    chars.next();
                } else {
                    break;
                }
            }
            if name.is_empty() {
                out.push('$');
            } else {
                out.push_str(&std::env::var(&name).unwrap_or_default());
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Polls a config file for mtime changes and re-applies it atomically.
///
/// Both the capture and detection workers own one of these and call
/// `poll()` independently, each at its own cadence;
/// there is no shared mutable state between the two copies, by design —
/// each reload produces its own owned `Config`.
pub struct ConfigWatcher {
    path: PathBuf,
    last_mtime: Option<SystemTime>,
    current: Config,
}

impl ConfigWatcher {
    /// Loads `path` for the first time. A startup failure is fatal: invalid
    /// configuration must not start the sensor.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let current = Config::load_from_file(&path)?;
        let last_mtime = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        Ok(Self { path, last_mtime, current })
    }

    pub fn current(&self) -> &Config {
        &self.current
    }

    /// Stats the config file; if its mtime advanced, reloads and returns
    /// `Some(&Config)`. On a reload parse failure, logs at error and keeps
    /// serving the previous config (`Ok(None)`).
    pub fn poll(&mut self) -> Result<Option<&Config>> {
        let metadata = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("config: failed to stat {}: {}", self.path.display(), e);
                return Ok(None);
            }
        };
        let mtime = metadata.modified().ok();
        if mtime.is_none() || mtime == self.last_mtime {
            return Ok(None);
        }

        match Config::load_from_file(&self.path) {
            Ok(cfg) => {
                self.current = cfg;
                self.last_mtime = mtime;
                log::info!("config: reloaded {}", self.path.display());
                Ok(Some(&self.current))
            }
            Err(e) => {
                log::error!("config: reload of {} failed, keeping previous config: {}", self.path.display(), e);
                self.last_mtime = mtime;
                Ok(None)
            }
        }
    }
}
