use crate::error::ConfigError;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "sage.json";

/// Name of the platform window entry in the subsystem mapping.
pub const WINDOW_SUBSYSTEM: &str = "window";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub subsystems: BTreeMap<String, SubsystemConfig>,
    #[serde(default)]
    pub hot_reload: HotReloadConfig,
    #[serde(default)]
    pub capsule: CapsuleConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Crate name of the application unit, without platform prefix/suffix.
    #[serde(default = "default_app_name")]
    pub name: String,
    /// Directory holding the built artifact. Relative paths are also searched for in parent
    /// directories.
    #[serde(default = "default_lib_dir")]
    pub lib_dir: PathBuf,
}

fn default_app_name() -> String {
    "sage_demo_app".to_string()
}

fn default_lib_dir() -> PathBuf {
    PathBuf::from("target/debug")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            lib_dir: default_lib_dir(),
        }
    }
}

/// One entry of the subsystem mapping.
///
/// Accepts either a bare flag (`"window": true`) or `{ "enabled": .., "params": .. }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "SubsystemJson")]
pub struct SubsystemConfig {
    pub enabled: bool,
    pub params: Value,
}

impl SubsystemConfig {
    #[inline]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            params: Value::Null,
        }
    }

    #[inline]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            params: Value::Null,
        }
    }

    #[inline]
    pub fn with_params(params: Value) -> Self {
        Self {
            enabled: true,
            params,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SubsystemJson {
    Flag(bool),
    Full {
        #[serde(default = "default_enabled")]
        enabled: bool,
        #[serde(default)]
        params: Value,
    },
}

fn default_enabled() -> bool {
    true
}

impl From<SubsystemJson> for SubsystemConfig {
    fn from(value: SubsystemJson) -> Self {
        match value {
            SubsystemJson::Flag(enabled) => Self {
                enabled,
                params: Value::Null,
            },
            SubsystemJson::Full { enabled, params } => Self { enabled, params },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HotReloadConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Where shadow copies are written. Defaults to the artifact's directory.
    #[serde(default)]
    pub shadow_dir: Option<PathBuf>,
    /// Shadow file name template; `{lib_name}`, `{generation}` and `{pid}` are substituted.
    #[serde(default)]
    pub name_template: Option<String>,
}

fn default_poll_interval_ms() -> u64 {
    250
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            shadow_dir: None,
            name_template: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleConfig {
    /// Lower bound for the capsule size. The capsule is never reallocated, so this is the
    /// headroom later generations get to grow their state into.
    #[serde(default = "default_min_capacity")]
    pub min_capacity: usize,
}

fn default_min_capacity() -> usize {
    64 * 1024
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self {
            min_capacity: default_min_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Target frame interval. 0 runs frames back to back.
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Stop after this many frames. Used by tests and smoke runs.
    #[serde(default)]
    pub max_frames: Option<u64>,
}

fn default_frame_interval_ms() -> u64 {
    16
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: default_frame_interval_ms(),
            max_frames: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
}

fn default_title() -> String {
    "Sage Engine".to_string()
}

fn default_width() -> u32 {
    500
}

fn default_height() -> u32 {
    300
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOverrideSource {
    File,
    Env,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigOverride {
    pub key: &'static str,
    pub source: ConfigOverrideSource,
    pub value: String,
}

/// What the loader actually used, for the boot log.
#[derive(Debug, Clone, Default)]
pub struct ConfigLoadReport {
    pub file: Option<PathBuf>,
    pub overrides: Vec<ConfigOverride>,
}

impl EngineConfig {
    /// Loads config with layering: defaults -> file -> env.
    pub fn load(path: &Path) -> Result<(Self, ConfigLoadReport), ConfigError> {
        Self::load_with_env(path, |k| std::env::var(k).ok())
    }

    pub fn load_with_env<F>(path: &Path, env: F) -> Result<(Self, ConfigLoadReport), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut report = ConfigLoadReport::default();

        let mut cfg = if path.is_file() {
            let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let cfg = Self::from_json_str(&data).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            report.file = Some(path.to_path_buf());
            cfg
        } else {
            // Missing file is not an error.
            Self::default()
        };

        cfg.apply_env(&mut report, env);
        Ok((cfg, report))
    }

    #[inline]
    pub fn from_json_str(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }

    fn apply_env<F>(&mut self, report: &mut ConfigLoadReport, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut record = |key: &'static str, value: &str| {
            report.overrides.push(ConfigOverride {
                key,
                source: ConfigOverrideSource::Env,
                value: value.to_string(),
            });
        };

        if let Some(v) = env("SAGE_APP_NAME") {
            self.app.name = v.clone();
            record("app.name", &v);
        }
        if let Some(v) = env("SAGE_APP_DIR") {
            self.app.lib_dir = PathBuf::from(&v);
            record("app.lib_dir", &v);
        }
        if let Some(v) = env("SAGE_HOT_RELOAD_POLL_MS") {
            match v.trim().parse::<u64>() {
                Ok(ms) => {
                    self.hot_reload.poll_interval_ms = ms;
                    record("hot_reload.poll_interval_ms", &v);
                }
                Err(_) => {
                    log::warn!(
                        target: "sage::boot",
                        "config: ignoring SAGE_HOT_RELOAD_POLL_MS='{v}'"
                    )
                }
            }
        }
        if let Some(v) = env("SAGE_FRAME_INTERVAL_MS") {
            match v.trim().parse::<u64>() {
                Ok(ms) => {
                    self.runtime.frame_interval_ms = ms;
                    record("runtime.frame_interval_ms", &v);
                }
                Err(_) => {
                    log::warn!(
                        target: "sage::boot",
                        "config: ignoring SAGE_FRAME_INTERVAL_MS='{v}'"
                    )
                }
            }
        }
        if let Some(v) = env("SAGE_MAX_FRAMES") {
            match v.trim().parse::<u64>() {
                Ok(n) => {
                    self.runtime.max_frames = Some(n);
                    record("runtime.max_frames", &v);
                }
                Err(_) => {
                    log::warn!(target: "sage::boot", "config: ignoring SAGE_MAX_FRAMES='{v}'")
                }
            }
        }
    }

    #[inline]
    pub fn subsystem(&self, name: &str) -> Option<&SubsystemConfig> {
        self.subsystems.get(name)
    }

    /// Registered subsystems run unless the mapping disables them; the window is opt-in.
    pub fn is_enabled(&self, name: &str) -> bool {
        match self.subsystems.get(name) {
            Some(s) => s.enabled,
            None => name != WINDOW_SUBSYSTEM,
        }
    }

    /// Fails on the first mapping entry (in name order) that is neither `window` nor one of
    /// `known`.
    pub fn validate_subsystems(&self, known: &[&str]) -> Result<(), ConfigError> {
        for name in self.subsystems.keys() {
            if name == WINDOW_SUBSYSTEM || known.contains(&name.as_str()) {
                continue;
            }
            return Err(ConfigError::UnknownSubsystem(name.clone()));
        }
        Ok(())
    }

    /// `None` when no window was requested.
    pub fn window_config(&self) -> Result<Option<WindowConfig>, ConfigError> {
        let Some(entry) = self.subsystems.get(WINDOW_SUBSYSTEM) else {
            return Ok(None);
        };
        if !entry.enabled {
            return Ok(None);
        }
        if entry.params.is_null() {
            return Ok(Some(WindowConfig::default()));
        }
        serde_json::from_value(entry.params.clone())
            .map(Some)
            .map_err(|e| ConfigError::InvalidParams {
                subsystem: WINDOW_SUBSYSTEM.to_string(),
                message: e.to_string(),
            })
    }

    #[inline]
    pub fn with_subsystem(mut self, name: impl Into<String>, cfg: SubsystemConfig) -> Self {
        self.subsystems.insert(name.into(), cfg);
        self
    }
}
