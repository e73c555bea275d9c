use env_logger::{Builder, WriteStyle};
use log::LevelFilter;
use sage_core::{Subsystem, SubsystemError};
use serde::Deserialize;
use serde_json::Value;

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

static INSTALLED: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLoggerConfig {
    pub level: LevelFilter,
    pub colors: bool,
    pub include_module: bool,
}

impl ConsoleLoggerConfig {
    /// Reads `SAGE_LOG`, `SAGE_LOG_COLORS` and `SAGE_LOG_MODULE`.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let level = env("SAGE_LOG")
            .and_then(|v| v.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::Info);
        let colors = env("SAGE_LOG_COLORS").map(|v| v != "0").unwrap_or(true);
        let include_module = env("SAGE_LOG_MODULE").map(|v| v != "0").unwrap_or(true);

        Self {
            level,
            colors,
            include_module,
        }
    }

    /// Applies `{ "level": "debug", "colors": false, "include_module": true }`; missing keys
    /// keep their current value.
    pub fn apply_params(&mut self, params: &Value) -> Result<(), String> {
        if params.is_null() {
            return Ok(());
        }

        #[derive(Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Params {
            level: Option<String>,
            colors: Option<bool>,
            include_module: Option<bool>,
        }

        let p: Params = serde_json::from_value(params.clone()).map_err(|e| e.to_string())?;
        if let Some(level) = p.level {
            self.level = level
                .parse::<LevelFilter>()
                .map_err(|_| format!("unknown log level '{level}'"))?;
        }
        if let Some(colors) = p.colors {
            self.colors = colors;
        }
        if let Some(m) = p.include_module {
            self.include_module = m;
        }
        Ok(())
    }
}

impl Default for ConsoleLoggerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Installs the console logger once per process. Later calls only adjust the level.
///
/// Returns `false` when another logger already owns the `log` facade.
pub fn install(config: &ConsoleLoggerConfig) -> bool {
    if INSTALLED.load(Ordering::Acquire) {
        log::set_max_level(config.level);
        return true;
    }

    let mut builder = Builder::new();
    // The builder filters nothing; `log::set_max_level` is the effective filter so it can be
    // changed after install.
    builder.filter_level(LevelFilter::Trace);
    builder.write_style(if config.colors {
        WriteStyle::Auto
    } else {
        WriteStyle::Never
    });

    let include_module = config.include_module;
    builder.format(move |buf, record| {
        let style = buf.default_level_style(record.level());
        if include_module {
            writeln!(
                buf,
                "[{style}{:<5}{style:#}] {:<25} {}",
                record.level(),
                record.target(),
                record.args()
            )
        } else {
            writeln!(buf, "[{style}{:<5}{style:#}] {}", record.level(), record.args())
        }
    });

    match builder.try_init() {
        Ok(()) => {
            INSTALLED.store(true, Ordering::Release);
            log::set_max_level(config.level);
            true
        }
        Err(_) => false,
    }
}

/// The console logger as a configurable engine subsystem named `logging`.
pub struct ConsoleLoggerSubsystem {
    config: ConsoleLoggerConfig,
}

impl ConsoleLoggerSubsystem {
    pub const ID: &'static str = "logging";

    #[inline]
    pub fn new(config: ConsoleLoggerConfig) -> Self {
        Self { config }
    }

    #[inline]
    pub fn config(&self) -> &ConsoleLoggerConfig {
        &self.config
    }
}

impl Subsystem for ConsoleLoggerSubsystem {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn configure(&mut self, params: &Value) -> Result<(), SubsystemError> {
        self.config.apply_params(params).map_err(SubsystemError::new)?;
        if !install(&self.config) {
            log::debug!(target: "sage::boot", "logging: another logger is installed, leaving it");
        }
        Ok(())
    }
}
