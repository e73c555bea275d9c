use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;

use sage_core::config::{DEFAULT_CONFIG_FILE, WINDOW_SUBSYSTEM};
use sage_core::{AppSource, BootSequencer, EngineConfig, ShutdownToken, BUILD_MODE};
use sage_modules_logging::{ConsoleLoggerConfig, ConsoleLoggerSubsystem};
use sage_platform_winit::default_platform;

#[cfg(not(any(feature = "hot-reload", feature = "static-app")))]
compile_error!("sage-runner needs either the `hot-reload` or the `static-app` feature");

#[cfg(all(feature = "hot-reload", feature = "static-app"))]
compile_error!(
    "`hot-reload` and `static-app` are mutually exclusive; \
     build static hosts with `--no-default-features --features static-app`"
);

#[cfg(feature = "static-app")]
fn app_source(config: &EngineConfig) -> AppSource {
    AppSource::linked(config.app.name.clone(), sage_demo_app::sage_exports())
}

#[cfg(feature = "hot-reload")]
fn app_source(config: &EngineConfig) -> AppSource {
    AppSource::dynamic(sage_core::LoaderConfig::from_engine_config(config))
}

fn main() -> ExitCode {
    let logger = ConsoleLoggerConfig::from_env();
    sage_modules_logging::install(&logger);

    let config_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    let (config, report) = match EngineConfig::load(&config_path) {
        Ok(v) => v,
        Err(e) => {
            error!(target: "sage::boot", "runner: {e}");
            return ExitCode::FAILURE;
        }
    };

    match &report.file {
        Some(p) => info!(target: "sage::boot", "runner: config '{}'", p.display()),
        None => info!(
            target: "sage::boot",
            "runner: no config at '{}', using defaults",
            config_path.display()
        ),
    }
    for o in &report.overrides {
        info!(target: "sage::boot", "runner: override {} = '{}' ({:?})", o.key, o.value, o.source);
    }
    info!(target: "sage::boot", "runner: build mode {}", BUILD_MODE);

    let shutdown = ShutdownToken::new();
    {
        let token = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || token.request()) {
            warn!(target: "sage::boot", "runner: ctrl-c handler not installed: {e}");
        }
    }

    let window = config.is_enabled(WINDOW_SUBSYSTEM);
    let source = app_source(&config);
    let mut seq = BootSequencer::new(config, source)
        .with_subsystem(ConsoleLoggerSubsystem::new(logger))
        .with_shutdown_token(shutdown);
    if window {
        seq = seq.with_boxed_platform(default_platform());
    }

    if let Err(e) = seq.boot() {
        error!(target: "sage::boot", "runner: boot failed during {}: {e}", seq.phase());
        seq.shutdown();
        return ExitCode::FAILURE;
    }

    if let Err(e) = seq.run() {
        error!(target: "sage::boot", "runner: {e}");
        seq.shutdown();
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}
