use super::module::Module;
use super::paths::{artifact_file_name, find_in_parent_dirs, hash_file, shadow_file_name};
use super::watch::ChangeStream;
use crate::config::EngineConfig;
use crate::error::LoadError;

use libloading::Library;
use sage_app_api::{
    AppEntryFn, AppExports, AppManifestV1, ABI_VERSION, SYMBOL_ABI_VERSION, SYMBOL_APP_INIT,
    SYMBOL_APP_MANIFEST, SYMBOL_APP_SHUTDOWN, SYMBOL_APP_UPDATE,
};
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Directory holding the built artifact.
    pub lib_dir: PathBuf,
    /// Crate name of the unit, without platform prefix/suffix.
    pub lib_name: String,
    /// Where shadow copies go. Defaults to the artifact's directory.
    pub shadow_dir: Option<PathBuf>,
    pub name_template: Option<String>,
    pub poll_interval: Duration,
}

impl LoaderConfig {
    pub fn new(lib_dir: impl Into<PathBuf>, lib_name: impl Into<String>) -> Self {
        Self {
            lib_dir: lib_dir.into(),
            lib_name: lib_name.into(),
            shadow_dir: None,
            name_template: None,
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn from_engine_config(cfg: &EngineConfig) -> Self {
        Self {
            lib_dir: cfg.app.lib_dir.clone(),
            lib_name: cfg.app.name.clone(),
            shadow_dir: cfg.hot_reload.shadow_dir.clone(),
            name_template: cfg.hot_reload.name_template.clone(),
            poll_interval: Duration::from_millis(cfg.hot_reload.poll_interval_ms.max(1)),
        }
    }

    #[inline]
    pub fn with_shadow_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shadow_dir = Some(dir.into());
        self
    }

    #[inline]
    pub fn with_name_template(mut self, template: impl Into<String>) -> Self {
        self.name_template = Some(template.into());
        self
    }

    #[inline]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Opens dynamic units from shadow copies and tracks how many OS handles are open.
#[derive(Debug)]
pub struct ModuleLoader {
    config: LoaderConfig,
    lib_dir: PathBuf,
    open_handles: Arc<AtomicUsize>,
    /// Every attempt gets its own shadow path, failed ones included.
    loads: AtomicU64,
}

impl ModuleLoader {
    /// Resolves `lib_dir`, searching parent directories for relative paths.
    pub fn new(config: LoaderConfig) -> Result<Self, LoadError> {
        let lib_dir = find_in_parent_dirs(&config.lib_dir)
            .ok_or_else(|| LoadError::NotFound(config.lib_dir.clone()))?;
        log::debug!(target: "sage::loader", "loader: lib dir '{}'", lib_dir.display());

        Ok(Self {
            config,
            lib_dir,
            open_handles: Arc::new(AtomicUsize::new(0)),
            loads: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    #[inline]
    pub fn lib_dir(&self) -> &Path {
        &self.lib_dir
    }

    /// Path of the watched build artifact for the configured unit.
    #[inline]
    pub fn artifact_path(&self) -> PathBuf {
        self.lib_dir.join(artifact_file_name(&self.config.lib_name))
    }

    /// Number of modules opened by this loader and not yet released.
    #[inline]
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::Acquire)
    }

    /// Shadow copies created so far, successful or not.
    #[inline]
    pub fn loads_attempted(&self) -> u64 {
        self.loads.load(Ordering::Acquire)
    }

    /// First load of the unit at `path` (generation 0).
    pub fn load(&self, path: &Path) -> Result<Module, LoadError> {
        self.load_generation(path, 0)
    }

    /// Loads the current artifact as generation `current + 1`. `current` stays untouched;
    /// releasing it is the caller's job once the new generation is in place.
    pub fn reload(&self, current: &Module) -> Result<Module, LoadError> {
        self.load_generation(current.artifact(), current.generation() + 1)
    }

    pub fn unload(&self, module: Module) {
        let name = module.name().to_string();
        let generation = module.generation();
        if let Err(e) = module.close() {
            log::warn!(
                target: "sage::loader",
                "loader: failed to close '{}' generation {}: {}",
                name,
                generation,
                e
            );
        }
    }

    /// Whether the artifact on disk differs from what `current` was loaded from.
    pub fn artifact_changed(&self, current: &Module) -> bool {
        hash_file(current.artifact()) != current.hash()
    }

    pub fn watch(&self, path: &Path) -> ChangeStream {
        ChangeStream::new(path, self.config.poll_interval)
    }

    fn load_generation(&self, path: &Path, generation: u64) -> Result<Module, LoadError> {
        if !path.is_file() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        log::info!(
            target: "sage::loader",
            "loader: loading '{}' (generation {})",
            path.display(),
            generation
        );

        let name = unit_name(path);
        let shadow_dir = match &self.config.shadow_dir {
            Some(d) => d.clone(),
            None => path.parent().map(Path::to_path_buf).unwrap_or_default(),
        };
        fs::create_dir_all(&shadow_dir).map_err(|source| LoadError::Io {
            path: shadow_dir.clone(),
            source,
        })?;

        // A retry must not reopen a path the OS may still have cached from a failed attempt.
        let load_index = self.loads.fetch_add(1, Ordering::AcqRel);
        let shadow = shadow_dir.join(shadow_file_name(
            &name,
            load_index,
            self.config.name_template.as_deref(),
        ));

        // Copy from one read so the hash matches the bytes that get opened.
        let bytes = fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let hash = crc32fast::hash(&bytes);
        fs::write(&shadow, &bytes).map_err(|source| LoadError::Io {
            path: shadow.clone(),
            source,
        })?;

        // SAFETY: running foreign initializers is inherent to loading a unit; the file is a
        // private copy nobody else writes to.
        let lib = match unsafe { Library::new(&shadow) } {
            Ok(l) => l,
            Err(e) => {
                let _ = fs::remove_file(&shadow);
                return Err(LoadError::Open {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
            }
        };

        let exports = match unsafe { resolve_exports(&lib) } {
            Ok(x) => x,
            Err(e) => {
                if let Err(close) = lib.close() {
                    log::warn!(
                        target: "sage::loader",
                        "loader: close after failed resolve: {}",
                        close
                    );
                }
                let _ = fs::remove_file(&shadow);
                return Err(e);
            }
        };

        log::info!(
            target: "sage::loader",
            "loader: loaded '{}' generation {} from '{}' (crc32 {:08x})",
            name,
            generation,
            shadow.display(),
            hash
        );

        Ok(Module::new(
            name,
            path.to_path_buf(),
            shadow,
            generation,
            hash,
            exports,
            lib,
            self.open_handles.clone(),
        ))
    }
}

/// Strips the platform prefix and suffix: `libgame.so` -> `game`.
fn unit_name(path: &Path) -> String {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = file.strip_suffix(DLL_SUFFIX).unwrap_or(&file);
    let file = file.strip_prefix(DLL_PREFIX).unwrap_or(file);
    file.to_string()
}

/// # Safety
/// The symbols must have the signatures declared by `sage_app_api`.
unsafe fn symbol<T: Copy>(lib: &Library, name: &str) -> Result<T, LoadError> {
    let sym = unsafe { lib.get::<T>(name.as_bytes()) }
        .map_err(|_| LoadError::MissingSymbol(name.to_string()))?;
    Ok(*sym)
}

/// The ABI tag is checked before anything else is resolved.
///
/// # Safety
/// See [`symbol`].
unsafe fn resolve_exports(lib: &Library) -> Result<AppExports, LoadError> {
    let abi_version: extern "C" fn() -> u32 = unsafe { symbol(lib, SYMBOL_ABI_VERSION)? };
    let found = abi_version();
    if found != ABI_VERSION {
        return Err(LoadError::IncompatibleVersion {
            expected: ABI_VERSION,
            found,
        });
    }

    let manifest: extern "C" fn() -> AppManifestV1 = unsafe { symbol(lib, SYMBOL_APP_MANIFEST)? };
    let init: AppEntryFn = unsafe { symbol(lib, SYMBOL_APP_INIT)? };
    let update: AppEntryFn = unsafe { symbol(lib, SYMBOL_APP_UPDATE)? };
    let shutdown: AppEntryFn = unsafe { symbol(lib, SYMBOL_APP_SHUTDOWN)? };

    Ok(AppExports {
        abi_version,
        manifest,
        init,
        update,
        shutdown,
    })
}
