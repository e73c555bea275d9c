use libloading::Library;
use sage_app_api::AppExports;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// One loaded generation of a dynamic unit.
///
/// The entry points in [`Module::exports`] are only valid while the module is alive. Dropping
/// or closing it releases the OS handle and deletes the shadow copy.
pub struct Module {
    name: String,
    artifact: PathBuf,
    shadow: PathBuf,
    generation: u64,
    hash: u32,
    exports: AppExports,
    lib: Option<Library>,
    open_handles: Arc<AtomicUsize>,
}

impl Module {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        artifact: PathBuf,
        shadow: PathBuf,
        generation: u64,
        hash: u32,
        exports: AppExports,
        lib: Library,
        open_handles: Arc<AtomicUsize>,
    ) -> Self {
        open_handles.fetch_add(1, Ordering::AcqRel);
        Self {
            name,
            artifact,
            shadow,
            generation,
            hash,
            exports,
            lib: Some(lib),
            open_handles,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The watched build artifact this generation was copied from.
    #[inline]
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// The shadow copy actually opened.
    #[inline]
    pub fn shadow_path(&self) -> &Path {
        &self.shadow
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn hash(&self) -> u32 {
        self.hash
    }

    #[inline]
    pub fn exports(&self) -> &AppExports {
        &self.exports
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.lib.is_some()
    }

    /// Releases the OS handle now, reporting failures instead of logging them.
    pub fn close(mut self) -> Result<(), libloading::Error> {
        self.release()
    }

    fn release(&mut self) -> Result<(), libloading::Error> {
        let Some(lib) = self.lib.take() else {
            return Ok(());
        };
        self.open_handles.fetch_sub(1, Ordering::AcqRel);

        let closed = lib.close();

        if let Err(e) = fs::remove_file(&self.shadow) {
            log::debug!(
                target: "sage::loader",
                "loader: could not remove shadow '{}': {}",
                self.shadow.display(),
                e
            );
        }

        log::debug!(
            target: "sage::loader",
            "loader: unloaded '{}' generation {}",
            self.name,
            self.generation
        );
        closed
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            log::warn!(
                target: "sage::loader",
                "loader: failed to close '{}' generation {}: {}",
                self.name,
                self.generation,
                e
            );
        }
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("shadow", &self.shadow)
            .field("hash", &format_args!("{:08x}", self.hash))
            .field("live", &self.is_live())
            .finish()
    }
}
