/// How the application unit is bound into the host, fixed at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Debug build, application linked statically, no watcher.
    Static,
    /// Application loaded from a dynamic library and reloaded when it changes.
    HotReload,
    /// Optimized build, application linked statically, no watcher.
    Release,
}

impl BuildMode {
    #[inline]
    pub const fn supports_reload(self) -> bool {
        matches!(self, BuildMode::HotReload)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            BuildMode::Static => "static",
            BuildMode::HotReload => "hot-reload",
            BuildMode::Release => "release",
        }
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "hot-reload")]
pub const BUILD_MODE: BuildMode = BuildMode::HotReload;

#[cfg(all(not(feature = "hot-reload"), debug_assertions))]
pub const BUILD_MODE: BuildMode = BuildMode::Static;

#[cfg(all(not(feature = "hot-reload"), not(debug_assertions)))]
pub const BUILD_MODE: BuildMode = BuildMode::Release;
