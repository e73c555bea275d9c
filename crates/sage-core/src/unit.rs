use crate::error::LoadError;
#[cfg(feature = "hot-reload")]
use crate::hot::{LoaderConfig, Module};

use sage_app_api::{AppExports, ABI_VERSION};

/// Where the boot sequencer gets the application from.
#[derive(Debug, Clone)]
pub enum AppSource {
    /// Entry points linked into the host binary.
    Static {
        name: String,
        exports: AppExports,
    },
    /// A dynamic library found through the loader config and watched for changes.
    #[cfg(feature = "hot-reload")]
    Dynamic(LoaderConfig),
}

impl AppSource {
    #[inline]
    pub fn linked(name: impl Into<String>, exports: AppExports) -> Self {
        Self::Static {
            name: name.into(),
            exports,
        }
    }

    #[cfg(feature = "hot-reload")]
    #[inline]
    pub fn dynamic(config: LoaderConfig) -> Self {
        Self::Dynamic(config)
    }

    pub fn name(&self) -> &str {
        match self {
            AppSource::Static { name, .. } => name,
            #[cfg(feature = "hot-reload")]
            AppSource::Dynamic(cfg) => &cfg.lib_name,
        }
    }
}

pub(crate) struct StaticApp {
    name: String,
    exports: AppExports,
}

impl StaticApp {
    /// Same ABI check the loader performs on a dynamic unit.
    pub(crate) fn link(name: String, exports: AppExports) -> Result<Self, LoadError> {
        let found = (exports.abi_version)();
        if found != ABI_VERSION {
            return Err(LoadError::IncompatibleVersion {
                expected: ABI_VERSION,
                found,
            });
        }
        log::info!(target: "sage::loader", "loader: linked '{}' statically", name);
        Ok(Self { name, exports })
    }
}

/// The live application unit.
pub(crate) enum AppUnit {
    Static(StaticApp),
    #[cfg(feature = "hot-reload")]
    Dynamic(Module),
}

impl AppUnit {
    pub(crate) fn exports(&self) -> &AppExports {
        match self {
            AppUnit::Static(s) => &s.exports,
            #[cfg(feature = "hot-reload")]
            AppUnit::Dynamic(m) => m.exports(),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        match self {
            AppUnit::Static(_) => 0,
            #[cfg(feature = "hot-reload")]
            AppUnit::Dynamic(m) => m.generation(),
        }
    }

    pub(crate) fn name(&self) -> &str {
        match self {
            AppUnit::Static(s) => &s.name,
            #[cfg(feature = "hot-reload")]
            AppUnit::Dynamic(m) => m.name(),
        }
    }
}
