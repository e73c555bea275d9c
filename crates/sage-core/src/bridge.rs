use crate::capsule::Capsule;
use crate::error::BuildError;

use sage_app_api::{
    AppCapability, AppEntryFn, AppExports, EngineContext, HostApiV1, HostCapability,
    StateCapsule, Status, BRIDGE_SCHEMA_VERSION,
};
use std::collections::BTreeMap;

/// Bidirectional capability table for one generation of the application.
///
/// Built once per generation and never mutated afterwards; a reload builds a new table.
pub struct BridgeTable {
    generation: u64,
    schema_version: u32,
    state_size: u64,
    state_align: u64,
    host: HostApiV1,
    app: BTreeMap<AppCapability, AppEntryFn>,
}

impl BridgeTable {
    /// Reads the application's manifest and pairs it with the host table.
    ///
    /// With `capsule` given (every generation after the first), the declared state must fit
    /// the existing allocation.
    pub fn build(
        exports: &AppExports,
        generation: u64,
        host: HostApiV1,
        capsule: Option<&Capsule>,
    ) -> Result<Self, BuildError> {
        let manifest = (exports.manifest)();

        if manifest.schema_version != BRIDGE_SCHEMA_VERSION {
            return Err(BuildError::VersionMismatch {
                expected: BRIDGE_SCHEMA_VERSION,
                found: manifest.schema_version,
            });
        }

        let size = manifest.state_size;
        let align = manifest.state_align;
        if align == 0 || !align.is_power_of_two() {
            return Err(BuildError::InvalidStateLayout { size, align });
        }

        if let Some(c) = capsule {
            if size > c.capacity() as u64 {
                return Err(BuildError::StateTooLarge {
                    required: size,
                    capacity: c.capacity(),
                });
            }
            if align > c.align() as u64 {
                return Err(BuildError::InvalidStateLayout { size, align });
            }
        }

        let mut app = BTreeMap::new();
        app.insert(AppCapability::Init, exports.init);
        app.insert(AppCapability::Update, exports.update);
        app.insert(AppCapability::Shutdown, exports.shutdown);

        for hook in manifest.hooks.iter() {
            match AppCapability::from_key(hook.key) {
                Some(cap) if cap.is_hook() => {
                    app.insert(cap, hook.entry);
                }
                Some(cap) => {
                    log::debug!(
                        target: "sage::bridge",
                        "bridge: manifest redeclares '{}', keeping the exported symbol",
                        cap.as_str()
                    );
                }
                None => {
                    log::debug!(
                        target: "sage::bridge",
                        "bridge: ignoring unknown hook key {}",
                        hook.key
                    );
                }
            }
        }

        log::debug!(
            target: "sage::bridge",
            "bridge: built generation {} (state {}B align {}, {} app capabilities)",
            generation,
            size,
            align,
            app.len()
        );

        Ok(Self {
            generation,
            schema_version: manifest.schema_version,
            state_size: size,
            state_align: align,
            host,
            app,
        })
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    #[inline]
    pub fn state_size(&self) -> u64 {
        self.state_size
    }

    #[inline]
    pub fn state_align(&self) -> u64 {
        self.state_align
    }

    #[inline]
    pub fn host(&self) -> &HostApiV1 {
        &self.host
    }

    #[inline]
    pub fn host_capabilities(&self) -> &'static [HostCapability] {
        &HostCapability::ALL
    }

    #[inline]
    pub fn has(&self, cap: AppCapability) -> bool {
        self.app.contains_key(&cap)
    }

    #[inline]
    pub fn entry(&self, cap: AppCapability) -> Option<AppEntryFn> {
        self.app.get(&cap).copied()
    }

    pub fn app_capabilities(&self) -> impl Iterator<Item = AppCapability> + '_ {
        self.app.keys().copied()
    }

    /// Calls an application capability. `None` when the application does not provide it.
    ///
    /// # Safety
    /// `ctx` and `capsule` must be valid, and the library backing this generation must still be
    /// loaded.
    pub(crate) unsafe fn invoke(
        &self,
        cap: AppCapability,
        ctx: *mut EngineContext,
        capsule: *mut StateCapsule,
    ) -> Option<Status> {
        let f = self.entry(cap)?;
        Some(unsafe { f(ctx, capsule) })
    }
}

impl std::fmt::Debug for BridgeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeTable")
            .field("generation", &self.generation)
            .field("schema_version", &self.schema_version)
            .field("state_size", &self.state_size)
            .field("state_align", &self.state_align)
            .field("app", &self.app.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::host_api_v1;
    use abi_stable::std_types::RSlice;
    use sage_app_api::{AppHookEntry, AppManifestV1, ABI_VERSION};

    unsafe extern "C" fn noop(_ctx: *mut EngineContext, _capsule: *mut StateCapsule) -> Status {
        Status::OK
    }

    unsafe extern "C" fn hook(_ctx: *mut EngineContext, _capsule: *mut StateCapsule) -> Status {
        Status::error(5)
    }

    extern "C" fn abi() -> u32 {
        ABI_VERSION
    }

    static HOOKS: &[AppHookEntry] = &[
        AppHookEntry {
            key: 17,
            entry: hook,
        },
        AppHookEntry {
            key: 99,
            entry: hook,
        },
        AppHookEntry {
            key: 2,
            entry: hook,
        },
    ];

    extern "C" fn manifest_ok() -> AppManifestV1 {
        AppManifestV1::new::<[u64; 4]>(HOOKS)
    }

    extern "C" fn manifest_v2() -> AppManifestV1 {
        AppManifestV1 {
            schema_version: 2,
            ..AppManifestV1::new::<u64>(&[])
        }
    }

    extern "C" fn manifest_huge() -> AppManifestV1 {
        AppManifestV1::new::<[u8; 4096]>(&[])
    }

    extern "C" fn manifest_bad_align() -> AppManifestV1 {
        AppManifestV1 {
            schema_version: BRIDGE_SCHEMA_VERSION,
            state_size: 8,
            state_align: 3,
            hooks: RSlice::from_slice(&[]),
        }
    }

    fn exports(manifest: extern "C" fn() -> AppManifestV1) -> AppExports {
        AppExports {
            abi_version: abi,
            manifest,
            init: noop,
            update: noop,
            shutdown: noop,
        }
    }

    #[test]
    fn builds_required_and_declared_hooks() {
        let table = BridgeTable::build(&exports(manifest_ok), 3, host_api_v1(), None).unwrap();
        assert_eq!(table.generation(), 3);
        assert_eq!(table.state_size(), 32);
        assert!(table.has(AppCapability::Init));
        assert!(table.has(AppCapability::AfterReload));
        assert!(!table.has(AppCapability::BeforeUnload));
        assert_eq!(table.app_capabilities().count(), 4);
        assert_eq!(table.host_capabilities().len(), 3);

        // Key 2 in the manifest must not replace the exported update symbol.
        let status = unsafe {
            table.invoke(AppCapability::Update, std::ptr::null_mut(), std::ptr::null_mut())
        };
        assert_eq!(status, Some(Status::OK));
        let status = unsafe {
            table.invoke(AppCapability::BeforeUnload, std::ptr::null_mut(), std::ptr::null_mut())
        };
        assert_eq!(status, None);
    }

    #[test]
    fn schema_mismatch_fails() {
        let err = BridgeTable::build(&exports(manifest_v2), 0, host_api_v1(), None).unwrap_err();
        assert_eq!(
            err,
            BuildError::VersionMismatch {
                expected: 1,
                found: 2,
            }
        );
    }

    #[test]
    fn state_must_fit_existing_capsule() {
        let capsule = Capsule::allocate(16, 8, 1024).unwrap();
        let err = BridgeTable::build(&exports(manifest_huge), 1, host_api_v1(), Some(&capsule))
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::StateTooLarge {
                required: 4096,
                capacity: 1024,
            }
        );

        let ok = BridgeTable::build(&exports(manifest_ok), 1, host_api_v1(), Some(&capsule));
        assert!(ok.is_ok());
    }

    #[test]
    fn alignment_must_be_power_of_two() {
        let err =
            BridgeTable::build(&exports(manifest_bad_align), 0, host_api_v1(), None).unwrap_err();
        assert_eq!(
            err,
            BuildError::InvalidStateLayout {
                size: 8,
                align: 3,
            }
        );
    }
}
