/// Exports an application unit.
///
/// Generates the C symbols the engine resolves (`sage_abi_version`, `sage_app_manifest`,
/// `app_init`, `app_update`, `app_shutdown`) plus a `sage_exports()` function returning the
/// same entry points for hosts that link the unit statically.
///
/// ```ignore
/// sage_app_api::export_app! {
///     state: GameState,
///     init: init,
///     update: update,
///     shutdown: shutdown,
///     hooks: { AfterReload => after_reload },
/// }
/// ```
///
/// `state` must implement `bytemuck::Pod`; it lives in the engine's capsule and survives
/// reloads byte for byte.
#[macro_export]
macro_rules! export_app {
    (
        state: $state:ty,
        init: $init:path,
        update: $update:path,
        shutdown: $shutdown:path
        $(, hooks: { $($hook:ident => $hook_fn:path),* $(,)? })?
        $(,)?
    ) => {
        #[no_mangle]
        pub extern "C" fn sage_abi_version() -> u32 {
            $crate::ABI_VERSION
        }

        #[no_mangle]
        pub extern "C" fn sage_app_manifest() -> $crate::AppManifestV1 {
            static HOOKS: &[$crate::AppHookEntry] = &[
                $($(
                    $crate::AppHookEntry {
                        key: $crate::AppCapability::$hook.key(),
                        entry: {
                            unsafe extern "C" fn hook(
                                ctx: *mut $crate::EngineContext,
                                capsule: *mut $crate::StateCapsule,
                            ) -> $crate::Status {
                                unsafe { $crate::dispatch::<$state>(ctx, capsule, $hook_fn) }
                            }
                            hook
                        },
                    },
                )*)?
            ];
            $crate::AppManifestV1::new::<$state>(HOOKS)
        }

        /// # Safety
        /// Called by the engine with its own context and capsule.
        #[no_mangle]
        pub unsafe extern "C" fn app_init(
            ctx: *mut $crate::EngineContext,
            capsule: *mut $crate::StateCapsule,
        ) -> $crate::Status {
            unsafe { $crate::dispatch::<$state>(ctx, capsule, $init) }
        }

        /// # Safety
        /// Called by the engine with its own context and capsule.
        #[no_mangle]
        pub unsafe extern "C" fn app_update(
            ctx: *mut $crate::EngineContext,
            capsule: *mut $crate::StateCapsule,
        ) -> $crate::Status {
            unsafe { $crate::dispatch::<$state>(ctx, capsule, $update) }
        }

        /// # Safety
        /// Called by the engine with its own context and capsule.
        #[no_mangle]
        pub unsafe extern "C" fn app_shutdown(
            ctx: *mut $crate::EngineContext,
            capsule: *mut $crate::StateCapsule,
        ) -> $crate::Status {
            unsafe { $crate::dispatch::<$state>(ctx, capsule, $shutdown) }
        }

        pub fn sage_exports() -> $crate::AppExports {
            $crate::AppExports {
                abi_version: sage_abi_version,
                manifest: sage_app_manifest,
                init: app_init,
                update: app_update,
                shutdown: app_shutdown,
            }
        }
    };
}
