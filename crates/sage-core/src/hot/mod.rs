//! Dynamic loading of the application unit. Compiled only with the `hot-reload` feature.

mod loader;
mod module;
mod paths;
mod watch;

pub use loader::{LoaderConfig, ModuleLoader};
pub use module::Module;
pub use paths::{artifact_file_name, find_in_parent_dirs, hash_file, shadow_file_name};
pub use watch::{ChangeSignal, ChangeStream, ReloadTrigger};
