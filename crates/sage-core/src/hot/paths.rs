use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::path::{Path, PathBuf};

/// Platform file name of the built unit, e.g. `libsage_demo_app.so`.
#[inline]
pub fn artifact_file_name(lib_name: &str) -> String {
    format!("{DLL_PREFIX}{lib_name}{DLL_SUFFIX}")
}

/// File name of the shadow copy opened by the `load_index`-th load attempt.
///
/// Without a template this is `{prefix}{lib_name}-hot-{load_index}{suffix}`. A template may use
/// `{lib_name}` (prefixed), `{generation}` (the load index) and `{pid}`; the platform suffix is
/// appended, and so is `-{load_index}` when the template leaves `{generation}` out, so attempts
/// never share a path.
pub fn shadow_file_name(lib_name: &str, load_index: u64, template: Option<&str>) -> String {
    let prefixed = format!("{DLL_PREFIX}{lib_name}");
    let stem = match template {
        Some(t) => {
            let mut s = t
                .replace("{lib_name}", &prefixed)
                .replace("{generation}", &load_index.to_string())
                .replace("{pid}", &std::process::id().to_string());
            if !t.contains("{generation}") {
                s.push_str(&format!("-{load_index}"));
            }
            s
        }
        None => format!("{prefixed}-hot-{load_index}"),
    };
    format!("{stem}{DLL_SUFFIX}")
}

/// Resolves `dir`, searching the working directory and its ancestors for relative paths.
pub fn find_in_parent_dirs(dir: &Path) -> Option<PathBuf> {
    if dir.is_absolute() {
        return dir.exists().then(|| dir.to_path_buf());
    }

    let cwd = std::env::current_dir().ok()?;
    let mut cur = Some(cwd.as_path());
    while let Some(base) = cur {
        let candidate = base.join(dir);
        if candidate.exists() {
            return Some(candidate);
        }
        cur = base.parent();
    }
    None
}

/// CRC32 of the file contents; 0 when the file cannot be read.
pub fn hash_file(path: &Path) -> u32 {
    fs::read(path).map(|bytes| crc32fast::hash(&bytes)).unwrap_or(0)
}
