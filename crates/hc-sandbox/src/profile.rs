//! Seccomp profile lookup.

use crate::error::{Result, SandboxError};
use std::path::{Path, PathBuf};

/// Directory holding the profiles shipped with this crate's sources.
pub const SOURCE_PROFILE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/profiles");

/// Every location checked for profile `name`, in lookup order.
///
/// An absolute `name` is used as-is. Otherwise the directory of the running
/// executable comes first, then the source tree, then `extra_dirs`.
pub fn profile_candidates(name: &str, extra_dirs: &[PathBuf]) -> Vec<PathBuf> {
    let name_path = Path::new(name);
    if name_path.is_absolute() {
        return vec![name_path.to_path_buf()];
    }

    let mut candidates = Vec::with_capacity(extra_dirs.len() + 2);
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(exe_dir.join(name));
    }
    candidates.push(Path::new(SOURCE_PROFILE_DIR).join(name));
    candidates.extend(extra_dirs.iter().map(|dir| dir.join(name)));
    candidates
}

/// Resolve profile `name` to the first existing file.
pub fn resolve_security_profile(name: &str, extra_dirs: &[PathBuf]) -> Result<PathBuf> {
    let candidates = profile_candidates(name, extra_dirs);
    match candidates.iter().find(|path| path.is_file()) {
        Some(path) => {
            tracing::debug!(profile = %path.display(), "Resolved security profile");
            Ok(path.clone())
        }
        None => Err(SandboxError::Configuration {
            name: name.to_string(),
            searched: candidates,
        }),
    }
}
