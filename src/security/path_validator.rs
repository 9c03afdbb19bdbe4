//! Path validation for everything written into the workspace.
//!
//! Collected files mirror their absolute source path and command outputs use
//! names from the configuration, so both must be turned into relative paths
//! that cannot escape the workspace root.

use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Result};

/// Turn `path` into a relative path that stays below a workspace root.
///
/// Root and drive prefixes are stripped so `/etc/hosts` becomes `etc/hosts`,
/// `.` components are dropped.
///
/// # Errors
///
/// - the path contains a `..` component
/// - the path contains a NUL byte
/// - nothing is left after stripping
pub fn workspace_relative_path(path: &Path) -> Result<PathBuf> {
    if path.to_string_lossy().contains('\0') {
        bail!("Path contains null bytes");
    }

    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => relative.push(name),
            Component::RootDir | Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                bail!("Path traversal attempt detected: path contains '..'");
            }
        }
    }

    if relative.as_os_str().is_empty() {
        bail!("Path {} has no file name", path.display());
    }

    Ok(relative)
}

/// Destination of `source` inside `workspace`, mirroring its path.
pub fn mirror_path(workspace: &Path, source: &Path) -> Result<PathBuf> {
    Ok(workspace.join(workspace_relative_path(source)?))
}
