//! Working-root confinement for tool paths.
//!
//! Every path a tool receives from the model is resolved through [`WorkingRoot::resolve`].
//! The resolved path is canonical (symlinks and `..` followed), so the containment check
//! operates on what the filesystem would actually touch rather than on the raw string.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// A model-supplied path resolved to somewhere outside the working root.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("path \"{path}\" escapes the working root")]
pub struct SandboxViolation {
    /// The path exactly as the caller supplied it.
    pub path: String,
}

/// Absolute, canonical directory all tool operations are confined beneath.
#[derive(Debug, Clone)]
pub struct WorkingRoot {
    root: PathBuf,
}

impl WorkingRoot {
    /// Canonicalize `path` and use it as the working root.
    ///
    /// Fails if the directory does not exist or is not a directory.
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = std::fs::canonicalize(path.as_ref())?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("working root {} is not a directory", root.display()),
            ));
        }
        Ok(Self { root })
    }

    /// The canonical root path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` against the root and reject it if it escapes.
    ///
    /// Absolute inputs are not re-rooted: `/tmp/x` resolves to `/tmp/x` and is rejected
    /// unless the root itself lies above it. Components that do not exist yet are
    /// normalized lexically, so targets for `write_file` can be checked before they are
    /// created; every existing prefix is canonicalized along the way.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxViolation> {
        let violation = || SandboxViolation {
            path: relative.to_string(),
        };

        let joined = self.root.join(relative);
        let resolved = canonicalize_lenient(&joined);

        // Component-wise prefix: "/a" does not contain "/ab".
        if resolved.starts_with(&self.root) {
            Ok(resolved)
        } else {
            tracing::debug!(
                path = relative,
                resolved = %resolved.display(),
                "Rejected path outside working root"
            );
            Err(violation())
        }
    }
}

/// Walk `path` one component at a time, canonicalizing whenever the partial path exists.
///
/// Missing components are applied lexically, but as soon as a `..` brings the walk back
/// onto an existing path it is canonicalized again, so a symlink reached through a
/// missing directory is still followed.
fn canonicalize_lenient(path: &Path) -> PathBuf {
    let mut resolved = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => resolved.push(component),
            Component::CurDir => continue,
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => resolved.push(name),
        }
        if let Ok(canonical) = std::fs::canonicalize(&resolved) {
            resolved = canonical;
        }
    }

    resolved
}
