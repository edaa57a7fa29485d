//! Path validation
//!
//! Resolves client-supplied paths inside the storage root and rejects any
//! path that would land outside of it.

use log::warn;
use std::ffi::OsString;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::error::SandboxError;

/// Longest client path accepted for resolution
pub const MAX_PATH_LENGTH: usize = 4096;

/// Longest extension (including the leading dot) a record may carry
pub const MAX_EXTENSION_LENGTH: usize = 13;

/// Storage root every managed file must live under.
///
/// The root is canonicalized once at construction; every resolution is
/// checked against that canonical form after symlinks are followed.
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    /// Creates a sandbox over an existing directory
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        let canonical = root.canonicalize().map_err(|e| SandboxError::InvalidRoot {
            path: root.display().to_string(),
            source: e,
        })?;

        if !canonical.is_dir() {
            return Err(SandboxError::InvalidRoot {
                path: root.display().to_string(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
            });
        }

        Ok(Self { root: canonical })
    }

    /// Canonical storage root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lexically resolves `input` below the root without touching the disk.
    ///
    /// Leading separators are stripped so an absolute client path cannot
    /// replace the root; an absolute path already under the root is accepted
    /// as-is. Any `..` component is rejected.
    pub fn normalize(&self, input: &str) -> Result<PathBuf, SandboxError> {
        if input.len() > MAX_PATH_LENGTH {
            return Err(SandboxError::PathUnsafe(format!(
                "path exceeds {MAX_PATH_LENGTH} bytes"
            )));
        }

        if input.contains('\0') {
            warn!("Rejected path containing a null byte");
            return Err(SandboxError::PathUnsafe("path contains a null byte".into()));
        }

        let unified = input.replace('\\', "/");
        let candidate = Path::new(&unified);
        let relative = match candidate.strip_prefix(&self.root) {
            Ok(rest) if candidate.is_absolute() => rest,
            _ => Path::new(unified.trim_start_matches('/')),
        };

        let mut resolved = self.root.clone();
        for component in relative.components() {
            match component {
                Component::CurDir => {}
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir => {
                    warn!("Path traversal attempt detected: {input}");
                    return Err(SandboxError::PathUnsafe(input.to_string()));
                }
                Component::RootDir | Component::Prefix(_) => {
                    warn!("Absolute path override attempt detected: {input}");
                    return Err(SandboxError::PathUnsafe(input.to_string()));
                }
            }
        }

        Ok(resolved)
    }

    /// Resolves `input` to an absolute path inside the root, following
    /// symlinks on the part of the path that already exists.
    ///
    /// Components that do not exist yet are validated lexically, so a
    /// future write to the returned path cannot leave the sandbox.
    pub async fn resolve(&self, input: &str) -> Result<PathBuf, SandboxError> {
        let candidate = self.normalize(input)?;

        let mut existing = candidate.clone();
        let mut missing: Vec<OsString> = Vec::new();
        let canonical = loop {
            match fs::canonicalize(&existing).await {
                Ok(path) => break path,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    let Some(name) = existing.file_name().map(|n| n.to_os_string()) else {
                        return Err(SandboxError::PathUnsafe(input.to_string()));
                    };
                    missing.push(name);
                    if !existing.pop() || !existing.starts_with(&self.root) {
                        return Err(SandboxError::PathUnsafe(input.to_string()));
                    }
                }
                Err(e) => {
                    warn!("Failed to resolve {input}: {e}");
                    return Err(SandboxError::PathUnsafe(format!("{input}: {e}")));
                }
            }
        };

        if !canonical.starts_with(&self.root) {
            warn!(
                "Path {} resolves outside storage root via {}",
                input,
                canonical.display()
            );
            return Err(SandboxError::PathUnsafe(input.to_string()));
        }

        Ok(missing
            .into_iter()
            .rev()
            .fold(canonical, |path, part| path.join(part)))
    }

    /// Resolves a file inside `directory` (an already-resolved directory) and
    /// verifies it does not resolve anywhere else.
    pub async fn resolve_file(
        &self,
        directory: &Path,
        file_name: &str,
    ) -> Result<PathBuf, SandboxError> {
        validate_file_name(file_name)?;
        let joined = directory.join(file_name);
        let resolved = self.resolve(&path_to_str(&joined)?).await?;

        if resolved.parent() != Some(directory) {
            warn!(
                "File name {} resolves outside of {}",
                file_name,
                directory.display()
            );
            return Err(SandboxError::PathUnsafe(file_name.to_string()));
        }

        Ok(resolved)
    }

    /// Client-facing form of an absolute path: `/`-rooted, root prefix removed
    pub fn to_public(&self, absolute: &Path) -> Result<String, SandboxError> {
        let relative = absolute.strip_prefix(&self.root).map_err(|_| {
            SandboxError::PathUnsafe("recorded path lies outside storage root".into())
        })?;

        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();

        Ok(format!("/{}", parts.join("/")))
    }
}

/// Validates a single file name component
pub fn validate_file_name(name: &str) -> Result<(), SandboxError> {
    if name.trim().is_empty() {
        return Err(SandboxError::InvalidName("empty file name".into()));
    }

    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        warn!("Rejected suspicious file name: {name}");
        return Err(SandboxError::PathUnsafe(name.to_string()));
    }

    Ok(())
}

/// Splits a file name into base name and extension (with its leading dot).
///
/// Only the last extension is split off, and dotfiles keep their full name:
/// `archive.tar.gz` gives `("archive.tar", ".gz")`, `.env` gives `(".env", "")`.
pub fn split_file_name(file_name: &str) -> Result<(String, String), SandboxError> {
    validate_file_name(file_name)?;

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| SandboxError::InvalidName(file_name.to_string()))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{e}"))
        .unwrap_or_default();

    if extension.len() > MAX_EXTENSION_LENGTH {
        return Err(SandboxError::InvalidName(format!(
            "extension {extension} is longer than {MAX_EXTENSION_LENGTH} characters"
        )));
    }

    Ok((stem.to_string(), extension))
}

/// UTF-8 view of a path; records only carry UTF-8 paths
pub fn path_to_str(path: &Path) -> Result<String, SandboxError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| SandboxError::InvalidName(format!("{} is not valid UTF-8", path.display())))
}
