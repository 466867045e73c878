//! Local file selection for uploads.
//!
//! Files must live under the base directory; their remote names are the
//! forward-slash paths relative to it.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Canonical form of an existing base directory.
pub fn base_directory(base: &Path) -> Result<PathBuf> {
    let canonical = base
        .canonicalize()
        .with_context(|| format!("Invalid base directory: {}", base.display()))?;
    if !canonical.is_dir() {
        bail!("Invalid base directory: {} is not a directory", base.display());
    }
    Ok(canonical)
}

/// Path of `file` relative to `base`, joined with `/` on every platform.
///
/// `base` must already be canonical (see [`base_directory`]).
pub fn relative_unix_path(base: &Path, file: &Path) -> Result<String> {
    let canonical = file
        .canonicalize()
        .with_context(|| format!("Invalid target file: {}", file.display()))?;
    if !canonical.is_file() {
        bail!("Invalid target file: {} is not a regular file", file.display());
    }
    let relative = canonical.strip_prefix(base).map_err(|_| {
        anyhow::anyhow!(
            "Invalid target file: {} is outside the base directory {}",
            file.display(),
            base.display()
        )
    })?;

    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(
                part.to_str()
                    .with_context(|| format!("File name is not valid UTF-8: {}", file.display()))?,
            ),
            _ => bail!("Invalid target file: {}", file.display()),
        }
    }
    Ok(parts.join("/"))
}

/// Map every file to its remote relative path.
pub fn collect_uploads(base: &Path, files: &[PathBuf]) -> Result<BTreeMap<String, PathBuf>> {
    let mut uploads = BTreeMap::new();
    for file in files {
        let relative = relative_unix_path(base, file)?;
        uploads.insert(relative, file.clone());
    }
    Ok(uploads)
}
