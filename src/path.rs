// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine and check paths of the site directory that retrievals write into
//! and deployments read from, along with the default location of the
//! configuration file.

use crate::metadata::MetadataType;

use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

/// Validate target directory of a retrieval or deployment.
///
/// Does not check if the directory actually exists.
///
/// # Errors
///
/// - Return [`PathError::Empty`] if path is empty or only whitespace.
/// - Return [`PathError::NotAbsolute`] if path is relative.
/// - Return [`PathError::ParentTraversal`] if path contains `..`.
pub fn validate_target_dir(path: impl AsRef<Path>) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.as_os_str().to_string_lossy().trim().is_empty() {
        return Err(PathError::Empty);
    }

    if !path.is_absolute() {
        return Err(PathError::NotAbsolute {
            path: path.to_path_buf(),
        });
    }

    if path
        .components()
        .any(|component| matches!(component, Component::ParentDir))
    {
        return Err(PathError::ParentTraversal {
            path: path.to_path_buf(),
        });
    }

    Ok(path.to_path_buf())
}

/// Remove every metadata type directory of target directory.
///
/// Anything that is not a known metadata type directory is left alone.
///
/// # Errors
///
/// - Return [`PathError::Clear`] if a directory cannot be removed.
#[instrument(skip(target), level = "debug")]
pub async fn clear_directories(target: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let target = target.as_ref();
    let mut cleared = Vec::new();

    for dir_name in MetadataType::dir_names() {
        let dir = target.join(dir_name);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {
                tokio::fs::remove_dir_all(&dir)
                    .await
                    .map_err(|source| PathError::Clear {
                        source,
                        path: dir.clone(),
                    })?;
                debug!("cleared {:?}", dir.display());
                cleared.push(dir);
            }
            _ => continue,
        }
    }

    Ok(cleared)
}

/// Determine default absolute path to configuration file.
///
/// Uses XDG Base Directory path `$XDG_CONFIG_HOME/skuid-sync/config.toml`.
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`PathError::NoWayHome`] if configuration directory cannot be
///   determined.
///
/// # See Also
///
/// - [XDG Base Directory](https://wiki.archlinux.org/title/XDG_Base_Directory)
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|path| path.join("skuid-sync").join("config.toml"))
        .ok_or(PathError::NoWayHome)
}

/// Path error types.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Target directory is blank.
    #[error("target directory cannot be empty")]
    Empty,

    /// Target directory is relative.
    #[error("target directory {:?} must be absolute", path.display())]
    NotAbsolute { path: PathBuf },

    /// Target directory steps out through a parent directory.
    #[error("target directory {:?} cannot contain '..'", path.display())]
    ParentTraversal { path: PathBuf },

    /// Metadata type directory cannot be removed.
    #[error("failed to clear directory {:?}", path.display())]
    Clear {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// No way to determine user's configuration directory.
    #[error("cannot determine absolute path to user's configuration directory")]
    NoWayHome,
}

/// Friendly result alias :3
pub type Result<T, E = PathError> = std::result::Result<T, E>;
