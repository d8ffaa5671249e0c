// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the site profile file that skuid-sync reads defaults
//! from, to simplify the process of serialization and deserialization. File
//! I/O is left to the caller to figure out.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Site profile layout.
///
/// A __site profile__ holds the defaults of every command, so that a site
/// directory can be kept in sync without repeating the same arguments over
/// and over. Command-line arguments and environment variables always take
/// precedence over the profile.
///
/// Tokens are deliberately absent. They are never written to disk.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SiteProfile {
    /// Site URL, e.g., `https://example.skuidsite.com`.
    pub host: Option<String>,

    /// Site directory to retrieve into and deploy from.
    pub directory: Option<SiteDirectory>,

    /// Restrict commands to entities of a single app.
    pub app_name: Option<String>,

    /// Leave out data sources backed by the site's own database.
    #[serde(default)]
    pub ignore_skuid_db: bool,

    /// Keep metadata type directories before writing retrieval results.
    #[serde(default)]
    pub no_clean: bool,
}

impl FromStr for SiteProfile {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut profile: SiteProfile = toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on site directory field.
        if let Some(directory) = profile.directory.as_mut() {
            *directory = SiteDirectory::new(
                shellexpand::full(directory.to_string().as_str())
                    .map_err(ConfigError::ShellExpansion)?
                    .into_owned(),
            );
        }

        Ok(profile)
    }
}

impl Display for SiteProfile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Path of a site directory.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct SiteDirectory(PathBuf);

impl SiteDirectory {
    /// Construct new site directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat site directory as [`Path`] slice.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }
}

impl Display for SiteDirectory {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}
