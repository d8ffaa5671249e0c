// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Archive filters.
//!
//! Decide which entity files found under the metadata type directories make
//! it into an archive.

use crate::{metadata::EntityFile, plan::NlxMetadata};

use std::collections::HashSet;

/// Select entity files for inclusion into an archive.
pub trait ArchiveFilter: Send + Sync + 'static {
    /// Should entity file be archived?
    fn accepts(&self, file: &EntityFile) -> bool;
}

/// Accept every entity file.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllFiles;

impl ArchiveFilter for AllFiles {
    fn accepts(&self, _file: &EntityFile) -> bool {
        true
    }
}

/// Accept entity files whose entity path is whitelisted.
///
/// Whitelist usually comes from the metadata listing of a plan so that only
/// the entities the server asked for get archived.
#[derive(Debug, Default, Clone)]
pub struct MetadataFilter {
    entity_paths: HashSet<String>,
}

impl MetadataFilter {
    /// Whitelist every entity listed by plan metadata.
    pub fn from_metadata(metadata: &NlxMetadata) -> Self {
        Self {
            entity_paths: metadata.entity_paths().into_iter().collect(),
        }
    }

    /// Whitelist a listing of entity paths, e.g., `pages/my_page`.
    pub fn from_entity_paths(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            entity_paths: paths.into_iter().map(Into::into).collect(),
        }
    }
}

impl ArchiveFilter for MetadataFilter {
    fn accepts(&self, file: &EntityFile) -> bool {
        self.entity_paths.contains(file.entity().path())
    }
}

/// Accept entity files whose own file path is whitelisted.
#[derive(Debug, Default, Clone)]
pub struct FilePathFilter {
    paths: HashSet<String>,
}

impl FilePathFilter {
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            paths: paths
                .into_iter()
                .map(|path| crate::metadata::normalize_path(path.into()))
                .collect(),
        }
    }
}

impl ArchiveFilter for FilePathFilter {
    fn accepts(&self, file: &EntityFile) -> bool {
        self.paths.contains(file.path())
    }
}
