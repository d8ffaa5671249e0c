// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Metadata model of a site.
//!
//! Everything a site is made of is grouped into a closed set of
//! __metadata types__. Each type owns one top-level directory, both on disk
//! and inside the archives exchanged with the remote site. The directory name
//! of a type is always its canonical name in lowercase, e.g., the `Pages` type
//! lives under `pages/`.
//!
//! # Entities and Entity Files
//!
//! An __entity__ is one logical item of a metadata type, e.g., a single page
//! or a single theme. An entity is backed by one or more __entity files__.
//! Exactly one of those files carries the JSON definition of the entity when
//! the entity has a definition at all. Pages, for example, are stored as a
//! pair of `pages/<name>.xml` and `pages/<name>.json` files where the JSON
//! file is the definition.
//!
//! Component packs are the odd ones out. A component pack is a whole
//! directory tree under `componentpacks/<pack>/` with no definition file.
//!
//! # See Also
//!
//! - [`entity`]

pub mod entity;

pub use entity::{
    entities_equal, entity_paths, is_metadata_type_path, normalize_path, parse_entity_file_path,
    parse_entity_path, unique_entities, Entity, EntityFile,
};

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt::{Display, Formatter, Result as FmtResult};

/// Closed set of metadata types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetadataType {
    Apps,
    AuthProviders,
    ComponentPacks,
    DataServices,
    DataSources,
    DesignSystems,
    Variables,
    Files,
    Pages,
    PermissionSets,
    SitePermissionSets,
    SessionVariables,
    Site,
    Themes,
}

impl MetadataType {
    /// Every metadata type in canonical order.
    pub const ALL: [MetadataType; 14] = [
        MetadataType::Apps,
        MetadataType::AuthProviders,
        MetadataType::ComponentPacks,
        MetadataType::DataServices,
        MetadataType::DataSources,
        MetadataType::DesignSystems,
        MetadataType::Variables,
        MetadataType::Files,
        MetadataType::Pages,
        MetadataType::PermissionSets,
        MetadataType::SitePermissionSets,
        MetadataType::SessionVariables,
        MetadataType::Site,
        MetadataType::Themes,
    ];

    /// Canonical mixed-case name of the type.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Apps => "Apps",
            Self::AuthProviders => "AuthProviders",
            Self::ComponentPacks => "ComponentPacks",
            Self::DataServices => "DataServices",
            Self::DataSources => "DataSources",
            Self::DesignSystems => "DesignSystems",
            Self::Variables => "Variables",
            Self::Files => "Files",
            Self::Pages => "Pages",
            Self::PermissionSets => "PermissionSets",
            Self::SitePermissionSets => "SitePermissionSets",
            Self::SessionVariables => "SessionVariables",
            Self::Site => "Site",
            Self::Themes => "Themes",
        }
    }

    /// Root directory of the type, which is always the lowercased name.
    pub const fn dir_name(self) -> &'static str {
        match self {
            Self::Apps => "apps",
            Self::AuthProviders => "authproviders",
            Self::ComponentPacks => "componentpacks",
            Self::DataServices => "dataservices",
            Self::DataSources => "datasources",
            Self::DesignSystems => "designsystems",
            Self::Variables => "variables",
            Self::Files => "files",
            Self::Pages => "pages",
            Self::PermissionSets => "permissionsets",
            Self::SitePermissionSets => "sitepermissionsets",
            Self::SessionVariables => "sessionvariables",
            Self::Site => "site",
            Self::Themes => "themes",
        }
    }

    /// Look up a type by its directory name.
    ///
    /// Matching is case-sensitive, so `Pages` is not a valid directory name.
    pub fn from_dir_name(dir_name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|metadata_type| metadata_type.dir_name() == dir_name)
    }

    /// Iterate over the directory names of every known type.
    pub fn dir_names() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(Self::dir_name)
    }

    /// Check that an entity name is acceptable for this type.
    pub(crate) fn accepts_name(self, name: &str) -> bool {
        match self {
            Self::Files => FILE_NAME.is_match(name),
            _ => ENTITY_NAME.is_match(name),
        }
    }
}

impl Display for MetadataType {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.name())
    }
}

/// Sub-division of a metadata type.
///
/// Only [`MetadataType::Site`] and [`MetadataType::ComponentPacks`] have
/// sub-types. Every other type uses [`SubType::None`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubType {
    #[default]
    None,

    /// Site logo image under `site/logo/`.
    Logo,

    /// Site favicon under `site/favicon/`.
    Favicon,

    /// Any directory directly under `componentpacks/`.
    ComponentPack,
}

impl SubType {
    /// Resolve sub-type from the first directory inside a type directory.
    pub(crate) fn lookup(metadata_type: MetadataType, dir: &str) -> Option<Self> {
        match (metadata_type, dir) {
            (MetadataType::Site, "logo") => Some(Self::Logo),
            (MetadataType::Site, "favicon") => Some(Self::Favicon),
            (MetadataType::ComponentPacks, _) => Some(Self::ComponentPack),
            _ => None,
        }
    }

    /// Image extensions accepted for site image sub-types.
    pub(crate) fn image_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Logo => &["png", "jpg", "gif"],
            Self::Favicon => &["ico"],
            Self::None | Self::ComponentPack => &[],
        }
    }
}

static ENTITY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\- ]+$").expect("entity name pattern is valid"));

static FILE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-\(\)\. ]+$").expect("file name pattern is valid"));

/// Check an image file name of a site sub-type entity.
pub(crate) fn is_valid_image_name(sub_type: SubType, name: &str) -> bool {
    if !FILE_NAME.is_match(name) {
        return false;
    }

    let Some((_, extension)) = name.rsplit_once('.') else {
        return false;
    };

    let extension = extension.to_ascii_lowercase();
    sub_type
        .image_extensions()
        .iter()
        .any(|allowed| *allowed == extension)
}

/// Path parsing error types.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Path is empty, absolute, or escapes its root.
    #[error("path {path:?} must be a non-empty relative path without '.' or '..' segments")]
    InvalidPath { path: String },

    /// Leading directory is not the directory of any metadata type.
    #[error("path {path:?} is not inside a metadata type directory")]
    UnknownMetadataType { path: String },

    /// Path layout is not valid for its metadata type.
    #[error("metadata type {metadata_type} does not support path {path:?}")]
    MetadataTypeDoesNotSupportPath {
        metadata_type: MetadataType,
        path: String,
    },

    /// Entity name contains characters the metadata type rejects.
    #[error("invalid metadata name {name:?} in path {path:?}")]
    InvalidMetadataName { name: String, path: String },
}
