// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Entity path resolution.
//!
//! Turn forward-slash relative paths into typed [`Entity`] and [`EntityFile`]
//! values. Paths with Windows separators are normalized before parsing. Each
//! metadata type has its own rules for which file names it accepts, which file
//! carries the entity definition, and where the entity name comes from.
//!
//! | Type             | Entity files                                   | Definition      |
//! |------------------|------------------------------------------------|-----------------|
//! | most types       | `<dir>/<name>.json`                            | `.json`         |
//! | `Pages`          | `pages/<name>.xml`, `pages/<name>.json`        | `.json`         |
//! | `Themes`         | `themes/<name>.json`, `themes/<name>.inline.css` | `.json`       |
//! | `Files`          | `files/<file>`, `files/<file>.skuid.json`      | `.skuid.json`   |
//! | `Site`           | `site/site.json`, `site/{logo,favicon}/<img>`  | `.json`         |
//! | `ComponentPacks` | `componentpacks/<pack>/**/*`                   | none            |

use super::{is_valid_image_name, MetadataType, ParseError, SubType};

use std::{
    collections::{BTreeSet, HashSet},
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};

const DEFINITION_EXTENSION: &str = ".json";
const FILE_DEFINITION_EXTENSION: &str = ".skuid.json";
const PAGE_LAYOUT_EXTENSION: &str = ".xml";
const THEME_STYLE_EXTENSION: &str = ".inline.css";
const SITE_DEFINITION_FILE: &str = "site.json";
const SITE_ENTITY_NAME: &str = "site";

/// Logical unit of content of a metadata type.
///
/// # Invariants
///
/// - `path` is always `<metadata_type.dir_name()>/<path_relative>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Entity {
    metadata_type: MetadataType,
    sub_type: SubType,
    name: String,
    path: String,
    path_relative: String,
}

impl Entity {
    fn new(
        metadata_type: MetadataType,
        sub_type: SubType,
        name: impl Into<String>,
        path_relative: impl Into<String>,
    ) -> Self {
        let path_relative = path_relative.into();
        Self {
            metadata_type,
            sub_type,
            name: name.into(),
            path: format!("{}/{}", metadata_type.dir_name(), path_relative),
            path_relative,
        }
    }

    pub fn metadata_type(&self) -> MetadataType {
        self.metadata_type
    }

    pub fn sub_type(&self) -> SubType {
        self.sub_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entity path relative to tree root, e.g., `pages/my_page`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Entity path inside its type directory, e.g., `my_page`.
    pub fn path_relative(&self) -> &str {
        &self.path_relative
    }
}

impl Display for Entity {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.path)
    }
}

/// Physical file that belongs to an [`Entity`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityFile {
    entity: Entity,
    name: String,
    path: String,
    path_relative: String,
    is_entity_definition_file: bool,
}

impl EntityFile {
    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    /// Base name of the file.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// File path relative to tree root, e.g., `pages/my_page.json`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// File path inside its type directory, e.g., `my_page.json`.
    pub fn path_relative(&self) -> &str {
        &self.path_relative
    }

    /// Does this file carry the JSON definition of its entity?
    pub fn is_entity_definition_file(&self) -> bool {
        self.is_entity_definition_file
    }
}

impl Display for EntityFile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.path)
    }
}

/// Normalize path separators to forward slashes.
pub fn normalize_path(path: impl AsRef<str>) -> String {
    path.as_ref().replace('\\', "/")
}

/// Check if leading directory of path names a known metadata type.
pub fn is_metadata_type_path(path: impl AsRef<str>) -> bool {
    let path = normalize_path(path);
    path.split('/')
        .next()
        .and_then(MetadataType::from_dir_name)
        .is_some()
}

/// Parse an entity path like `pages/my_page` into an [`Entity`].
///
/// # Errors
///
/// - Return [`ParseError::InvalidPath`] if path is empty, absolute, or
///   contains `.` or `..` segments.
/// - Return [`ParseError::UnknownMetadataType`] if leading directory is not
///   a metadata type directory.
/// - Return [`ParseError::MetadataTypeDoesNotSupportPath`] if path layout is
///   invalid for its type.
/// - Return [`ParseError::InvalidMetadataName`] if entity name is invalid.
pub fn parse_entity_path(path: impl AsRef<str>) -> Result<Entity, ParseError> {
    let split = SplitPath::new(path.as_ref())?;
    let metadata_type = split.metadata_type;

    match (metadata_type, split.rest().as_slice()) {
        (MetadataType::Site, [sub_dir, image]) => {
            let sub_type = split.sub_type(sub_dir)?;
            split.image_name(sub_type, image)?;
            Ok(Entity::new(
                metadata_type,
                sub_type,
                *image,
                format!("{sub_dir}/{image}"),
            ))
        }
        (_, [name]) => {
            split.entity_name(name)?;
            let sub_type = match metadata_type {
                MetadataType::ComponentPacks => SubType::ComponentPack,
                _ => SubType::None,
            };
            Ok(Entity::new(metadata_type, sub_type, *name, *name))
        }
        _ => Err(split.unsupported()),
    }
}

/// Parse an entity file path like `pages/my_page.json` into an [`EntityFile`].
///
/// # Errors
///
/// - Return [`ParseError::InvalidPath`] if path is empty, absolute, or
///   contains `.` or `..` segments.
/// - Return [`ParseError::UnknownMetadataType`] if leading directory is not
///   a metadata type directory.
/// - Return [`ParseError::MetadataTypeDoesNotSupportPath`] if file layout is
///   invalid for its type.
/// - Return [`ParseError::InvalidMetadataName`] if entity name is invalid.
pub fn parse_entity_file_path(path: impl AsRef<str>) -> Result<EntityFile, ParseError> {
    let split = SplitPath::new(path.as_ref())?;
    let metadata_type = split.metadata_type;
    let rest = split.rest();

    let (entity, is_definition) = match (metadata_type, rest.as_slice()) {
        (MetadataType::ComponentPacks, [pack, nested @ ..]) if !nested.is_empty() => {
            split.entity_name(pack)?;
            let entity = Entity::new(metadata_type, SubType::ComponentPack, *pack, *pack);
            (entity, false)
        }
        (MetadataType::Site, [file]) if *file == SITE_DEFINITION_FILE => {
            let entity = Entity::new(
                metadata_type,
                SubType::None,
                SITE_ENTITY_NAME,
                SITE_ENTITY_NAME,
            );
            (entity, true)
        }
        (MetadataType::Site, [sub_dir, file]) => {
            let sub_type = split.sub_type(sub_dir)?;
            let (image, is_definition) = match file.strip_suffix(FILE_DEFINITION_EXTENSION) {
                Some(image) => (image, true),
                None => (*file, false),
            };
            split.image_name(sub_type, image)?;
            let entity = Entity::new(metadata_type, sub_type, image, format!("{sub_dir}/{image}"));
            (entity, is_definition)
        }
        (MetadataType::Files, [file]) => {
            let (name, is_definition) = match file.strip_suffix(FILE_DEFINITION_EXTENSION) {
                Some(name) => (name, true),
                None => (*file, false),
            };
            split.entity_name(name)?;
            (Entity::new(metadata_type, SubType::None, name, name), is_definition)
        }
        (MetadataType::Pages, [file]) => {
            let (name, is_definition) = strip_any(
                file,
                &[(DEFINITION_EXTENSION, true), (PAGE_LAYOUT_EXTENSION, false)],
            )
            .ok_or_else(|| split.unsupported())?;
            split.entity_name(name)?;
            (Entity::new(metadata_type, SubType::None, name, name), is_definition)
        }
        (MetadataType::Themes, [file]) => {
            // INVARIANT: Check longer suffix first so "x.inline.css" never resolves to "x.inline".
            let (name, is_definition) = strip_any(
                file,
                &[(THEME_STYLE_EXTENSION, false), (DEFINITION_EXTENSION, true)],
            )
            .ok_or_else(|| split.unsupported())?;
            split.entity_name(name)?;
            (Entity::new(metadata_type, SubType::None, name, name), is_definition)
        }
        (
            MetadataType::Apps
            | MetadataType::AuthProviders
            | MetadataType::DataServices
            | MetadataType::DataSources
            | MetadataType::DesignSystems
            | MetadataType::Variables
            | MetadataType::PermissionSets
            | MetadataType::SitePermissionSets
            | MetadataType::SessionVariables,
            [file],
        ) => {
            let name = file
                .strip_suffix(DEFINITION_EXTENSION)
                .ok_or_else(|| split.unsupported())?;
            split.entity_name(name)?;
            (Entity::new(metadata_type, SubType::None, name, name), true)
        }
        _ => return Err(split.unsupported()),
    };

    let name = rest.last().copied().unwrap_or_default().to_string();
    Ok(EntityFile {
        entity,
        name,
        path: split.normalized.clone(),
        path_relative: rest.join("/"),
        is_entity_definition_file: is_definition,
    })
}

/// Remove duplicate entities, keeping first occurrence order.
pub fn unique_entities(entities: impl IntoIterator<Item = Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|entity| seen.insert(entity.path.clone()))
        .collect()
}

/// Check if two entity listings describe the same set of entities.
pub fn entities_equal(left: &[Entity], right: &[Entity]) -> bool {
    entity_paths(left) == entity_paths(right)
}

/// Collect the entity paths of a listing of entities.
pub fn entity_paths<'a>(entities: impl IntoIterator<Item = &'a Entity>) -> BTreeSet<String> {
    entities
        .into_iter()
        .map(|entity| entity.path.clone())
        .collect()
}

fn strip_any<'a>(file: &'a str, suffixes: &[(&str, bool)]) -> Option<(&'a str, bool)> {
    suffixes.iter().find_map(|(suffix, is_definition)| {
        file.strip_suffix(suffix).map(|name| (name, *is_definition))
    })
}

/// Relative path split into its metadata type and remaining segments.
struct SplitPath {
    metadata_type: MetadataType,
    normalized: String,
}

impl SplitPath {
    fn new(path: &str) -> Result<Self, ParseError> {
        let normalized = normalize_path(path);
        let invalid = || ParseError::InvalidPath {
            path: path.to_string(),
        };

        if normalized.trim().is_empty()
            || normalized.starts_with('/')
            || Path::new(&normalized).is_absolute()
            || has_drive_prefix(&normalized)
        {
            return Err(invalid());
        }

        let normalized = normalized
            .strip_suffix('/')
            .map(ToString::to_string)
            .unwrap_or(normalized);
        if normalized
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(invalid());
        }

        let (dir_name, rest) = normalized.split_once('/').unwrap_or((normalized.as_str(), ""));
        let metadata_type =
            MetadataType::from_dir_name(dir_name).ok_or_else(|| ParseError::UnknownMetadataType {
                path: path.to_string(),
            })?;

        if rest.is_empty() {
            return Err(ParseError::MetadataTypeDoesNotSupportPath {
                metadata_type,
                path: path.to_string(),
            });
        }

        Ok(Self {
            metadata_type,
            normalized,
        })
    }

    fn rest(&self) -> Vec<&str> {
        self.normalized.split('/').skip(1).collect()
    }

    fn unsupported(&self) -> ParseError {
        ParseError::MetadataTypeDoesNotSupportPath {
            metadata_type: self.metadata_type,
            path: self.normalized.clone(),
        }
    }

    fn invalid_name(&self, name: &str) -> ParseError {
        ParseError::InvalidMetadataName {
            name: name.to_string(),
            path: self.normalized.clone(),
        }
    }

    fn sub_type(&self, dir: &str) -> Result<SubType, ParseError> {
        SubType::lookup(self.metadata_type, dir).ok_or_else(|| self.unsupported())
    }

    fn entity_name(&self, name: &str) -> Result<(), ParseError> {
        if self.metadata_type.accepts_name(name) {
            Ok(())
        } else {
            Err(self.invalid_name(name))
        }
    }

    fn image_name(&self, sub_type: SubType, name: &str) -> Result<(), ParseError> {
        if is_valid_image_name(sub_type, name) {
            Ok(())
        } else {
            Err(self.invalid_name(name))
        }
    }
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
