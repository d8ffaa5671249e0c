// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Metadata archive builder.
//!
//! Pack the entity files of a site directory into a single ZIP archive that
//! can be posted to the remote site. Only the directories of known metadata
//! types are walked. Anything else in the site directory is ignored, so
//! READMEs, scripts, or version control data never leak into an archive.
//!
//! # Pipeline
//!
//! Archives are built through a three stage pipeline:
//!
//! 1. One walker per metadata type directory emits candidate entity files
//!    that pass the [`ArchiveFilter`].
//! 2. A bounded pool of readers loads file contents concurrently.
//! 3. A single writer appends each file to the archive. ZIP entries must be
//!    written sequentially, so this stage is never parallel.
//!
//! Any failure in any stage aborts the whole pipeline. Walkers stop as soon as
//! the channel they feed is closed by the failing consumer.

pub mod filter;

pub use filter::{AllFiles, ArchiveFilter, FilePathFilter, MetadataFilter};

use crate::metadata::{
    parse_entity_file_path, unique_entities, Entity, EntityFile, MetadataType,
};

use futures::{stream, StreamExt, TryStreamExt};
use ignore::WalkBuilder;
use std::{
    collections::BTreeSet,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    pin::pin,
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

/// Amount of files read concurrently.
const READER_COUNT: usize = 20;

/// Capacity of channel between walkers and readers.
const CANDIDATE_CAPACITY: usize = 64;

/// Built metadata archive.
#[derive(Debug, Default, Clone)]
pub struct Archive {
    bytes: Vec<u8>,
    file_paths: BTreeSet<String>,
    entities: Vec<Entity>,
}

impl Archive {
    /// Raw ZIP bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Paths of every archived file.
    pub fn file_paths(&self) -> &BTreeSet<String> {
        &self.file_paths
    }

    /// Unique entities covered by archived files.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Entity paths covered by archived files.
    pub fn entity_paths(&self) -> BTreeSet<String> {
        crate::metadata::entity_paths(&self.entities)
    }

    /// Validate archived entities against expectations.
    ///
    /// If an expected set of entity paths is given, then the archived entity
    /// paths must match it exactly. Otherwise the archive must not be empty.
    ///
    /// # Errors
    ///
    /// - Return [`ValidationError::EntityMismatch`] if archived entities
    ///   differ from the expected entities.
    /// - Return [`ValidationError::Empty`] if archive is empty.
    pub fn validate(&self, expected: Option<&BTreeSet<String>>) -> Result<(), ValidationError> {
        let archived = self.entity_paths();
        match expected {
            Some(expected) if *expected != archived => Err(ValidationError::EntityMismatch {
                missing: expected.difference(&archived).cloned().collect(),
                unexpected: archived.difference(expected).cloned().collect(),
            }),
            None if self.file_paths.is_empty() => Err(ValidationError::Empty),
            _ => Ok(()),
        }
    }
}

/// Archive entity files of site directory that pass filter.
///
/// # Errors
///
/// - Return [`ArchiveError::NoMetadataTypeDirs`] if site directory does not
///   contain a single metadata type directory.
/// - Return [`ArchiveError::NoFiles`] if filter rejected every file.
/// - Return [`ArchiveError::Walk`] or [`ArchiveError::Read`] if files cannot
///   be listed or read.
/// - Return [`ArchiveError::Zip`] or [`ArchiveError::Write`] if archive
///   cannot be written.
#[instrument(skip(root, filter), level = "debug")]
pub async fn archive(root: impl AsRef<Path>, filter: impl ArchiveFilter) -> Result<Archive> {
    let root = root.as_ref().to_path_buf();

    let mut type_dirs = Vec::new();
    for metadata_type in MetadataType::ALL {
        let dir = root.join(metadata_type.dir_name());
        if tokio::fs::metadata(&dir)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            type_dirs.push(metadata_type);
        }
    }

    if type_dirs.is_empty() {
        return Err(ArchiveError::NoMetadataTypeDirs { root });
    }

    let filter: Arc<dyn ArchiveFilter> = Arc::new(filter);
    let (tx, rx) = mpsc::channel(CANDIDATE_CAPACITY);
    let mut walkers = Vec::with_capacity(type_dirs.len());
    for metadata_type in type_dirs {
        let tx = tx.clone();
        let root = root.clone();
        let filter = Arc::clone(&filter);
        walkers.push(tokio::task::spawn_blocking(move || {
            walk_type_dir(&root, metadata_type, filter.as_ref(), &tx)
        }));
    }

    // INVARIANT: Channel closes once the last walker drops its sender.
    drop(tx);

    let candidates = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|candidate| (candidate, rx))
    });
    let reads = candidates
        .map(|candidate: Result<Candidate>| async move {
            let candidate = candidate?;
            let bytes = tokio::fs::read(&candidate.full_path)
                .await
                .map_err(|source| ArchiveError::Read {
                    source,
                    path: candidate.full_path.clone(),
                })?;
            Ok::<_, ArchiveError>((candidate.file, bytes))
        })
        .buffer_unordered(READER_COUNT);
    let mut reads = pin!(reads);

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut file_paths = BTreeSet::new();
    let mut entities = Vec::new();

    while let Some((file, bytes)) = reads.try_next().await? {
        debug!("archive {}", file.path());
        writer.start_file(file.path(), options)?;
        writer.write_all(&bytes).map_err(ArchiveError::Write)?;
        file_paths.insert(file.path().to_string());
        entities.push(file.entity().clone());
    }

    for walker in walkers {
        walker.await?;
    }

    if file_paths.is_empty() {
        return Err(ArchiveError::NoFiles { root });
    }

    let bytes = writer.finish()?.into_inner();
    debug!("archived {} files ({} bytes)", file_paths.len(), bytes.len());

    Ok(Archive {
        bytes,
        file_paths,
        entities: unique_entities(entities),
    })
}

/// Entity file that passed the filter, waiting to be read.
struct Candidate {
    file: EntityFile,
    full_path: PathBuf,
}

fn walk_type_dir(
    root: &Path,
    metadata_type: MetadataType,
    filter: &dyn ArchiveFilter,
    tx: &mpsc::Sender<Result<Candidate>>,
) {
    let type_dir = root.join(metadata_type.dir_name());
    let walker = WalkBuilder::new(&type_dir)
        .standard_filters(false)
        .follow_links(false)
        .build();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) => {
                let _ = tx.blocking_send(Err(ArchiveError::Walk {
                    source,
                    path: type_dir.clone(),
                }));
                return;
            }
        };

        if !entry.file_type().is_some_and(|kind| kind.is_file()) {
            continue;
        }

        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };

        let relative = relative.to_string_lossy();
        let file = match parse_entity_file_path(relative.as_ref()) {
            Ok(file) => file,
            Err(error) => {
                warn!("skip {relative:?}: {error}");
                continue;
            }
        };

        if !filter.accepts(&file) {
            continue;
        }

        let candidate = Candidate {
            file,
            full_path: entry.into_path(),
        };

        // INVARIANT: Closed channel means the pipeline was aborted downstream.
        if tx.blocking_send(Ok(candidate)).is_err() {
            return;
        }
    }
}

/// Archive building error types.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Site directory contains no metadata type directory.
    #[error("no metadata type directories found in {:?}", root.display())]
    NoMetadataTypeDirs { root: PathBuf },

    /// Filter rejected every file.
    #[error("no files to archive in {:?}", root.display())]
    NoFiles { root: PathBuf },

    /// Metadata type directory cannot be walked.
    #[error("failed to walk {:?}", path.display())]
    Walk {
        #[source]
        source: ignore::Error,
        path: PathBuf,
    },

    /// Entity file cannot be read.
    #[error("failed to read {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Entity file cannot be written into archive.
    #[error("failed to write archive entry")]
    Write(#[source] std::io::Error),

    /// Archive format failure.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// Walker task failed to complete.
    #[error(transparent)]
    Task(#[from] tokio::task::JoinError),
}

/// Archive validation error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Archived entities differ from expected entities.
    #[error("archived entities differ from expected entities: missing {missing:?}, unexpected {unexpected:?}")]
    EntityMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// Archive holds no entity at all.
    #[error("archive is empty")]
    Empty,
}

/// Friendly result alias :3
type Result<T, E = ArchiveError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;
    use zip::ZipArchive;

    fn site(files: &[(&str, &str)]) -> anyhow::Result<TempDir> {
        let dir = TempDir::new()?;
        for (path, contents) in files {
            let path = dir.path().join(path);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, contents)?;
        }

        Ok(dir)
    }

    fn entries(bytes: &[u8]) -> anyhow::Result<BTreeSet<String>> {
        let mut zip = ZipArchive::new(Cursor::new(bytes))?;
        let mut names = BTreeSet::new();
        for index in 0..zip.len() {
            names.insert(zip.by_index(index)?.name().to_string());
        }

        Ok(names)
    }

    #[tokio::test]
    async fn archive_only_walks_metadata_type_dirs() -> anyhow::Result<()> {
        let dir = site(&[
            ("pages/a.xml", "<skuidpage/>"),
            ("pages/a.json", r#"{"name":"a"}"#),
            ("notes.md", "# notes"),
            ("scripts/b.sh", "echo b"),
        ])?;

        let archive = archive(dir.path(), AllFiles).await?;
        let expect: BTreeSet<String> = ["pages/a.json", "pages/a.xml"]
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(entries(archive.bytes())?, expect);
        assert_eq!(archive.file_paths(), &expect);
        assert_eq!(
            archive.entity_paths(),
            BTreeSet::from(["pages/a".to_string()])
        );

        Ok(())
    }

    #[tokio::test]
    async fn archive_skips_unparseable_files() -> anyhow::Result<()> {
        let dir = site(&[
            ("apps/good.json", "{}"),
            ("apps/bad.txt", "nope"),
            ("componentpacks/pack/js/runtime.js", "run()"),
            ("site/logo/logo.png", "png"),
            ("site/logo/logo.png.skuid.json", "{}"),
        ])?;

        let archive = archive(dir.path(), AllFiles).await?;

        assert_eq!(
            archive.entity_paths(),
            BTreeSet::from([
                "apps/good".to_string(),
                "componentpacks/pack".to_string(),
                "site/logo/logo.png".to_string(),
            ])
        );
        assert!(!archive.file_paths().contains("apps/bad.txt"));

        Ok(())
    }

    #[tokio::test]
    async fn archive_applies_metadata_filter() -> anyhow::Result<()> {
        let dir = site(&[
            ("pages/a.xml", ""),
            ("pages/a.json", "{}"),
            ("pages/b.xml", ""),
            ("pages/b.json", "{}"),
        ])?;

        let filter = MetadataFilter::from_entity_paths(["pages/b"]);
        let archive = archive(dir.path(), filter).await?;

        assert_eq!(
            entries(archive.bytes())?,
            BTreeSet::from(["pages/b.json".to_string(), "pages/b.xml".to_string()])
        );
        archive.validate(Some(&BTreeSet::from(["pages/b".to_string()])))?;
        assert!(matches!(
            archive.validate(Some(&BTreeSet::from(["pages/a".to_string()]))),
            Err(ValidationError::EntityMismatch { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn archive_without_metadata_dirs_fails() -> anyhow::Result<()> {
        let dir = site(&[("notes.md", ""), ("scripts/b.sh", "")])?;

        assert!(matches!(
            archive(dir.path(), AllFiles).await,
            Err(ArchiveError::NoMetadataTypeDirs { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn archive_with_everything_filtered_fails() -> anyhow::Result<()> {
        let dir = site(&[("pages/a.xml", ""), ("pages/a.json", "{}")])?;
        let filter = FilePathFilter::new(["apps/x.json"]);

        assert!(matches!(
            archive(dir.path(), filter).await,
            Err(ArchiveError::NoFiles { .. })
        ));

        Ok(())
    }
}
