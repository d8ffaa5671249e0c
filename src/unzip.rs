// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Retrieval result writer.
//!
//! Extract the ZIP archive a plan execution returns into the site directory.
//! Entries that do not name a valid entity file are skipped with a warning,
//! and so are definition files that are not JSON objects. Definition files are
//! sanitized before being written.
//!
//! Both plans of a retrieval may return a definition for the same entity. A
//! [`WriteSession`] remembers every path it wrote so that a definition seen
//! twice is reconciled through [`combine_json`] instead of clobbered. Start a
//! fresh session for every retrieval.

use crate::{
    json::{combine_json, sanitize, JsonError},
    metadata::{normalize_path, parse_entity_file_path},
    path::{validate_target_dir, PathError},
    plan::PlanName,
};

use std::{
    collections::{BTreeSet, HashSet},
    fs::{self, File},
    io::{Cursor, Read},
    path::PathBuf,
};
use tracing::{debug, instrument, warn};
use zip::ZipArchive;

/// Result of writing one plan's archive to disk.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteReport {
    /// Entity paths that received at least one file.
    pub entity_paths: BTreeSet<String>,

    /// Entries that were skipped.
    pub warnings: Vec<String>,
}

/// Bookkeeping of one retrieval's writes.
#[derive(Debug, Default)]
pub struct WriteSession {
    written: HashSet<PathBuf>,
}

impl WriteSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract plan result archive into target directory.
    ///
    /// # Errors
    ///
    /// - Return [`WriteError::Path`] if target directory is not usable.
    /// - Return [`WriteError::Zip`] if archive cannot be opened or an entry
    ///   cannot be read.
    /// - Return [`WriteError::Json`] if an existing definition cannot be read
    ///   back, or a definition cannot be serialized.
    /// - Return [`WriteError::CreateDir`] or [`WriteError::Write`] if a file
    ///   cannot be written.
    #[instrument(skip(self, target_dir, zip_bytes), level = "debug")]
    pub fn write_results(
        &mut self,
        target_dir: impl AsRef<std::path::Path>,
        plan_name: PlanName,
        zip_bytes: &[u8],
    ) -> Result<WriteReport> {
        let target_dir = validate_target_dir(target_dir)?;
        let mut archive = ZipArchive::new(Cursor::new(zip_bytes))?;
        let mut report = WriteReport::default();

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index)?;
            if entry.is_dir() {
                continue;
            }

            let name = normalize_path(entry.name());
            let file = match parse_entity_file_path(&name) {
                Ok(file) => file,
                Err(error) => {
                    let warning = format!("{plan_name} result: skip {name:?}: {error}");
                    warn!("{warning}");
                    report.warnings.push(warning);
                    continue;
                }
            };

            let path = target_dir.join(file.path());
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|source| WriteError::Read {
                    source,
                    name: name.clone(),
                })?;

            if file.is_entity_definition_file() {
                let reconciled = if self.written.contains(&path) {
                    debug!("reconcile {:?}", path.display());
                    let existing = File::open(&path).map_err(|source| WriteError::Read {
                        source,
                        name: name.clone(),
                    })?;
                    combine_json(&content, existing, &path)
                } else {
                    sanitize(&content, &path)
                };

                content = match reconciled {
                    Ok(content) => content,
                    // INVARIANT: Unusable definitions never abort extraction.
                    Err(error @ (JsonError::Parse { .. } | JsonError::Merge { .. })) => {
                        let warning = format!("{plan_name} result: skip {name:?}: {error}");
                        warn!("{warning}");
                        report.warnings.push(warning);
                        continue;
                    }
                    Err(error) => return Err(error.into()),
                };
            }

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|source| WriteError::CreateDir {
                    source,
                    path: parent.to_path_buf(),
                })?;
            }

            fs::write(&path, &content).map_err(|source| WriteError::Write {
                source,
                path: path.clone(),
            })?;

            self.written.insert(path);
            report.entity_paths.insert(file.entity().path().to_string());
        }

        debug!(
            "wrote {} entities from {plan_name} result",
            report.entity_paths.len()
        );

        Ok(report)
    }
}

/// Result writer error types.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Target directory is not usable.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Archive cannot be read.
    #[error("failed to read result archive")]
    Zip(#[from] zip::result::ZipError),

    /// Archive entry or existing definition cannot be read.
    #[error("failed to read {name:?}")]
    Read {
        #[source]
        source: std::io::Error,
        name: String,
    },

    /// Directory of entity file cannot be created.
    #[error("failed to create directory {:?}", path.display())]
    CreateDir {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Entity file cannot be written.
    #[error("failed to write {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Definition cannot be sanitized or reconciled.
    #[error(transparent)]
    Json(#[from] JsonError),
}

/// Friendly result alias :3
type Result<T, E = WriteError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use zip::{write::SimpleFileOptions, ZipWriter};

    fn zip(entries: &[(&str, &str)]) -> anyhow::Result<Vec<u8>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default())?;
            writer.write_all(content.as_bytes())?;
        }

        Ok(writer.finish()?.into_inner())
    }

    #[test]
    fn write_sanitizes_definitions_and_skips_unknown_entries() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let bytes = zip(&[
            ("pages/home.json", r#"{"type":"page", "name":"home"}"#),
            ("pages/home.xml", "<skuidpage/>"),
            ("readme.md", "hello"),
        ])?;

        let mut session = WriteSession::new();
        let report = session.write_results(root.path(), PlanName::Metadata, &bytes)?;

        assert_eq!(report.entity_paths, BTreeSet::from(["pages/home".to_string()]));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("readme.md"));
        assert_eq!(
            fs::read_to_string(root.path().join("pages/home.json"))?,
            r#"{"name":"home","type":"page"}"#
        );
        assert_eq!(
            fs::read_to_string(root.path().join("pages/home.xml"))?,
            "<skuidpage/>"
        );
        assert!(!root.path().join("readme.md").exists());

        Ok(())
    }

    #[test]
    fn second_plan_reconciles_shared_definitions() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let metadata = zip(&[(
            "sitepermissionsets/admin.json",
            r#"{"name":"Admin","b":1,"shared":{"x":1}}"#,
        )])?;
        let data = zip(&[(
            "sitepermissionsets/admin.json",
            r#"{"shared":{"y":2},"a":true,"name":"Admin"}"#,
        )])?;

        let mut session = WriteSession::new();
        session.write_results(root.path(), PlanName::Metadata, &metadata)?;
        session.write_results(root.path(), PlanName::Data, &data)?;

        let result: serde_json::Value =
            serde_json::from_slice(&fs::read(root.path().join("sitepermissionsets/admin.json"))?)?;
        assert_eq!(
            result,
            serde_json::json!({"name": "Admin", "a": true, "b": 1, "shared": {"x": 1, "y": 2}})
        );

        Ok(())
    }

    #[test]
    fn malformed_definitions_are_skipped() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let bytes = zip(&[
            ("apps/bad.json", "{not json"),
            ("apps/good.json", r#"{"name":"good"}"#),
        ])?;

        let report = WriteSession::new().write_results(root.path(), PlanName::Data, &bytes)?;

        assert_eq!(report.entity_paths, BTreeSet::from(["apps/good".to_string()]));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("apps/bad.json"));
        assert!(!root.path().join("apps/bad.json").exists());
        assert_eq!(fs::read_to_string(root.path().join("apps/good.json"))?, r#"{"name":"good"}"#);

        Ok(())
    }

    #[test]
    fn fresh_session_overwrites_stale_definitions() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        fs::create_dir_all(root.path().join("apps"))?;
        fs::write(root.path().join("apps/a.json"), r#"{"name":"a","stale":true}"#)?;

        let bytes = zip(&[("apps/a.json", r#"{"name":"a"}"#)])?;
        WriteSession::new().write_results(root.path(), PlanName::Metadata, &bytes)?;

        assert_eq!(fs::read_to_string(root.path().join("apps/a.json"))?, r#"{"name":"a"}"#);

        Ok(())
    }

    #[test]
    fn relative_target_is_rejected() -> anyhow::Result<()> {
        let bytes = zip(&[("apps/a.json", "{}")])?;
        let result = WriteSession::new().write_results("rel/path", PlanName::Metadata, &bytes);

        assert!(matches!(
            result,
            Err(WriteError::Path(PathError::NotAbsolute { .. }))
        ));

        Ok(())
    }
}
