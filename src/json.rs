// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Entity definition reconciliation.
//!
//! Both backends of a site may hand back a definition for the same entity,
//! e.g., a site permission set is owned partly by the metadata service and
//! partly by the data service. Definitions are reconciled through a JSON merge
//! patch where the newer document is patched onto the older one. Keys are then
//! re-sorted so that `name` always comes first at every level of nesting, with
//! the rest in lexicographic order. This keeps definition files stable across
//! retrievals regardless of which backend produced them.
//!
//! # See Also
//!
//! - [RFC 7386 - JSON Merge Patch](https://www.rfc-editor.org/rfc/rfc7386)

use serde::Serialize;
use serde_json::{ser::PrettyFormatter, Map, Serializer, Value};
use std::{
    cmp::Ordering,
    io::Read,
    path::{Path, PathBuf},
};

const NAME_KEY: &str = "name";

/// Merge new definition onto existing definition.
///
/// The existing definition may be empty, in which case the result is just the
/// new definition sorted. Result is pretty-printed with tab indentation.
///
/// # Errors
///
/// - Return [`JsonError::Read`] if existing definition cannot be read.
/// - Return [`JsonError::Parse`] if either definition is not valid JSON.
/// - Return [`JsonError::Merge`] if either definition is not a JSON object.
pub fn combine_json(
    new: &[u8],
    mut existing: impl Read,
    path: impl AsRef<Path>,
) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let mut existing_bytes = Vec::new();
    existing
        .read_to_end(&mut existing_bytes)
        .map_err(|source| JsonError::Read {
            source,
            path: path.to_path_buf(),
        })?;

    let mut target = if existing_bytes.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Map::new())
    } else {
        parse_object(&existing_bytes, path)?
    };
    let patch = parse_object(new, path)?;

    merge_patch(&mut target, patch);
    to_pretty_bytes(&sort_name_first(target), path)
}

/// Parse definition, sort keys with `name` first, and re-emit it compact.
///
/// # Errors
///
/// - Return [`JsonError::Parse`] if definition is not valid JSON.
pub fn sanitize(bytes: &[u8], path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let value: Value = serde_json::from_slice(bytes).map_err(|source| JsonError::Parse {
        source,
        path: path.to_path_buf(),
    })?;

    serde_json::to_vec(&sort_name_first(value)).map_err(|source| JsonError::Serialize {
        source,
        path: path.to_path_buf(),
    })
}

/// Apply JSON merge patch onto target document.
///
/// Keys present in patch replace keys in target, objects merge recursively,
/// null values delete keys, and arrays are replaced wholesale.
pub fn merge_patch(target: &mut Value, patch: Value) {
    let Value::Object(patch) = patch else {
        *target = patch;
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }

    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(&key);
            } else {
                merge_patch(map.entry(key).or_insert(Value::Null), value);
            }
        }
    }
}

/// Sort object keys with `name` first at every level of nesting.
pub fn sort_name_first(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map
                .into_iter()
                .map(|(key, value)| (key, sort_name_first(value)))
                .collect::<Vec<_>>();
            entries.sort_by(|(left, _), (right, _)| compare_keys(left, right));
            Value::Object(entries.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_name_first).collect()),
        other => other,
    }
}

/// Serialize JSON value with tab indentation.
///
/// # Errors
///
/// - Return [`JsonError::Serialize`] if value cannot be serialized.
pub fn to_pretty_bytes(value: &Value, path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(b"\t"));
    value
        .serialize(&mut serializer)
        .map_err(|source| JsonError::Serialize {
            source,
            path: path.as_ref().to_path_buf(),
        })?;

    Ok(out)
}

fn compare_keys(left: &str, right: &str) -> Ordering {
    match (left == NAME_KEY, right == NAME_KEY) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => left.cmp(right),
    }
}

fn parse_object(bytes: &[u8], path: &Path) -> Result<Value> {
    let value: Value = serde_json::from_slice(bytes).map_err(|source| JsonError::Parse {
        source,
        path: path.to_path_buf(),
    })?;

    if !value.is_object() {
        return Err(JsonError::Merge {
            path: path.to_path_buf(),
            reason: "definition is not a JSON object".into(),
        });
    }

    Ok(value)
}

/// Definition reconciliation error types.
#[derive(Debug, thiserror::Error)]
pub enum JsonError {
    /// Existing definition cannot be read.
    #[error("failed to read definition {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Definition is not valid JSON.
    #[error("failed to parse definition {:?}", path.display())]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },

    /// Definitions cannot be merged.
    #[error("failed to merge definition {:?}: {reason}", path.display())]
    Merge { path: PathBuf, reason: String },

    /// Definition cannot be serialized.
    #[error("failed to serialize definition {:?}", path.display())]
    Serialize {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
type Result<T, E = JsonError> = std::result::Result<T, E>;
