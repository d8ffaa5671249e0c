// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Crate-level error type.
//!
//! Every module owns its own error enum. Coordinators surface them through
//! [`Error`] so callers can tell apart the kind of failure without digging
//! through the error chain.

use crate::{
    archive::{ArchiveError, ValidationError},
    json::JsonError,
    metadata::ParseError,
    path::PathError,
    plan::PlanError,
    request::RequestError,
    unzip::WriteError,
};

/// Sync error kinds.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Entity path cannot be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Archive cannot be built.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// Plan is missing or malformed.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// Archived entities do not match expected entities.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Remote site request failed.
    #[error(transparent)]
    Request(#[from] RequestError),

    /// Target directory is unusable, or cannot be cleared.
    #[error(transparent)]
    Io(#[from] PathError),

    /// Response or definition is not usable JSON.
    #[error(transparent)]
    Json(#[from] JsonError),

    /// Retrieval results cannot be written.
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Friendly result alias :3
pub type Result<T, E = Error> = std::result::Result<T, E>;
