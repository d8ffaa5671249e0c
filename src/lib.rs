// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep a site directory in sync with the metadata of a remote site.
//!
//! A site's metadata is split up into typed __entities__, e.g., pages, apps,
//! or permission sets. Every entity lives in the directory of its metadata
//! type inside a site directory, and owns one or more files there.
//!
//! # Planes
//!
//! Sites are served by two backends. The __metadata plane__ lives on the
//! site's own host. The __data plane__ is a separate backend that owns data
//! sources and shares permission sets with the metadata plane. Neither plane
//! is addressed directly. Every [`retrieve`] or [`deploy`] starts by asking
//! the metadata plane for __plans__, which tell what to fetch or push and
//! where to do it.

pub mod archive;
pub mod config;
pub mod deploy;
pub mod error;
pub mod json;
pub mod metadata;
pub mod path;
pub mod plan;
pub mod request;
pub mod retrieve;
pub mod unzip;

pub use deploy::{deploy, DeployFilter, DeployOptions, DeployOutcome};
pub use error::{Error, Result};
pub use request::{AuthContext, HttpRequester, Requester};
pub use retrieve::{retrieve, RetrieveFilter, RetrieveOptions, RetrieveOutcome};
