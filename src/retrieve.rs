// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Retrieve coordinator.
//!
//! Pull the metadata of a site into a site directory. A retrieval runs through
//! the following phases, in order, without ever resuming halfway:
//!
//! 1. Request plans from the metadata service.
//! 2. Execute every plan, metadata first, then data.
//! 3. Clear every metadata type directory, unless asked not to.
//! 4. Write the results of every plan in the same order they were executed.
//!
//! Writing in a fixed order matters. When both plans return the definition of
//! the same entity, the data result is patched onto the metadata result.

use crate::{
    error::Result,
    path::{clear_directories, validate_target_dir},
    plan::{
        generate_plan_headers, metadata_route, new_retrieval_request_body, request_plans,
        PlanError, PlanMode, PlanName, RETRIEVE_PLAN_ENDPOINT,
    },
    request::{AuthContext, Headers, Method, Requester, APPLICATION_JSON, CONTENT_TYPE},
    unzip::WriteSession,
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::{collections::BTreeSet, path::PathBuf};
use tracing::{debug, info, instrument, warn};

/// Narrow down what a retrieval pulls.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub ignore_skuid_db: bool,

    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_since"
    )]
    pub since: Option<DateTime<Utc>>,
}

impl RetrieveFilter {
    /// Does filter narrow down anything at all?
    pub fn is_empty(&self) -> bool {
        self.app_name.is_none() && !self.ignore_skuid_db && self.since.is_none()
    }
}

/// Options of a retrieval.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetrieveOptions {
    /// Absolute path of site directory to write into.
    pub target_dir: PathBuf,

    pub filter: RetrieveFilter,

    /// Keep existing metadata type directories.
    pub no_clean: bool,
}

/// Outcome of a successful retrieval.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RetrieveOutcome {
    /// Entity paths written to disk.
    pub entity_paths: BTreeSet<String>,

    /// Everything worth telling the user that did not stop the retrieval.
    pub warnings: Vec<String>,
}

impl RetrieveOutcome {
    fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        warn!("{warning}");
        self.warnings.push(warning);
    }
}

/// Retrieve site metadata into site directory.
///
/// Target directory is validated before any request is sent.
///
/// # Errors
///
/// - Return [`Error::Io`](crate::Error::Io) if target directory is not
///   usable, or cannot be cleared.
/// - Return [`Error::Plan`](crate::Error::Plan) if plans are missing or
///   malformed.
/// - Return [`Error::Request`](crate::Error::Request) if any request fails.
/// - Return [`Error::Write`](crate::Error::Write) if results cannot be
///   written.
#[instrument(skip(requester, auth), level = "debug")]
pub async fn retrieve(
    requester: &dyn Requester,
    auth: &AuthContext,
    options: &RetrieveOptions,
) -> Result<RetrieveOutcome> {
    let target_dir = validate_target_dir(&options.target_dir)?;
    let mut outcome = RetrieveOutcome::default();

    let headers = json_headers(auth, PlanName::Metadata, "");
    let body = if options.filter.is_empty() {
        Vec::new()
    } else {
        serde_json::to_vec(&options.filter).map_err(PlanError::Encode)?
    };

    info!("request retrieval plans");
    let route = metadata_route(auth, RETRIEVE_PLAN_ENDPOINT);
    let plans = request_plans(requester, &route, &headers, body, PlanMode::Retrieve).await?;
    for warning in plans.warnings() {
        outcome.warn(warning);
    }

    let mut results = Vec::new();
    for plan in plans.plans() {
        if let (Some(requested), Some(echoed)) = (options.filter.since, plan.since) {
            if requested != echoed {
                outcome.warn(format!(
                    "{} plan answered with since {} instead of {}",
                    plan.name,
                    echoed.to_rfc3339_opts(SecondsFormat::Secs, true),
                    requested.to_rfc3339_opts(SecondsFormat::Secs, true),
                ));
            }
        }

        info!("execute {} plan", plan.name);
        debug!("{} plan lists {} entities", plan.name, plan.entity_paths.len());
        let body = new_retrieval_request_body(&plan.metadata, plan.since, plan.app_specific)?;
        let headers = json_headers(auth, plan.name, &plan.host);
        let result = requester
            .request(&plan.route(auth), Method::POST, body, &headers)
            .await?;
        results.push((plan.name, result));
    }

    if !options.no_clean {
        info!("clear metadata directories of {:?}", target_dir.display());
        clear_directories(&target_dir).await?;
    }

    let mut session = WriteSession::new();
    for (plan_name, result) in results {
        info!("write {plan_name} results");
        let report = session.write_results(&target_dir, plan_name, &result)?;
        outcome.entity_paths.extend(report.entity_paths);
        outcome.warnings.extend(report.warnings);
    }

    if outcome.entity_paths.is_empty() {
        outcome.warn("no entities were retrieved");
    }

    Ok(outcome)
}

fn json_headers(auth: &AuthContext, plan_name: PlanName, host: &str) -> Headers {
    let mut headers = generate_plan_headers(auth, plan_name, host);
    headers.insert(CONTENT_TYPE.into(), APPLICATION_JSON.into());
    headers
}

fn serialize_since<S: serde::Serializer>(
    since: &Option<DateTime<Utc>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match since {
        Some(since) => serializer.serialize_str(&since.to_rfc3339_opts(SecondsFormat::Secs, true)),
        None => serializer.serialize_none(),
    }
}
