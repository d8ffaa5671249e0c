// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deploy coordinator.
//!
//! Push the metadata of a site directory to a site. A deployment first sends
//! an archive of the whole site directory to the metadata service, which
//! answers with plans listing only the entities that actually need to be
//! deployed. Each plan is then executed with an archive narrowed down to its
//! own entities.
//!
//! # Order
//!
//! Steps always run in the following order, and never overlap:
//!
//! 1. Request deployment plans.
//! 2. Execute metadata plan.
//! 3. Execute data plan, if any.
//! 4. Forward permission sets the metadata plan inserted or updated to the
//!    data service.
//! 5. Ask the metadata service to sync its data sources.
//!
//! The data plan depends on the permission sets the metadata plan produced.
//! Any failure aborts the remaining steps. Nothing is rolled back, so a failed
//! deployment may leave the site partially deployed.

use crate::{
    archive::{archive, AllFiles, Archive, MetadataFilter},
    error::Result,
    metadata::{parse_entity_path, MetadataType},
    path::validate_target_dir,
    plan::{
        generate_plan_headers, metadata_route, request_plans, validate_deploy_plan,
        PermissionSetResult, Plan, PlanError, PlanMode, PlanName, DEPLOY_PLAN_ENDPOINT,
        DEPLOY_SYNC_ENDPOINT, UPDATE_PERMISSION_SETS_ENDPOINT,
    },
    request::{
        AuthContext, Headers, Method, Requester, APPLICATION_JSON, APPLICATION_ZIP, CONTENT_TYPE,
    },
};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};
use tracing::{debug, info, instrument, warn};

/// Narrow down what a deployment pushes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeployFilter {
    pub app_name: Option<String>,
    pub ignore_skuid_db: bool,
}

impl DeployFilter {
    /// Does filter narrow down anything at all?
    pub fn is_empty(&self) -> bool {
        self.app_name.is_none() && !self.ignore_skuid_db
    }
}

/// Options of a deployment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeployOptions {
    /// Absolute path of site directory to deploy from.
    pub source_dir: PathBuf,

    pub filter: DeployFilter,

    /// Deploy only these entity paths, e.g., `pages/my_page`.
    pub entities: Option<Vec<String>>,
}

/// Outcome of a successful deployment.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    /// Entity paths covered by the deployment plans.
    pub entity_paths: BTreeSet<String>,

    /// Result checks of every executed plan.
    pub validators: Vec<DeploymentValidator>,

    /// Everything worth telling the user that did not stop the deployment.
    pub warnings: Vec<String>,
}

impl DeployOutcome {
    fn warn(&mut self, warning: impl Into<String>) {
        let warning = warning.into();
        warn!("{warning}");
        self.warnings.push(warning);
    }
}

/// Changes a metadata deployment reports for one metadata type.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeployChanges {
    #[serde(default)]
    pub inserts: Option<Vec<Value>>,

    #[serde(default)]
    pub updates: Option<Vec<Value>>,

    #[serde(default)]
    pub deletes: Option<Vec<Value>>,
}

impl DeployChanges {
    /// Inserted records followed by updated records.
    pub fn upserts(&self) -> impl Iterator<Item = &Value> {
        self.inserts
            .iter()
            .flatten()
            .chain(self.updates.iter().flatten())
    }
}

/// Response of a metadata plan execution, keyed by metadata type directory.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct MetadataDeployResult(pub BTreeMap<String, DeployChanges>);

impl MetadataDeployResult {
    /// Decode response of metadata plan execution.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::Decode`] if response is not a deployment result.
    pub fn from_response(bytes: &[u8], route: &str) -> Result<Self, PlanError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }

        serde_json::from_slice(bytes).map_err(|source| PlanError::Decode {
            source,
            route: route.to_string(),
        })
    }

    /// Changes reported for a metadata type.
    pub fn changes(&self, metadata_type: MetadataType) -> Option<&DeployChanges> {
        self.0.get(metadata_type.dir_name())
    }

    /// Entity paths of every inserted or updated record.
    pub fn upserted_entity_paths(&self) -> BTreeSet<String> {
        self.0
            .iter()
            .filter(|(dir_name, _)| MetadataType::from_dir_name(dir_name).is_some())
            .flat_map(|(dir_name, changes)| {
                changes
                    .upserts()
                    .filter_map(|record| record.get("name").and_then(Value::as_str))
                    .map(move |name| format!("{dir_name}/{name}"))
            })
            .collect()
    }

    /// Inserted then updated permission sets.
    ///
    /// # Errors
    ///
    /// - Return [`PlanError::Decode`] if a record is not a permission set.
    pub fn permission_sets(&self, route: &str) -> Result<Vec<PermissionSetResult>, PlanError> {
        let Some(changes) = self.changes(MetadataType::PermissionSets) else {
            return Ok(Vec::new());
        };

        changes
            .upserts()
            .map(|record| {
                serde_json::from_value(record.clone()).map_err(|source| PlanError::Decode {
                    source,
                    route: route.to_string(),
                })
            })
            .collect()
    }
}

/// Check of one executed plan's result.
///
/// Deployment responses are known to under-report what was actually
/// deployed, so mismatches only ever produce warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentValidator {
    pub plan_name: PlanName,

    /// Entity paths the plan covered.
    pub expected: BTreeSet<String>,

    /// Entity paths the response reported, if the response reports any.
    pub reported: Option<BTreeSet<String>>,
}

impl DeploymentValidator {
    /// Warnings about every mismatch between expected and reported entities.
    pub fn warnings(&self) -> Vec<String> {
        let Some(reported) = &self.reported else {
            return Vec::new();
        };

        let missing = self
            .expected
            .difference(reported)
            .map(|path| format!("{} plan did not report deploying {path:?}", self.plan_name));
        let unexpected = reported
            .difference(&self.expected)
            .map(|path| format!("{} plan reported unplanned {path:?}", self.plan_name));

        missing.chain(unexpected).collect()
    }
}

/// Deploy site directory to site.
///
/// # Errors
///
/// - Return [`Error::Io`](crate::Error::Io) if source directory is not
///   usable.
/// - Return [`Error::Parse`](crate::Error::Parse) if a requested entity path
///   is invalid.
/// - Return [`Error::Archive`](crate::Error::Archive) if an archive cannot be
///   built.
/// - Return [`Error::Validation`](crate::Error::Validation) if requested
///   entities are missing from the site directory.
/// - Return [`Error::Plan`](crate::Error::Plan) if plans or responses are
///   malformed.
/// - Return [`Error::Request`](crate::Error::Request) if any request fails.
#[instrument(skip(requester, auth), level = "debug")]
pub async fn deploy(
    requester: &dyn Requester,
    auth: &AuthContext,
    options: &DeployOptions,
) -> Result<DeployOutcome> {
    let source_dir = validate_target_dir(&options.source_dir)?;
    let mut outcome = DeployOutcome::default();

    let expected = match &options.entities {
        Some(entities) => Some(
            entities
                .iter()
                .map(|path| parse_entity_path(path).map(|entity| entity.path().to_string()))
                .collect::<Result<BTreeSet<_>, _>>()?,
        ),
        None => None,
    };

    info!("archive {:?}", source_dir.display());
    let full = match &expected {
        Some(expected) => {
            archive(&source_dir, MetadataFilter::from_entity_paths(expected.iter().cloned())).await?
        }
        None => archive(&source_dir, AllFiles).await?,
    };
    full.validate(expected.as_ref())?;

    info!("request deployment plans");
    let (body, content_type) = deploy_plan_body(&full, &options.filter)?;
    let mut headers = generate_plan_headers(auth, PlanName::Metadata, "");
    headers.insert(CONTENT_TYPE.into(), content_type.into());
    let route = metadata_route(auth, DEPLOY_PLAN_ENDPOINT);
    let plans = request_plans(requester, &route, &headers, body, PlanMode::Deploy).await?;

    for warning in plans.warnings() {
        outcome.warn(warning);
    }
    for warning in validate_deploy_plan(&full.entity_paths(), &plans) {
        outcome.warnings.push(warning);
    }
    outcome.entity_paths = plans.all_entity_paths.clone();

    let metadata_plan = &plans.metadata_service_plan;
    let metadata_plan_route = metadata_plan.route(auth);
    let metadata_result = match execute_plan(requester, auth, &source_dir, metadata_plan, &mut outcome).await? {
        Some(response) => MetadataDeployResult::from_response(&response, &metadata_plan_route)?,
        None => MetadataDeployResult::default(),
    };
    if !metadata_plan.entity_paths.is_empty() {
        outcome.validators.push(DeploymentValidator {
            plan_name: PlanName::Metadata,
            expected: metadata_plan.entity_paths.clone(),
            reported: Some(metadata_result.upserted_entity_paths()),
        });
    }

    if let Some(data_plan) = &plans.cloud_data_service_plan {
        let mut data_plan = data_plan.clone();
        let permission_sets = metadata_result.permission_sets(&metadata_plan_route)?;
        debug!("forward {} permission sets to data plan", permission_sets.len());
        data_plan.all_permission_sets = Some(permission_sets);

        if execute_plan(requester, auth, &source_dir, &data_plan, &mut outcome)
            .await?
            .is_some()
        {
            outcome.validators.push(DeploymentValidator {
                plan_name: PlanName::Data,
                expected: data_plan.entity_paths.clone(),
                reported: None,
            });
        }

        let permission_sets = data_plan.all_permission_sets.take().unwrap_or_default();
        if !permission_sets.is_empty() {
            info!("update {} permission sets", permission_sets.len());
            let body = serde_json::to_vec(&permission_sets).map_err(PlanError::Encode)?;
            let mut headers = data_plan.headers(auth);
            headers.insert(CONTENT_TYPE.into(), APPLICATION_JSON.into());
            requester
                .request(
                    &data_plan.sibling_route(auth, UPDATE_PERMISSION_SETS_ENDPOINT),
                    Method::POST,
                    body,
                    &headers,
                )
                .await?;
        }

        info!("sync data sources");
        requester
            .request(
                &metadata_plan.sibling_route(auth, DEPLOY_SYNC_ENDPOINT),
                Method::POST,
                Vec::new(),
                &metadata_plan.headers(auth),
            )
            .await?;
    }

    let validator_warnings = outcome
        .validators
        .iter()
        .flat_map(DeploymentValidator::warnings)
        .collect::<Vec<_>>();
    for warning in validator_warnings {
        outcome.warn(warning);
    }

    Ok(outcome)
}

fn deploy_plan_body(full: &Archive, filter: &DeployFilter) -> Result<(Vec<u8>, &'static str)> {
    if filter.is_empty() {
        return Ok((full.bytes().to_vec(), APPLICATION_ZIP));
    }

    let body = DeployPlanRequest {
        app_name: filter.app_name.as_deref(),
        plan: STANDARD.encode(full.bytes()),
        ignore_skuid_db: filter.ignore_skuid_db,
    };
    let body = serde_json::to_vec(&body).map_err(PlanError::Encode)?;

    Ok((body, APPLICATION_JSON))
}

/// Execute plan with an archive of its own entities.
///
/// Return `None` if plan covers no entity, and thus was skipped.
async fn execute_plan(
    requester: &dyn Requester,
    auth: &AuthContext,
    source_dir: &Path,
    plan: &Plan,
    outcome: &mut DeployOutcome,
) -> Result<Option<Vec<u8>>> {
    if plan.entity_paths.is_empty() {
        debug!("skip empty {} plan", plan.name);
        return Ok(None);
    }

    info!("execute {} plan", plan.name);
    let archived = archive(source_dir, MetadataFilter::from_metadata(&plan.metadata)).await?;
    if let Err(error) = archived.validate(Some(&plan.entity_paths)) {
        outcome.warn(format!("{} plan: {error}", plan.name));
    }

    let mut headers: Headers = plan.headers(auth);
    headers.insert(CONTENT_TYPE.into(), APPLICATION_ZIP.into());
    let response = requester
        .request(&plan.route(auth), Method::POST, archived.into_bytes(), &headers)
        .await?;

    Ok(Some(response))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeployPlanRequest<'a> {
    app_name: Option<&'a str>,
    plan: String,
    ignore_skuid_db: bool,
}
