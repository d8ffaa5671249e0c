// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Plan protocol.
//!
//! Every retrieval and deployment starts by asking the metadata service for a
//! __plan__. The server answers with up to two plans: one for the metadata
//! service itself, and an optional one for the cloud data service. Each plan
//! lists the entities it covers per metadata type, and names the endpoint the
//! plan must be executed against.
//!
//! # Planes
//!
//! The metadata service lives on the site host and accepts the short lived
//! access token. The data service is addressed by the host and port returned
//! in its plan, and accepts the long lived bearer token together with a header
//! pointing to the site's public key endpoint. A plan with an empty host
//! belongs to the metadata service.

use crate::{
    metadata::MetadataType,
    request::{AuthContext, Headers, Method, Requester, AUTHORIZATION, PUBLIC_KEY_ENDPOINT},
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{
    de::{self, Deserializer},
    ser::{SerializeMap, Serializer},
    Deserialize, Serialize,
};
use serde_json::{Map, Value};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, instrument, warn};

pub const API_PREFIX: &str = "/api/v2";
pub const RETRIEVE_PLAN_ENDPOINT: &str = "/metadata/retrieve/plan";
pub const DEPLOY_PLAN_ENDPOINT: &str = "/metadata/deploy/plan";
pub const UPDATE_PERMISSION_SETS_ENDPOINT: &str = "/metadata/update-permissionsets";
pub const DEPLOY_SYNC_ENDPOINT: &str = "/metadata/deploy/sync";
const VERIFICATION_KEY_ENDPOINT: &str = "/api/v1/site/verificationkey";

/// Names of timezones that carry a zero offset.
const ZERO_OFFSET_ZONES: &[&str] = &["UTC", "GMT", "UT", "Etc/UTC", "Etc/GMT", "Etc/UCT", "UCT", "Zulu"];

/// Backend a plan belongs to.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PlanName {
    #[default]
    Metadata,
    Data,
}

impl Display for PlanName {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Metadata => "metadata",
            Self::Data => "data",
        })
    }
}

/// Operation a plan was issued for.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlanMode {
    #[default]
    Retrieve,
    Deploy,
}

impl Display for PlanMode {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(match self {
            Self::Retrieve => "retrieve",
            Self::Deploy => "deploy",
        })
    }
}

/// Entity listing of a plan per metadata type.
///
/// Each listing holds relative entity paths inside the type directory, e.g.,
/// `my_page` for `pages/my_page`. Serialized as an object keyed by the
/// directory name of every metadata type.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NlxMetadata {
    entries: BTreeMap<MetadataType, Vec<String>>,
}

impl NlxMetadata {
    /// Listing of a metadata type.
    pub fn get(&self, metadata_type: MetadataType) -> &[String] {
        self.entries
            .get(&metadata_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Append relative entity path to listing of a metadata type.
    pub fn push(&mut self, metadata_type: MetadataType, path_relative: impl Into<String>) {
        self.entries
            .entry(metadata_type)
            .or_default()
            .push(path_relative.into());
    }

    /// Iterate over every non-empty listing.
    pub fn iter(&self) -> impl Iterator<Item = (MetadataType, &[String])> {
        self.entries
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(metadata_type, values)| (*metadata_type, values.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Join every listed value with the directory of its type.
    pub fn entity_paths(&self) -> BTreeSet<String> {
        self.iter()
            .flat_map(|(metadata_type, values)| {
                values
                    .iter()
                    .map(move |value| format!("{}/{}", metadata_type.dir_name(), value))
            })
            .collect()
    }
}

impl FromIterator<(MetadataType, String)> for NlxMetadata {
    fn from_iter<I: IntoIterator<Item = (MetadataType, String)>>(iter: I) -> Self {
        let mut metadata = Self::default();
        for (metadata_type, value) in iter {
            metadata.push(metadata_type, value);
        }
        metadata
    }
}

impl Serialize for NlxMetadata {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(MetadataType::ALL.len()))?;
        for metadata_type in MetadataType::ALL {
            map.serialize_entry(metadata_type.dir_name(), self.get(metadata_type))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for NlxMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, Option<Vec<String>>>::deserialize(deserializer)?;
        let mut metadata = Self::default();
        for (dir_name, values) in raw {
            // INVARIANT: Unknown listings are tolerated so newer servers stay compatible.
            let Some(metadata_type) = MetadataType::from_dir_name(&dir_name) else {
                debug!("ignore unknown metadata listing {dir_name:?}");
                continue;
            };
            for value in values.unwrap_or_default() {
                metadata.push(metadata_type, value);
            }
        }
        Ok(metadata)
    }
}

/// Permission set record reported by a metadata deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSetResult {
    pub name: String,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Plan for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub name: PlanName,
    pub mode: PlanMode,
    pub host: String,
    pub port: Option<String>,
    pub endpoint: String,
    pub plan_type: String,
    pub metadata: NlxMetadata,
    pub since: Option<DateTime<Utc>>,
    pub app_specific: bool,
    pub warnings: Vec<String>,
    pub all_permission_sets: Option<Vec<PermissionSetResult>>,
    pub entity_paths: BTreeSet<String>,
}

impl Plan {
    fn from_raw(raw: RawPlan, name: PlanName, mode: PlanMode) -> Result<Self> {
        let since = raw.since.as_deref().map(parse_since).transpose()?;
        let entity_paths = compute_entity_paths(name, mode, &raw.metadata)?;

        Ok(Self {
            name,
            mode,
            host: raw.host.unwrap_or_default(),
            port: raw.port.map(PortValue::into_string),
            endpoint: raw.endpoint,
            plan_type: raw.plan_type.unwrap_or_default(),
            metadata: raw.metadata,
            since,
            app_specific: raw.app_specific,
            warnings: raw.warnings.unwrap_or_default(),
            all_permission_sets: None,
            entity_paths,
        })
    }

    /// Headers to execute plan with.
    pub fn headers(&self, auth: &AuthContext) -> Headers {
        generate_plan_headers(auth, self.name, &self.host)
    }

    /// Route to execute plan against.
    pub fn route(&self, auth: &AuthContext) -> String {
        generate_plan_route(auth, self.name, &self.host, self.port.as_deref(), &self.endpoint)
    }

    /// Route of another endpoint on the same backend as this plan.
    pub fn sibling_route(&self, auth: &AuthContext, endpoint: &str) -> String {
        generate_plan_route(auth, self.name, &self.host, self.port.as_deref(), endpoint)
    }
}

/// Plans issued for one retrieval or deployment.
#[derive(Debug, Clone, PartialEq)]
pub struct Plans {
    pub metadata_service_plan: Plan,
    pub cloud_data_service_plan: Option<Plan>,
    pub all_entity_paths: BTreeSet<String>,
}

impl Plans {
    /// Every plan in execution order: metadata first, then data.
    pub fn plans(&self) -> Vec<&Plan> {
        std::iter::once(&self.metadata_service_plan)
            .chain(self.cloud_data_service_plan.as_ref())
            .collect()
    }

    /// Every server-issued warning across plans.
    pub fn warnings(&self) -> Vec<String> {
        self.plans()
            .into_iter()
            .flat_map(|plan| {
                plan.warnings
                    .iter()
                    .map(move |warning| format!("{} plan: {warning}", plan.name))
            })
            .collect()
    }
}

/// Request plans from metadata service.
///
/// # Errors
///
/// - Return [`Error::Request`](crate::Error::Request) if request fails.
/// - Return [`Error::Plan`](crate::Error::Plan) if response is not a usable
///   plan envelope, see [`decode_plans`].
#[instrument(skip(requester, headers, body), level = "debug")]
pub async fn request_plans(
    requester: &dyn Requester,
    route: &str,
    headers: &Headers,
    body: Vec<u8>,
    mode: PlanMode,
) -> crate::Result<Plans> {
    let response = requester
        .request(route, Method::POST, body, headers)
        .await?;

    Ok(decode_plans(&response, route, mode)?)
}

/// Decode plan envelope answered by route.
///
/// # Errors
///
/// - Return [`PlanError::Decode`] if response is not a plan envelope.
/// - Return [`PlanError::UnexpectedPlan`] if metadata plan is missing.
/// - Return [`PlanError::UnexpectedTimezone`] or [`PlanError::InvalidSince`]
///   if a plan carries an unusable `since` value.
/// - Return [`PlanError::MalformedListing`] if a data plan lists a site
///   permission set that cannot be interpreted.
pub fn decode_plans(response: &[u8], route: &str, mode: PlanMode) -> Result<Plans> {
    let envelope: PlansEnvelope =
        serde_json::from_slice(response).map_err(|source| PlanError::Decode {
            source,
            route: route.to_string(),
        })?;

    let metadata = envelope
        .skuid_metadata_service
        .ok_or_else(|| PlanError::UnexpectedPlan {
            reason: "response does not contain a metadata service plan".into(),
        })?;
    let metadata_service_plan = Plan::from_raw(metadata, PlanName::Metadata, mode)?;
    let cloud_data_service_plan = envelope
        .skuid_cloud_data_service
        .map(|raw| Plan::from_raw(raw, PlanName::Data, mode))
        .transpose()?;

    let all_entity_paths = std::iter::once(&metadata_service_plan)
        .chain(cloud_data_service_plan.as_ref())
        .flat_map(|plan| plan.entity_paths.iter().cloned())
        .collect::<BTreeSet<_>>();

    debug!(
        "received {mode} plans: metadata ({} entities), data ({})",
        metadata_service_plan.entity_paths.len(),
        cloud_data_service_plan
            .as_ref()
            .map(|plan| format!("{} entities", plan.entity_paths.len()))
            .unwrap_or_else(|| "none".into())
    );

    Ok(Plans {
        metadata_service_plan,
        cloud_data_service_plan,
        all_entity_paths,
    })
}

/// Generate headers for a plan.
///
/// Metadata plans authenticate with the access token. Data plans, i.e.,
/// plans with a non-empty host, authenticate with the bearer token and name
/// the site's public key endpoint.
pub fn generate_plan_headers(auth: &AuthContext, plan_name: PlanName, host: &str) -> Headers {
    let mut headers = Headers::new();
    if host.is_empty() {
        debug!("{plan_name} plan targets metadata service");
        headers.insert(
            AUTHORIZATION.into(),
            format!("Bearer {}", auth.access_token),
        );
    } else {
        debug!("{plan_name} plan targets data service at {host}");
        headers.insert(
            AUTHORIZATION.into(),
            format!("Bearer {}", auth.bearer_token),
        );
        headers.insert(
            PUBLIC_KEY_ENDPOINT.into(),
            format!("{}{VERIFICATION_KEY_ENDPOINT}", base_url(&auth.host)),
        );
    }

    headers
}

/// Generate route for a plan endpoint.
///
/// Metadata plans resolve against the site host, data plans against their own
/// host and optional port.
pub fn generate_plan_route(
    auth: &AuthContext,
    plan_name: PlanName,
    host: &str,
    port: Option<&str>,
    endpoint: &str,
) -> String {
    if host.is_empty() {
        return metadata_route(auth, endpoint);
    }

    debug!("route {plan_name} plan to {host}");
    match port.filter(|port| !port.is_empty()) {
        Some(port) => format!("{}:{port}{API_PREFIX}{endpoint}", base_url(host)),
        None => format!("{}{API_PREFIX}{endpoint}", base_url(host)),
    }
}

/// Route of an endpoint on the metadata service.
pub fn metadata_route(auth: &AuthContext, endpoint: &str) -> String {
    format!("{}{API_PREFIX}{endpoint}", base_url(&auth.host))
}

/// Serialize body to execute a retrieval plan with.
///
/// # Errors
///
/// - Return [`PlanError::Encode`] if body cannot be serialized.
pub fn new_retrieval_request_body(
    metadata: &NlxMetadata,
    since: Option<DateTime<Utc>>,
    app_specific: bool,
) -> Result<Vec<u8>> {
    let body = RetrievalRequestBody {
        metadata,
        since: since.map(|since| since.to_rfc3339_opts(SecondsFormat::Secs, true)),
        app_specific,
    };

    serde_json::to_vec(&body).map_err(PlanError::Encode)
}

/// Compare archived entities against entities the metadata plan expects.
///
/// Server may legitimately narrow a deployment, e.g., by app, so mismatches
/// only produce warnings.
pub fn validate_deploy_plan(archived: &BTreeSet<String>, plans: &Plans) -> Vec<String> {
    let planned = &plans.metadata_service_plan.entity_paths;
    let mut warnings = Vec::new();

    for path in archived.difference(planned) {
        warnings.push(format!("entity {path:?} was archived but is not part of the metadata plan"));
    }

    for path in planned.difference(archived) {
        warnings.push(format!("entity {path:?} is part of the metadata plan but was not archived"));
    }

    for warning in &warnings {
        warn!("{warning}");
    }

    warnings
}

fn base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

fn compute_entity_paths(
    name: PlanName,
    mode: PlanMode,
    metadata: &NlxMetadata,
) -> Result<BTreeSet<String>> {
    let mut paths = BTreeSet::new();
    for (metadata_type, values) in metadata.iter() {
        for value in values {
            // INVARIANT: Data service lists retrieved site permission sets as JSON documents.
            let relative = if name == PlanName::Data
                && mode == PlanMode::Retrieve
                && metadata_type == MetadataType::SitePermissionSets
            {
                serde_json::from_str::<SitePermissionSetListing>(value)
                    .map_err(|source| PlanError::MalformedListing {
                        source,
                        metadata_type,
                        value: value.clone(),
                    })?
                    .name
            } else {
                value.clone()
            };

            paths.insert(format!("{}/{relative}", metadata_type.dir_name()));
        }
    }

    Ok(paths)
}

fn parse_since(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(since) = DateTime::parse_from_rfc3339(raw) {
        return Ok(since.with_timezone(&Utc));
    }

    if let Some((_, zone)) = raw.trim().rsplit_once(' ') {
        if ZERO_OFFSET_ZONES.contains(&zone) {
            return Err(PlanError::UnexpectedTimezone {
                since: raw.to_string(),
                zone: zone.to_string(),
            });
        }
    }

    Err(PlanError::InvalidSince {
        since: raw.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlansEnvelope {
    skuid_metadata_service: Option<RawPlan>,
    skuid_cloud_data_service: Option<RawPlan>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPlan {
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<PortValue>,
    endpoint: String,
    #[serde(default, rename = "type")]
    plan_type: Option<String>,
    #[serde(default)]
    metadata: NlxMetadata,
    #[serde(default)]
    since: Option<String>,
    #[serde(default)]
    app_specific: bool,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

/// Port as either a JSON string or a JSON number.
#[derive(Debug)]
struct PortValue(String);

impl PortValue {
    fn into_string(self) -> String {
        self.0
    }
}

impl<'de> Deserialize<'de> for PortValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::String(port) => Ok(Self(port)),
            Value::Number(port) => Ok(Self(port.to_string())),
            other => Err(de::Error::custom(format!("invalid port {other}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SitePermissionSetListing {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RetrievalRequestBody<'a> {
    metadata: &'a NlxMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    since: Option<String>,
    app_specific: bool,
}

/// Plan protocol error types.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    /// Plan response cannot be decoded.
    #[error("failed to decode plans from {route}")]
    Decode {
        #[source]
        source: serde_json::Error,
        route: String,
    },

    /// Plan response lacks an expected plan.
    #[error("unexpected plan response: {reason}")]
    UnexpectedPlan { reason: String },

    /// Plan carries `since` in a named zero-offset timezone.
    #[error("plan since {since:?} uses unexpected timezone {zone:?}")]
    UnexpectedTimezone { since: String, zone: String },

    /// Plan carries a `since` that is not a timestamp.
    #[error("plan since {since:?} is not a valid timestamp")]
    InvalidSince { since: String },

    /// Plan entity listing cannot be interpreted.
    #[error("malformed {metadata_type} listing {value:?} in plan")]
    MalformedListing {
        #[source]
        source: serde_json::Error,
        metadata_type: MetadataType,
        value: String,
    },

    /// Request body cannot be serialized.
    #[error("failed to encode plan request body")]
    Encode(#[source] serde_json::Error),
}

/// Friendly result alias :3
type Result<T, E = PlanError> = std::result::Result<T, E>;
