// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{auth_for, zip_entries, zip_names, SiteFixture};

use anyhow::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use serde_json::json;
use skuid_sync::{
    archive::{archive, AllFiles},
    deploy,
    path::PathError,
    plan::PlanName,
    request::{RequestError, DEFAULT_TIMEOUT},
    retrieve,
    unzip::WriteSession,
    DeployFilter, DeployOptions, Error, HttpRequester, RetrieveFilter, RetrieveOptions,
};
use std::collections::BTreeSet;
use wiremock::{
    matchers::{any, body_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

const METADATA_PROFILE: &str =
    r#"{"name":"Admin","enableSignupUi":false,"requireEmailVerificationOnSignup":true}"#;
const DATA_PROFILE: &str = r#"{"signupUi":null,"name":"Admin","permissionSet":{"dataSourcePermissions":{"Racer":{"dataSourceObjectPermissions":null}},"appPermissions":{"Admin":{"isDefault":false},"Racer":{"isDefault":false}}},"enableSignupApi":false}"#;

async fn requested_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|request| request.url.path().to_string())
        .collect()
}

#[tokio::test]
async fn retrieve_merges_permission_sets_across_planes() -> Result<()> {
    let server = MockServer::start().await;
    let site = SiteFixture::new()?;

    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/retrieve/plan"))
        .and(header("Authorization", "Bearer access-token"))
        .and(body_json(json!({"appName": "Racer"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "skuidMetadataService": {
                "host": "",
                "endpoint": "/metadata/retrieve",
                "type": "metadataService",
                "metadata": {"sitepermissionsets": ["myprofile"]}
            },
            "skuidCloudDataService": {
                "host": server.uri(),
                "endpoint": "/data/retrieve",
                "type": "dataService",
                "metadata": {
                    "sitepermissionsets": [r#"{"name":"myprofile","datasources":["Racer"]}"#]
                }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/retrieve"))
        .and(header("Authorization", "Bearer access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_entries(&[(
            "sitepermissionsets/myprofile.json",
            METADATA_PROFILE,
        )])?))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/data/retrieve"))
        .and(header("Authorization", "Bearer bearer-token"))
        .and(header(
            "x-skuid-public-key-endpoint",
            format!("{}/api/v1/site/verificationkey", server.uri()).as_str(),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_entries(&[(
            "sitepermissionsets/myprofile.json",
            DATA_PROFILE,
        )])?))
        .expect(1)
        .mount(&server)
        .await;

    let requester = HttpRequester::new(DEFAULT_TIMEOUT)?;
    let options = RetrieveOptions {
        target_dir: site.path(),
        filter: RetrieveFilter {
            app_name: Some("Racer".into()),
            ..Default::default()
        },
        no_clean: false,
    };
    let outcome = retrieve(&requester, &auth_for(server.uri()), &options).await?;

    let expect = indoc! {r#"
        {
            "name": "Admin",
            "enableSignupApi": false,
            "enableSignupUi": false,
            "permissionSet": {
                "appPermissions": {
                    "Admin": {
                        "isDefault": false
                    },
                    "Racer": {
                        "isDefault": false
                    }
                },
                "dataSourcePermissions": {
                    "Racer": {}
                }
            },
            "requireEmailVerificationOnSignup": true
        }
    "#}
    .trim_end()
    .replace("    ", "\t");

    assert_eq!(site.read("sitepermissionsets/myprofile.json")?, expect);
    assert_eq!(
        outcome.entity_paths,
        BTreeSet::from(["sitepermissionsets/myprofile".to_string()])
    );
    assert_eq!(
        requested_paths(&server).await,
        vec![
            "/api/v2/metadata/retrieve/plan".to_string(),
            "/api/v2/metadata/retrieve".to_string(),
            "/api/v2/data/retrieve".to_string(),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn retrieve_clears_only_metadata_type_dirs() -> Result<()> {
    let server = MockServer::start().await;
    let site = SiteFixture::with_files(&[
        ("pages/old.xml", "<skuidpage/>"),
        ("unrelated/keepme.txt", "keep me"),
    ])?;

    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/retrieve/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "skuidMetadataService": {"endpoint": "/metadata/retrieve", "metadata": {}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/retrieve"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_entries(&[])?))
        .expect(1)
        .mount(&server)
        .await;

    let requester = HttpRequester::new(DEFAULT_TIMEOUT)?;
    let options = RetrieveOptions {
        target_dir: site.path(),
        ..Default::default()
    };
    let outcome = retrieve(&requester, &auth_for(server.uri()), &options).await?;

    assert!(!site.exists("pages"));
    assert_eq!(site.read("unrelated/keepme.txt")?, "keep me");
    assert!(outcome.entity_paths.is_empty());
    assert_eq!(outcome.warnings.len(), 1);

    Ok(())
}

#[tokio::test]
async fn retrieve_without_clean_keeps_existing_files() -> Result<()> {
    let server = MockServer::start().await;
    let site = SiteFixture::with_files(&[("pages/old.xml", "<skuidpage/>")])?;

    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/retrieve/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "skuidMetadataService": {"endpoint": "/metadata/retrieve", "metadata": {"apps": ["racer"]}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/retrieve"))
        .and(body_json(json!({
            "metadata": {
                "apps": ["racer"], "authproviders": [], "componentpacks": [],
                "dataservices": [], "datasources": [], "designsystems": [],
                "variables": [], "files": [], "pages": [], "permissionsets": [],
                "sitepermissionsets": [], "sessionvariables": [], "site": [], "themes": []
            },
            "appSpecific": false
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_entries(&[(
            "apps/racer.json",
            r#"{"type":"app","name":"racer"}"#,
        )])?))
        .expect(1)
        .mount(&server)
        .await;

    let requester = HttpRequester::new(DEFAULT_TIMEOUT)?;
    let options = RetrieveOptions {
        target_dir: site.path(),
        no_clean: true,
        ..Default::default()
    };
    let outcome = retrieve(&requester, &auth_for(server.uri()), &options).await?;

    assert_eq!(site.read("pages/old.xml")?, "<skuidpage/>");
    assert_eq!(site.read("apps/racer.json")?, r#"{"name":"racer","type":"app"}"#);
    assert_eq!(outcome.entity_paths, BTreeSet::from(["apps/racer".to_string()]));

    Ok(())
}

#[tokio::test]
async fn retrieve_keeps_unauthorized_plan_request() -> Result<()> {
    let server = MockServer::start().await;
    let site = SiteFixture::with_files(&[("pages/old.xml", "<skuidpage/>")])?;

    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/retrieve/plan"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let requester = HttpRequester::new(DEFAULT_TIMEOUT)?;
    let options = RetrieveOptions {
        target_dir: site.path(),
        ..Default::default()
    };
    let result = retrieve(&requester, &auth_for(server.uri()), &options).await;

    assert!(matches!(
        result,
        Err(Error::Request(RequestError::Unauthorized { .. }))
    ));
    assert_eq!(site.read("pages/old.xml")?, "<skuidpage/>");

    Ok(())
}

#[tokio::test]
async fn retrieve_skips_malformed_definitions_after_clearing() -> Result<()> {
    let server = MockServer::start().await;
    let site = SiteFixture::with_files(&[("apps/stale.json", r#"{"name":"stale"}"#)])?;

    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/retrieve/plan"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "skuidMetadataService": {"endpoint": "/metadata/retrieve", "metadata": {"apps": ["bad", "good"]}}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/retrieve"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(zip_entries(&[
            ("apps/bad.json", "{not json"),
            ("apps/good.json", r#"{"type":"app","name":"good"}"#),
        ])?))
        .mount(&server)
        .await;

    let requester = HttpRequester::new(DEFAULT_TIMEOUT)?;
    let options = RetrieveOptions {
        target_dir: site.path(),
        ..Default::default()
    };
    let outcome = retrieve(&requester, &auth_for(server.uri()), &options).await?;

    assert!(!site.exists("apps/stale.json"));
    assert!(!site.exists("apps/bad.json"));
    assert_eq!(site.read("apps/good.json")?, r#"{"name":"good","type":"app"}"#);
    assert_eq!(outcome.entity_paths, BTreeSet::from(["apps/good".to_string()]));
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("apps/bad.json"));

    Ok(())
}

#[tokio::test]
async fn archived_site_unpacks_to_same_entities() -> Result<()> {
    let site = SiteFixture::with_files(&[
        ("pages/home.json", r#"{"name":"home"}"#),
        ("pages/home.xml", "<skuidpage/>"),
        ("themes/dark.json", r#"{"name":"dark"}"#),
        ("themes/dark.inline.css", "body { color: black; }"),
        ("files/report.pdf", "%PDF-1.4"),
        ("files/report.pdf.skuid.json", r#"{"name":"report.pdf"}"#),
        ("site/site.json", r#"{"name":"site"}"#),
        ("site/logo/logo.png", "png"),
        ("site/logo/logo.png.skuid.json", r#"{"name":"logo.png"}"#),
        ("componentpacks/pack/manifest.json", r#"{"name":"pack"}"#),
        ("componentpacks/pack/nested/dir/runtime.js", "export {};"),
        ("notes.md", "not metadata"),
    ])?;
    let target = SiteFixture::new()?;

    let archived = archive(site.path(), AllFiles).await?;
    let report = WriteSession::new().write_results(target.path(), PlanName::Metadata, archived.bytes())?;

    assert_eq!(archived.entity_paths(), report.entity_paths);
    assert!(report.warnings.is_empty());
    assert_eq!(
        target.read("componentpacks/pack/nested/dir/runtime.js")?,
        "export {};"
    );
    assert_eq!(target.read("themes/dark.inline.css")?, "body { color: black; }");
    assert!(!target.exists("notes.md"));

    Ok(())
}

#[tokio::test]
async fn retrieve_rejects_relative_target_without_requests() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let requester = HttpRequester::new(DEFAULT_TIMEOUT)?;
    let options = RetrieveOptions {
        target_dir: "rel/path".into(),
        ..Default::default()
    };
    let result = retrieve(&requester, &auth_for(server.uri()), &options).await;

    assert!(matches!(
        result,
        Err(Error::Io(PathError::NotAbsolute { .. }))
    ));
    assert!(requested_paths(&server).await.is_empty());

    Ok(())
}

#[tokio::test]
async fn deploy_executes_steps_in_order() -> Result<()> {
    let server = MockServer::start().await;
    let site = SiteFixture::with_files(&[
        ("pages/a.json", r#"{"name":"a"}"#),
        ("pages/a.xml", "<skuidpage/>"),
        ("permissionsets/p.json", r#"{"name":"p"}"#),
        ("datasources/Racer.json", r#"{"name":"Racer"}"#),
        ("notes.md", "not metadata"),
    ])?;

    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/deploy/plan"))
        .and(header("Content-Type", "application/zip"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "skuidMetadataService": {
                "endpoint": "/metadata/deploy",
                "metadata": {"pages": ["a"], "permissionsets": ["p"]}
            },
            "skuidCloudDataService": {
                "host": server.uri(),
                "endpoint": "/data/deploy",
                "metadata": {"datasources": ["Racer"]}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/deploy"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pages": {"updates": [{"name": "a"}]},
            "permissionsets": {"inserts": [{"name": "p", "appPermissions": {}}], "updates": []}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/data/deploy"))
        .and(header("Authorization", "Bearer bearer-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/update-permissionsets"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!([{"name": "p", "appPermissions": {}}])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/deploy/sync"))
        .and(header("Authorization", "Bearer access-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let requester = HttpRequester::new(DEFAULT_TIMEOUT)?;
    let options = DeployOptions {
        source_dir: site.path(),
        ..Default::default()
    };
    let outcome = deploy(&requester, &auth_for(server.uri()), &options).await?;

    assert_eq!(
        requested_paths(&server).await,
        vec![
            "/api/v2/metadata/deploy/plan".to_string(),
            "/api/v2/metadata/deploy".to_string(),
            "/api/v2/data/deploy".to_string(),
            "/api/v2/metadata/update-permissionsets".to_string(),
            "/api/v2/metadata/deploy/sync".to_string(),
        ]
    );

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(
        zip_names(&requests[0].body)?,
        BTreeSet::from([
            "datasources/Racer.json".to_string(),
            "pages/a.json".to_string(),
            "pages/a.xml".to_string(),
            "permissionsets/p.json".to_string(),
        ])
    );
    assert_eq!(
        zip_names(&requests[1].body)?,
        BTreeSet::from([
            "pages/a.json".to_string(),
            "pages/a.xml".to_string(),
            "permissionsets/p.json".to_string(),
        ])
    );
    assert_eq!(
        zip_names(&requests[2].body)?,
        BTreeSet::from(["datasources/Racer.json".to_string()])
    );
    assert_eq!(
        outcome.entity_paths,
        BTreeSet::from([
            "datasources/Racer".to_string(),
            "pages/a".to_string(),
            "permissionsets/p".to_string(),
        ])
    );

    Ok(())
}

#[tokio::test]
async fn deploy_wraps_filtered_plan_request() -> Result<()> {
    let server = MockServer::start().await;
    let site = SiteFixture::with_files(&[("apps/racer.json", r#"{"name":"racer"}"#)])?;

    Mock::given(method("POST"))
        .and(path("/api/v2/metadata/deploy/plan"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "skuidMetadataService": {"endpoint": "/metadata/deploy", "metadata": {}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let requester = HttpRequester::new(DEFAULT_TIMEOUT)?;
    let options = DeployOptions {
        source_dir: site.path(),
        filter: DeployFilter {
            app_name: Some("racer".into()),
            ignore_skuid_db: false,
        },
        entities: None,
    };
    let outcome = deploy(&requester, &auth_for(server.uri()), &options).await?;

    let requests = server.received_requests().await.unwrap_or_default();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body)?;
    assert_eq!(body["appName"], "racer");
    assert_eq!(body["ignoreSkuidDb"], false);
    assert!(body["plan"].as_str().is_some_and(|plan| !plan.is_empty()));

    // Nothing planned, yet archived, so plan validation only warns.
    assert_eq!(requests.len(), 1);
    assert!(outcome.warnings.iter().any(|warning| warning.contains("apps/racer")));

    Ok(())
}
