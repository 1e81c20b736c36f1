// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::PathBuf;

use crawlship::application::RuntimeAssembler;
use crawlship::domain::models::handoff::BuildOutput;
use crawlship::domain::repositories::artifact_store::ArtifactStore;
use crawlship::domain::services::artifact_builder::ArtifactBuilder;
use crawlship::utils::errors::{AssembleError, InstallError, PipelineError};

use super::helpers::{create_test_pipeline, write};

#[tokio::test]
async fn test_fresh_project_publishes_first_version() {
    let pipeline = create_test_pipeline();

    let receipt = pipeline.deploy().await.unwrap();

    assert_eq!(receipt.artifact_path, PathBuf::from("/store/myproject/1"));
    assert_eq!(pipeline.files_in("image/store/myproject"), vec!["1"]);
    assert_eq!(pipeline.files_in("image/store"), vec!["myproject"]);
    assert!(pipeline.path("image/image.json").is_file());
    assert!(pipeline.path("image/etc/scrapyd/scrapyd.conf").is_file());

    let latest = pipeline.store().latest("myproject").await.unwrap().unwrap();
    assert_eq!(latest.version.get(), 1);
    assert_eq!(latest.file_digest, receipt.file_digest);
}

#[tokio::test]
async fn test_sequential_builds_never_overwrite() {
    let pipeline = create_test_pipeline();

    let first = pipeline.deploy().await.unwrap();
    let second = pipeline.deploy().await.unwrap();

    assert_eq!(pipeline.files_in("image/store/myproject"), vec!["1", "2"]);
    assert_eq!(second.version.get(), 2);

    let versions = pipeline.store().versions("myproject").await.unwrap();
    assert_eq!(
        versions.iter().map(|v| v.version.get()).collect::<Vec<_>>(),
        vec![1, 2]
    );
    // 第一个版本保持不变
    pipeline.store().verify("myproject", first.version).await.unwrap();
    assert_eq!(versions[0].file_digest, first.file_digest);
}

#[tokio::test]
async fn test_unresolvable_manifest_halts_without_artifact() {
    let mut pipeline = create_test_pipeline();
    pipeline.deploy().await.unwrap();

    pipeline
        .settings
        .manifest
        .extra
        .push("scrapy-splash>=0.9".to_string());
    let err = pipeline.deploy().await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Install(InstallError::UnknownPackage(ref name)) if name == "scrapy-splash"
    ));
    assert_eq!(err.exit_code(), 3);
    assert!(!pipeline.path("dist/myproject.2").exists());
    assert_eq!(pipeline.files_in("image/store/myproject"), vec!["1"]);
    let latest = pipeline.store().latest("myproject").await.unwrap().unwrap();
    assert_eq!(latest.version.get(), 1);
}

#[tokio::test]
async fn test_identical_source_yields_identical_content_digest() {
    let pipeline = create_test_pipeline();

    let first = pipeline.build().await.unwrap();
    let second = pipeline.build().await.unwrap();
    assert_eq!(
        first.artifact.content_digest,
        second.artifact.content_digest
    );

    write(
        &pipeline.path("source"),
        "myproject/spiders/authors.py",
        "import scrapy\n",
    );
    let third = pipeline.build().await.unwrap();
    assert_ne!(first.artifact.content_digest, third.artifact.content_digest);
}

#[tokio::test]
async fn test_hand_off_file_drives_assembly() {
    let pipeline = create_test_pipeline();
    pipeline.build().await.unwrap();

    let output = BuildOutput::read_from(&pipeline.path("dist/handoff.json"))
        .await
        .unwrap();
    assert_eq!(
        pipeline.files_in("dist"),
        vec!["handoff.json", "myproject.1", "requirements.txt"]
    );

    let receipt = RuntimeAssembler::from_settings(&pipeline.settings, pipeline.resolver())
        .assemble(&output)
        .await
        .unwrap();
    assert_eq!(receipt.file_digest, output.artifact.file_digest);
    assert_eq!(
        std::fs::read(pipeline.path("image/opt/crawlship/requirements.txt")).unwrap(),
        std::fs::read(pipeline.path("dist/requirements.txt")).unwrap()
    );
}

#[tokio::test]
async fn test_build_only_packages_are_absent_at_runtime() {
    let mut pipeline = create_test_pipeline();
    pipeline.settings.build.build_only = vec!["Cython".to_string()];

    let output = pipeline.build().await.unwrap();
    let (_, build_env) = ArtifactBuilder::read_metadata(&output.artifact.path)
        .await
        .unwrap();
    assert!(build_env.get("cython").is_some());
    assert!(std::fs::read_to_string(&output.manifest_path)
        .unwrap()
        .contains("Cython  # build-only"));

    let receipt = RuntimeAssembler::from_settings(&pipeline.settings, pipeline.resolver())
        .assemble(&output)
        .await
        .unwrap();
    assert!(receipt.environment.get("cython").is_none());
    assert!(receipt.environment.get("beautifulsoup4").is_some());
}

#[tokio::test]
async fn test_runtime_drift_blocks_publication() {
    let pipeline = create_test_pipeline();
    let output = pipeline.build().await.unwrap();

    write(
        pipeline.dir.path(),
        "index/index.json",
        r#"{"packages": {"Scrapy": ["2.11.2"], "beautifulsoup4": ["4.12.3", "4.13.0"]}}"#,
    );
    let err = RuntimeAssembler::from_settings(&pipeline.settings, pipeline.resolver())
        .assemble(&output)
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Assemble(AssembleError::Drift(_))));
    assert!(pipeline.files_in("image/store/myproject").is_empty());
    assert!(!pipeline.path("image/image.json").exists());
}

#[tokio::test]
async fn test_upstream_release_between_deploys_is_picked_up() {
    let pipeline = create_test_pipeline();
    let first = pipeline.deploy().await.unwrap();
    assert_eq!(
        first.environment.get("beautifulsoup4").unwrap().version.to_string(),
        "4.12.3"
    );

    write(
        pipeline.dir.path(),
        "index/index.json",
        r#"{"packages": {
            "Scrapy": ["2.11.0", "2.11.2"],
            "beautifulsoup4": ["4.12.3", "4.13.0"],
            "Cython": ["3.0.10"]
        }}"#,
    );
    write(pipeline.dir.path(), "index/beautifulsoup4/4.13.0/__init__.py", "");

    let second = pipeline.deploy().await.unwrap();
    assert_eq!(second.version.get(), 2);
    assert_eq!(
        second.environment.get("beautifulsoup4").unwrap().version.to_string(),
        "4.13.0"
    );
    assert_eq!(pipeline.files_in("image/store/myproject"), vec!["1", "2"]);
}
