// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::net::TcpListener;
use std::path::PathBuf;

use crawlship::service::ServiceBootstrap;
use crawlship::utils::errors::{BootstrapError, PipelineError};
use crawlship::utils::port_probe::PortProbe;

use super::helpers::{create_test_pipeline, TestPipeline};

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn deployed_pipeline() -> TestPipeline {
    let mut pipeline = create_test_pipeline();
    pipeline.settings.service.port = free_port();
    pipeline.deploy().await.unwrap();
    std::fs::create_dir_all(pipeline.path("image/var/lib/scrapyd")).unwrap();
    pipeline
}

#[tokio::test]
async fn test_absent_config_mount_exits_before_binding() {
    let mut pipeline = deployed_pipeline().await;
    pipeline.settings.service.config_mount = PathBuf::from("/etc/not-mounted");
    let port = pipeline.settings.service.port;

    let err: PipelineError = ServiceBootstrap::new(&pipeline.settings)
        .preflight()
        .await
        .unwrap_err()
        .into();

    assert!(matches!(
        err,
        PipelineError::Bootstrap(BootstrapError::MountMissing { kind: "config", .. })
    ));
    assert_eq!(err.exit_code(), 6);
    assert!(!PortProbe::is_port_in_use("127.0.0.1", port));
}

#[tokio::test]
async fn test_daemonizing_arguments_are_refused() {
    let mut pipeline = deployed_pipeline().await;
    pipeline.settings.service.args = vec!["--pidfile=".to_string(), "-d".to_string()];

    let err = ServiceBootstrap::new(&pipeline.settings)
        .preflight()
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::Daemonizing(flag) if flag == "-d"));
}

#[tokio::test]
async fn test_occupied_port_is_fatal() {
    let pipeline = deployed_pipeline().await;
    let _occupied = TcpListener::bind(("127.0.0.1", pipeline.settings.service.port)).unwrap();

    let err = ServiceBootstrap::new(&pipeline.settings)
        .preflight()
        .await
        .unwrap_err();
    assert!(matches!(err, BootstrapError::Port(_)));
}

#[tokio::test]
async fn test_serve_runs_the_daemon_in_the_foreground() {
    let mut pipeline = deployed_pipeline().await;
    let port = free_port();
    pipeline.settings.service.program = "sh".to_string();
    pipeline.settings.service.args = vec![
        "-c".to_string(),
        "test -f {config}/scrapyd.conf && test -d {store}/myproject && exit $(( {port} % 100 ))"
            .to_string(),
    ];

    let bootstrap = ServiceBootstrap::new(&pipeline.settings).with_port(Some(port));
    let plan = bootstrap.preflight().await.unwrap();
    assert_eq!(plan.port, port);

    let code = bootstrap.run(plan).await.unwrap();
    assert_eq!(code, i32::from(port % 100));
}
