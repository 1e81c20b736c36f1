// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::*;
use crate::application::fixtures::PipelineFixture;
use crate::application::{BuildStage, RuntimeAssembler};
use crate::domain::models::artifact::ArtifactVersion;
use crate::utils::port_probe::PortProbeError;
use std::net::TcpListener;

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// 完成构建与组装，并创建两个挂载目录
async fn deployed() -> (PipelineFixture, Settings) {
    let fixture = PipelineFixture::new();
    let mut settings = fixture.settings();
    settings.service.port = free_port();

    let output = BuildStage::new(&settings, fixture.resolver())
        .unwrap()
        .run(ArtifactVersion::FIRST)
        .await
        .unwrap();
    RuntimeAssembler::from_settings(&settings, fixture.resolver())
        .assemble(&output)
        .await
        .unwrap();

    std::fs::create_dir_all(fixture.path("image/var/lib/scrapyd")).unwrap();
    (fixture, settings)
}

#[tokio::test]
async fn test_preflight_builds_a_launch_plan() {
    let (fixture, mut settings) = deployed().await;
    settings.service.args = vec![
        "--pidfile=".to_string(),
        "--logfile={state}/scrapyd.log".to_string(),
    ];

    let plan = ServiceBootstrap::new(&settings).preflight().await.unwrap();

    assert_eq!(plan.program, "scrapyd");
    assert_eq!(
        plan.args[1],
        format!(
            "--logfile={}/scrapyd.log",
            fixture.path("image/var/lib/scrapyd").display()
        )
    );
    assert_eq!(plan.artifact_path, fixture.path("image/store/myproject/1"));
    assert_eq!(plan.receipt.version, ArtifactVersion::FIRST);
    assert!(plan
        .env
        .contains(&("CRAWLSHIP_PORT".to_string(), settings.service.port.to_string())));
    // 状态目录中不会留下探测文件
    assert!(PipelineFixture::files_in(&fixture.path("image/var/lib/scrapyd")).is_empty());
}

#[tokio::test]
async fn test_missing_config_mount_fails_before_port_probe() {
    let (fixture, mut settings) = deployed().await;
    settings.service.config_mount = PathBuf::from("/etc/absent");

    // 端口被占用，但挂载检查先失败
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    settings.service.port = listener.local_addr().unwrap().port();

    let err = ServiceBootstrap::new(&settings).preflight().await.unwrap_err();
    match err {
        BootstrapError::MountMissing { kind, path } => {
            assert_eq!(kind, "config");
            assert_eq!(path, fixture.path("image/etc/absent"));
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_state_mount_must_be_a_directory() {
    let (fixture, settings) = deployed().await;
    std::fs::remove_dir_all(fixture.path("image/var/lib/scrapyd")).unwrap();
    fixture.write("image/var/lib/scrapyd", "not a directory");

    let err = ServiceBootstrap::new(&settings).preflight().await.unwrap_err();
    assert!(matches!(
        err,
        BootstrapError::MountNotDirectory { kind: "state", .. }
    ));
}

#[tokio::test]
async fn test_image_without_receipt_is_incomplete() {
    let fixture = PipelineFixture::new();
    let settings = fixture.settings();
    std::fs::create_dir_all(fixture.path("image/etc/scrapyd")).unwrap();
    std::fs::create_dir_all(fixture.path("image/var/lib/scrapyd")).unwrap();

    let err = ServiceBootstrap::new(&settings).preflight().await.unwrap_err();
    assert!(matches!(err, BootstrapError::ImageIncomplete(_)));
}

#[tokio::test]
async fn test_tampered_deployment_is_refused() {
    let (fixture, settings) = deployed().await;
    std::fs::write(fixture.path("image/store/myproject/1"), b"replaced").unwrap();

    let err = ServiceBootstrap::new(&settings).preflight().await.unwrap_err();
    assert!(matches!(
        err,
        BootstrapError::Artifact(StoreError::DigestMismatch { .. })
    ));
}

#[tokio::test]
async fn test_daemonizing_flags_are_rejected() {
    let (_fixture, mut settings) = deployed().await;
    settings.service.args = vec!["--pidfile=".to_string(), "--daemon".to_string()];

    let err = ServiceBootstrap::new(&settings).preflight().await.unwrap_err();
    assert!(matches!(err, BootstrapError::Daemonizing(flag) if flag == "--daemon"));
}

#[tokio::test]
async fn test_occupied_port_fails_preflight() {
    let (_fixture, settings) = deployed().await;
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let err = ServiceBootstrap::new(&settings)
        .with_port(Some(port))
        .preflight()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BootstrapError::Port(PortProbeError::PortInUse { port: p, .. }) if p == port
    ));
}

#[tokio::test]
async fn test_run_reports_the_daemon_exit_code() {
    let (_fixture, mut settings) = deployed().await;
    settings.service.program = "sh".to_string();
    settings.service.args = vec![
        "-c".to_string(),
        "test \"$CRAWLSHIP_PORT\" = {port} && test -f \"$CRAWLSHIP_ARTIFACT\" && exit 7".to_string(),
    ];
    let bootstrap = ServiceBootstrap::new(&settings);

    let plan = bootstrap.preflight().await.unwrap();
    assert_eq!(bootstrap.run(plan).await.unwrap(), 7);
}

#[tokio::test]
async fn test_missing_program_is_a_launch_error() {
    let (_fixture, mut settings) = deployed().await;
    settings.service.program = "crawlship-no-such-daemon".to_string();
    let bootstrap = ServiceBootstrap::new(&settings);

    let plan = bootstrap.preflight().await.unwrap();
    assert!(matches!(
        bootstrap.run(plan).await,
        Err(BootstrapError::Launch { .. })
    ));
}

#[tokio::test]
async fn test_plan_exposes_the_runtime_environment() {
    let (fixture, mut settings) = deployed().await;
    settings.service.args = vec!["--pythonpath={env}".to_string()];

    let plan = ServiceBootstrap::new(&settings).preflight().await.unwrap();

    let env_dir = fixture.path("image/opt/crawlship/env");
    assert_eq!(plan.args, vec![format!("--pythonpath={}", env_dir.display())]);
    assert!(plan.env.contains(&(
        "CRAWLSHIP_ENV_DIR".to_string(),
        env_dir.display().to_string()
    )));
    let python_path = plan
        .env
        .iter()
        .find(|(key, _)| key == "PYTHONPATH")
        .map(|(_, value)| value.clone())
        .unwrap();
    assert!(python_path.starts_with(&env_dir.display().to_string()));
}

#[tokio::test]
async fn test_missing_runtime_environment_is_refused() {
    let (fixture, settings) = deployed().await;
    std::fs::remove_dir_all(fixture.path("image/opt/crawlship/env")).unwrap();

    let err = ServiceBootstrap::new(&settings).preflight().await.unwrap_err();
    assert!(matches!(err, BootstrapError::EnvironmentMissing(path)
        if path == fixture.path("image/opt/crawlship/env")));
}

#[tokio::test]
async fn test_runtime_environment_must_match_the_receipt() {
    let (fixture, settings) = deployed().await;
    let env_dir = fixture.path("image/opt/crawlship/env");
    let mut lock = ResolvedEnvironment::read_lock(&env_dir).await.unwrap().unwrap();
    lock.packages[0].version = "0.1".parse().unwrap();
    lock.write_lock(&env_dir).await.unwrap();

    let err = ServiceBootstrap::new(&settings).preflight().await.unwrap_err();
    assert!(matches!(err, BootstrapError::EnvironmentMismatch { .. }));
}

/// 把目录权限改为 `mode`，返回当前用户是否仍能写入（root 会忽略权限位）
#[cfg(unix)]
fn restrict(dir: &Path, mode: u32) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(mode)).unwrap();
    let marker = dir.join(".write-check");
    let writable = std::fs::write(&marker, b"").is_ok();
    let _ = std::fs::remove_file(&marker);
    writable
}

#[cfg(unix)]
fn unrestrict(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn test_read_only_state_mount_is_fatal() {
    let (fixture, settings) = deployed().await;
    let state_dir = fixture.path("image/var/lib/scrapyd");
    if restrict(&state_dir, 0o555) {
        // 以 root 运行时无法模拟只读目录
        unrestrict(&state_dir);
        return;
    }

    let result = ServiceBootstrap::new(&settings).preflight().await;
    unrestrict(&state_dir);
    assert!(matches!(
        result,
        Err(BootstrapError::MountUnwritable { kind: "state", .. })
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_config_mount_is_fatal() {
    let (fixture, settings) = deployed().await;
    let config_dir = fixture.path("image/etc/scrapyd");
    if restrict(&config_dir, 0o000) {
        unrestrict(&config_dir);
        return;
    }

    let result = ServiceBootstrap::new(&settings).preflight().await;
    unrestrict(&config_dir);
    assert!(matches!(
        result,
        Err(BootstrapError::MountUnreadable { kind: "config", .. })
    ));
}

#[test]
fn test_daemonizing_flag_detection() {
    assert!(is_daemonizing("-d"));
    assert!(is_daemonizing("--daemonize"));
    assert!(is_daemonizing("--detach=true"));
    assert!(!is_daemonizing("--pidfile="));
    assert!(!is_daemonizing("-debug"));
}
