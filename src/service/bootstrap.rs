// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::settings::Settings;
use crate::domain::models::environment::ResolvedEnvironment;
use crate::domain::models::image::ImageReceipt;
use crate::domain::repositories::artifact_store::{ArtifactStore, StoreError};
use crate::infrastructure::storage::LocalArtifactStore;
use crate::utils::errors::BootstrapError;
use crate::utils::port_probe::PortProbe;
use crate::utils::process::render_args;

/// 会让守护进程脱离前台的参数
const DAEMONIZING_FLAGS: &[&str] = &[
    "-d",
    "--daemon",
    "--daemonize",
    "--detach",
    "--fork",
    "--background",
];

/// 启动计划
///
/// 所有启动前检查通过后得到，包含已替换占位符的命令行与环境变量
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub bind_address: String,
    pub port: u16,
    pub receipt: ImageReceipt,
    /// 已校验的产物路径
    pub artifact_path: PathBuf,
}

/// 服务启动器
///
/// 检查挂载点、镜像回执、守护参数与端口后，在前台启动服务守护进程
pub struct ServiceBootstrap {
    settings: Settings,
    port_override: Option<u16>,
}

impl ServiceBootstrap {
    pub fn new(settings: &Settings) -> Self {
        Self {
            settings: settings.clone(),
            port_override: None,
        }
    }

    /// 覆盖配置中的监听端口
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port_override = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port_override.unwrap_or(self.settings.service.port)
    }

    /// 启动前检查
    ///
    /// 按顺序检查配置挂载、状态挂载、镜像回执与已部署产物（含运行时依赖环境）、
    /// 守护参数、端口。挂载检查失败时不会探测端口
    ///
    /// # 返回值
    ///
    /// * `Ok(LaunchPlan)` - 启动计划
    /// * `Err(BootstrapError)` - 第一个失败的检查
    pub async fn preflight(&self) -> Result<LaunchPlan, BootstrapError> {
        let service = &self.settings.service;
        let config_dir = self.settings.image_path(&service.config_mount);
        let state_dir = self.settings.image_path(&service.state_mount);

        // 1. 配置挂载
        check_directory("config", &config_dir).await?;
        fs::read_dir(&config_dir)
            .await
            .map_err(|e| BootstrapError::MountUnreadable {
                kind: "config",
                path: config_dir.clone(),
                reason: e.to_string(),
            })?;

        // 2. 状态挂载
        check_directory("state", &state_dir).await?;
        probe_writable(&state_dir)
            .await
            .map_err(|e| BootstrapError::MountUnwritable {
                kind: "state",
                path: state_dir.clone(),
                reason: e.to_string(),
            })?;
        debug!(config = %config_dir.display(), state = %state_dir.display(), "mounts verified");

        // 3. 镜像回执与已部署产物
        let image_root = &self.settings.image.root;
        let receipt = ImageReceipt::read_from(image_root)
            .await?
            .ok_or_else(|| BootstrapError::ImageIncomplete(image_root.clone()))?;
        let store_dir = self.settings.image_path(&receipt.store_root);
        let artifact_path = self.verify_deployed(&receipt, &store_dir).await?;
        let env_dir = self.settings.image_path(&self.settings.image.environment_dir);
        verify_environment(&receipt, &env_dir).await?;

        // 4. 守护参数
        let port = self.port();
        let vars = [
            ("port", port.to_string()),
            ("bind", service.bind_address.clone()),
            ("config", config_dir.display().to_string()),
            ("state", state_dir.display().to_string()),
            ("store", store_dir.display().to_string()),
            ("env", env_dir.display().to_string()),
        ];
        let args = render_args(&service.args, &vars);
        if let Some(flag) = args.iter().find(|arg| is_daemonizing(arg)) {
            return Err(BootstrapError::Daemonizing(flag.clone()));
        }
        if service.program != receipt.daemon.program {
            warn!(
                configured = %service.program,
                assembled = %receipt.daemon.program,
                "service program differs from the assembled image"
            );
        }

        // 5. 端口
        PortProbe::ensure_available(&service.bind_address, port)?;

        let env = vec![
            ("CRAWLSHIP_PORT".to_string(), port.to_string()),
            ("CRAWLSHIP_BIND_ADDRESS".to_string(), service.bind_address.clone()),
            ("CRAWLSHIP_CONFIG_DIR".to_string(), config_dir.display().to_string()),
            ("CRAWLSHIP_STATE_DIR".to_string(), state_dir.display().to_string()),
            ("CRAWLSHIP_STORE_DIR".to_string(), store_dir.display().to_string()),
            ("CRAWLSHIP_ENV_DIR".to_string(), env_dir.display().to_string()),
            ("PYTHONPATH".to_string(), python_path(&env_dir)),
            ("CRAWLSHIP_PROJECT".to_string(), receipt.project.clone()),
            ("CRAWLSHIP_VERSION".to_string(), receipt.version.to_string()),
            (
                "CRAWLSHIP_ARTIFACT".to_string(),
                artifact_path.display().to_string(),
            ),
        ];

        info!(
            project = %receipt.project,
            version = %receipt.version,
            port,
            "preflight checks passed"
        );
        Ok(LaunchPlan {
            program: service.program.clone(),
            args,
            env,
            bind_address: service.bind_address.clone(),
            port,
            receipt,
            artifact_path,
        })
    }

    /// 在前台运行服务守护进程
    ///
    /// 标准输入输出直接继承；收到 SIGINT/SIGTERM 时终止子进程
    ///
    /// # 返回值
    ///
    /// * `Ok(i32)` - 守护进程的退出码，被信号终止时为 `128 + 信号值`
    /// * `Err(BootstrapError)` - 启动失败
    pub async fn run(&self, plan: LaunchPlan) -> Result<i32, BootstrapError> {
        let mut child = Command::new(&plan.program)
            .args(&plan.args)
            .envs(plan.env.iter().cloned())
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BootstrapError::Launch {
                program: plan.program.clone(),
                reason: e.to_string(),
            })?;

        info!(
            program = %plan.program,
            pid = child.id(),
            bind = %plan.bind_address,
            port = plan.port,
            "service started"
        );

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                let code = exit_code(status);
                info!(code, "service exited");
                Ok(code)
            }
            signal = shutdown_signal() => {
                info!(signal, "shutdown signal received, stopping service");
                child.start_kill()?;
                let status = child.wait().await?;
                debug!(?status, "service stopped");
                Ok(128 + signal)
            }
        }
    }

    async fn verify_deployed(
        &self,
        receipt: &ImageReceipt,
        store_dir: &Path,
    ) -> Result<PathBuf, BootstrapError> {
        let store = LocalArtifactStore::from_settings(store_dir, &self.settings.store);
        let path = store.verify(&receipt.project, receipt.version).await?;

        let recorded = store
            .versions(&receipt.project)
            .await?
            .into_iter()
            .find(|v| v.version == receipt.version);
        if let Some(recorded) = recorded {
            if recorded.file_digest != receipt.file_digest {
                return Err(StoreError::DigestMismatch {
                    path,
                    expected: receipt.file_digest.clone(),
                    actual: recorded.file_digest,
                }
                .into());
            }
        }
        debug!(path = %path.display(), "deployed artifact verified");
        Ok(path)
    }
}

/// 运行时依赖环境必须存在，且锁文件与回执记录的环境一致
async fn verify_environment(
    receipt: &ImageReceipt,
    env_dir: &Path,
) -> Result<(), BootstrapError> {
    let lock = ResolvedEnvironment::read_lock(env_dir)
        .await?
        .ok_or_else(|| BootstrapError::EnvironmentMissing(env_dir.to_path_buf()))?;

    if lock != receipt.environment {
        let drift = lock.drift_against(&receipt.environment);
        let reason = if drift.is_empty() {
            "lock differs from the recorded environment".to_string()
        } else {
            drift
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        return Err(BootstrapError::EnvironmentMismatch {
            path: env_dir.to_path_buf(),
            reason,
        });
    }
    debug!(
        path = %env_dir.display(),
        packages = lock.packages.len(),
        "runtime environment verified"
    );
    Ok(())
}

/// 运行时依赖环境放在 `PYTHONPATH` 最前面，保留继承的其余路径
fn python_path(env_dir: &Path) -> String {
    let mut paths = vec![env_dir.to_path_buf()];
    if let Some(inherited) = std::env::var_os("PYTHONPATH") {
        paths.extend(std::env::split_paths(&inherited));
    }
    std::env::join_paths(paths)
        .map(|joined| joined.to_string_lossy().to_string())
        .unwrap_or_else(|_| env_dir.display().to_string())
}

async fn check_directory(kind: &'static str, path: &Path) -> Result<(), BootstrapError> {
    match fs::metadata(path).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(BootstrapError::MountNotDirectory {
            kind,
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BootstrapError::MountMissing {
            kind,
            path: path.to_path_buf(),
        }),
        Err(e) => Err(BootstrapError::MountUnreadable {
            kind,
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

/// 写入并删除一个探测文件
async fn probe_writable(dir: &Path) -> std::io::Result<()> {
    let probe = dir.join(format!(".crawlship-probe-{}", Uuid::new_v4().simple()));
    fs::write(&probe, b"probe").await?;
    fs::remove_file(&probe).await
}

fn is_daemonizing(arg: &str) -> bool {
    let flag = arg.split('=').next().unwrap_or(arg);
    DAEMONIZING_FLAGS.contains(&flag)
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// 等待 SIGINT 或 SIGTERM，返回信号值
#[cfg(unix)]
async fn shutdown_signal() -> i32 {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => tokio::select! {
            _ = tokio::signal::ctrl_c() => 2,
            _ = terminate.recv() => 15,
        },
        Err(e) => {
            warn!(error = %e, "unable to listen for SIGTERM");
            let _ = tokio::signal::ctrl_c().await;
            2
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> i32 {
    let _ = tokio::signal::ctrl_c().await;
    2
}

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod tests;
