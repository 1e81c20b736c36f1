// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::models::environment::InstalledPackage;
use crate::domain::models::manifest::DependencyManifest;
use crate::domain::models::version::Version;
use crate::domain::services::environment_installer::PackageResolver;
use crate::utils::errors::InstallError;
use crate::utils::process::{render_args, run_captured, CommandOutput, ProcessError};

/// 安装期间写入目标目录的临时清单
const MANIFEST_SCRATCH: &str = ".crawlship-requirements.txt";

/// 外部包管理器解析器
///
/// 先执行安装命令，再执行列表命令，以其 `name==version` 输出作为实际安装结果
pub struct CommandResolver {
    install_command: Vec<String>,
    freeze_command: Vec<String>,
    timeout: Duration,
}

impl CommandResolver {
    pub fn new(install_command: Vec<String>, freeze_command: Vec<String>, timeout: Duration) -> Self {
        Self {
            install_command,
            freeze_command,
            timeout,
        }
    }

    async fn run(&self, template: &[String], vars: &[(&str, String)]) -> Result<CommandOutput, InstallError> {
        let rendered = render_args(template, vars);
        let (program, args) = rendered
            .split_first()
            .ok_or_else(|| InstallError::Index("resolver command is empty".to_string()))?;

        let output = run_captured(program, args, None, self.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::Spawn { program, source } => InstallError::CommandFailed {
                    program,
                    code: None,
                    stderr: source.to_string(),
                },
                ProcessError::Timeout(program) => InstallError::CommandTimeout(program),
            })?;

        if !output.success() {
            return Err(InstallError::CommandFailed {
                program: program.clone(),
                code: output.code,
                stderr: output.stderr_tail(),
            });
        }
        Ok(output)
    }
}

/// 解析 `name==version` 格式的列表输出
///
/// 注释、可编辑安装与直接引用（`name @ url`）会被跳过
pub fn parse_freeze_output(output: &str) -> Vec<InstalledPackage> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .filter_map(|line| {
            let (name, version) = line.split_once("==")?;
            match version.trim().parse::<Version>() {
                Ok(version) => Some(InstalledPackage::new(name.trim(), version)),
                Err(e) => {
                    warn!(line, error = %e, "skipping unparseable package line");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl PackageResolver for CommandResolver {
    fn name(&self) -> &str {
        "command"
    }

    async fn install(
        &self,
        manifest: &DependencyManifest,
        target: &Path,
    ) -> Result<Vec<InstalledPackage>, InstallError> {
        let target_arg = target.to_string_lossy().to_string();

        if !manifest.is_empty() {
            let scratch = target.join(MANIFEST_SCRATCH);
            manifest.write_to(&scratch).await?;
            let vars = [
                ("manifest", scratch.to_string_lossy().to_string()),
                ("target", target_arg.clone()),
            ];
            let result = self.run(&self.install_command, &vars).await;
            let _ = tokio::fs::remove_file(&scratch).await;
            let output = result?;
            info!(
                elapsed_ms = output.duration.as_millis() as u64,
                "package manager finished"
            );
        }

        let output = self
            .run(&self.freeze_command, &[("target", target_arg)])
            .await?;
        Ok(parse_freeze_output(&output.stdout))
    }
}
