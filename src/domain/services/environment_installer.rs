// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::models::environment::{InstalledPackage, ResolvedEnvironment};
use crate::domain::models::manifest::DependencyManifest;
use crate::utils::errors::InstallError;

/// 依赖解析器特质
///
/// 将清单转换为安装在目标目录中的具体依赖集合。
/// 解析器可以假定目标目录已存在且为空
#[async_trait]
pub trait PackageResolver: Send + Sync {
    /// 解析器名称，用于日志与错误信息
    fn name(&self) -> &str;

    /// 安装清单中的依赖到目标目录，返回实际安装的依赖
    async fn install(
        &self,
        manifest: &DependencyManifest,
        target: &Path,
    ) -> Result<Vec<InstalledPackage>, InstallError>;
}

/// 安装结果
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    pub environment: ResolvedEnvironment,
    /// 本次调用是否实际执行了安装
    pub changed: bool,
}

/// 依赖环境安装服务
///
/// 构建阶段与运行时镜像使用同一个安装入口。安装是幂等的：
/// 目标目录的锁文件记录了相同的清单摘要时直接返回记录的环境
pub struct EnvironmentInstaller {
    resolver: Arc<dyn PackageResolver>,
}

impl EnvironmentInstaller {
    pub fn new(resolver: Arc<dyn PackageResolver>) -> Self {
        Self { resolver }
    }

    /// 安装依赖环境
    ///
    /// # 参数
    ///
    /// * `manifest` - 依赖清单
    /// * `target` - 环境目录
    ///
    /// # 返回值
    ///
    /// * `Ok(InstallOutcome)` - 安装后的环境
    /// * `Err(InstallError)` - 任一依赖无法安装；此时目标目录保持原状
    pub async fn install(
        &self,
        manifest: &DependencyManifest,
        target: &Path,
    ) -> Result<InstallOutcome, InstallError> {
        self.install_with_reference(manifest, target, None).await
    }

    /// 安装依赖环境，并要求复用的环境与参考环境版本一致
    ///
    /// 锁文件记录的清单摘要相同，但已安装版本与 `reference` 不同时重新安装。
    /// 运行时镜像以产物中的构建环境作为参考，上游发布新版本后不会沿用旧的解析结果
    pub async fn install_matching(
        &self,
        manifest: &DependencyManifest,
        target: &Path,
        reference: &ResolvedEnvironment,
    ) -> Result<InstallOutcome, InstallError> {
        self.install_with_reference(manifest, target, Some(reference))
            .await
    }

    async fn install_with_reference(
        &self,
        manifest: &DependencyManifest,
        target: &Path,
        reference: Option<&ResolvedEnvironment>,
    ) -> Result<InstallOutcome, InstallError> {
        let digest = manifest.digest();

        if let Some(existing) = ResolvedEnvironment::read_lock(target).await? {
            let stale = reference
                .map(|r| existing.drift_against(r))
                .unwrap_or_default();
            if existing.manifest_digest == digest && stale.is_empty() {
                info!(
                    target = %target.display(),
                    packages = existing.packages.len(),
                    "environment already satisfies manifest"
                );
                return Ok(InstallOutcome {
                    environment: existing,
                    changed: false,
                });
            }
            if stale.is_empty() {
                debug!(target = %target.display(), "manifest changed, reinstalling");
            } else {
                debug!(
                    target = %target.display(),
                    stale = stale.len(),
                    "locked versions differ from reference, reinstalling"
                );
            }
        }

        let staging = staging_dir(target);
        fs::create_dir_all(&staging).await?;

        info!(
            resolver = self.resolver.name(),
            requirements = manifest.len(),
            target = %target.display(),
            "installing environment"
        );

        let environment = match self.install_into(manifest, &staging, &digest).await {
            Ok(environment) => environment,
            Err(e) => {
                remove_quietly(&staging).await;
                return Err(e);
            }
        };

        if let Err(e) = replace_dir(&staging, target).await {
            remove_quietly(&staging).await;
            return Err(e.into());
        }

        info!(
            target = %target.display(),
            packages = environment.packages.len(),
            "environment installed"
        );
        Ok(InstallOutcome {
            environment,
            changed: true,
        })
    }

    async fn install_into(
        &self,
        manifest: &DependencyManifest,
        staging: &Path,
        digest: &str,
    ) -> Result<ResolvedEnvironment, InstallError> {
        let packages = self.resolver.install(manifest, staging).await?;
        let environment = ResolvedEnvironment::new(digest, packages);

        if let Some(name) = environment.unsatisfied(manifest).first() {
            let constraint = manifest
                .get(name)
                .map(|r| r.constraint.to_string())
                .unwrap_or_default();
            return Err(InstallError::Unsatisfied {
                resolver: self.resolver.name().to_string(),
                name: name.to_string(),
                constraint,
            });
        }

        environment.write_lock(staging).await?;
        Ok(environment)
    }
}

/// 与目标目录同级的暂存目录
fn staging_dir(target: &Path) -> PathBuf {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "env".to_string());
    parent.join(format!(".{}.{}.staging", name, Uuid::new_v4().simple()))
}

/// 用暂存目录替换目标目录
async fn replace_dir(staging: &Path, target: &Path) -> std::io::Result<()> {
    if fs::try_exists(target).await? {
        let retired = target.with_file_name(format!(
            ".{}.{}.old",
            target
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            Uuid::new_v4().simple()
        ));
        fs::rename(target, &retired).await?;
        if let Err(e) = fs::rename(staging, target).await {
            // 尽量恢复原环境
            let _ = fs::rename(&retired, target).await;
            return Err(e);
        }
        remove_quietly(&retired).await;
        Ok(())
    } else {
        fs::rename(staging, target).await
    }
}

async fn remove_quietly(dir: &Path) {
    if let Err(e) = fs::remove_dir_all(dir).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %dir.display(), error = %e, "failed to remove directory");
        }
    }
}

#[cfg(test)]
#[path = "environment_installer_test.rs"]
mod tests;
