// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::config::settings::Settings;
use crate::domain::models::artifact::{ArtifactVersion, BuiltArtifact};
use crate::domain::models::handoff::BuildOutput;
use crate::domain::models::manifest::DependencyManifest;
use crate::domain::services::artifact_builder::{ArtifactBuilder, ArtifactInput};
use crate::domain::services::environment_installer::{EnvironmentInstaller, PackageResolver};
use crate::domain::services::manifest_generator::ManifestGenerator;
use crate::utils::errors::{BuildError, PipelineError};
use crate::utils::fs::write_atomic;

/// 工作区内的依赖环境目录
const ENV_DIR: &str = "env";
/// 工作区内的产物输出目录
const OUT_DIR: &str = "out";

/// 构建工作区
enum Workspace {
    /// 结束后自动删除
    Temporary(TempDir),
    /// 配置指定并保留的目录
    Kept(PathBuf),
}

impl Workspace {
    fn path(&self) -> &Path {
        match self {
            Workspace::Temporary(dir) => dir.path(),
            Workspace::Kept(path) => path,
        }
    }
}

/// 构建阶段
///
/// 在一次性工作区中依次执行清单生成、依赖安装与产物构建，
/// 最后只把清单与产物两个文件复制到输出目录，并写入交接文件
pub struct BuildStage {
    project: String,
    source: PathBuf,
    output_dir: PathBuf,
    workspace: Option<PathBuf>,
    keep_workspace: bool,
    manifest_file: String,
    generator: ManifestGenerator,
    installer: EnvironmentInstaller,
    builder: ArtifactBuilder,
}

impl BuildStage {
    /// 根据配置创建构建阶段
    ///
    /// # 参数
    ///
    /// * `settings` - 应用配置
    /// * `resolver` - 依赖解析器
    ///
    /// # 返回值
    ///
    /// * `Ok(BuildStage)` - 构建阶段
    /// * `Err(PipelineError)` - 清单配置不合法
    pub fn new(
        settings: &Settings,
        resolver: Arc<dyn PackageResolver>,
    ) -> Result<Self, PipelineError> {
        let source = settings.project.source.clone();

        // 输出目录或工作区位于源码目录内时不能被扫描或打包
        let mut exclude = settings.project.exclude.clone();
        let nested = [
            Some(settings.build.output_dir.as_path()),
            settings.build.workspace.as_deref(),
        ];
        for dir in nested.into_iter().flatten() {
            if let Some(pattern) = nested_pattern(&source, dir) {
                debug!(pattern = %pattern, "excluding nested build directory from source");
                exclude.push(pattern);
            }
        }

        Ok(Self {
            project: settings.project.name.clone(),
            source,
            output_dir: settings.build.output_dir.clone(),
            workspace: settings.build.workspace.clone(),
            keep_workspace: settings.build.keep_workspace,
            manifest_file: settings.manifest.file_name.clone(),
            generator: ManifestGenerator::from_settings(
                &settings.manifest,
                &settings.build,
                &exclude,
            )?,
            installer: EnvironmentInstaller::new(resolver),
            builder: ArtifactBuilder::from_settings(&settings.build, &exclude),
        })
    }

    /// 执行构建阶段
    ///
    /// 任一步骤失败都会立即终止，输出目录不会收到任何文件
    ///
    /// # 参数
    ///
    /// * `version` - 产物版本号
    ///
    /// # 返回值
    ///
    /// * `Ok(BuildOutput)` - 交接对象，已写入输出目录的 `handoff.json`
    /// * `Err(PipelineError)` - 出错的阶段与原因
    pub async fn run(&self, version: ArtifactVersion) -> Result<BuildOutput, PipelineError> {
        let workspace = self.open_workspace().await?;
        let root = workspace.path();
        info!(
            project = %self.project,
            version = %version,
            source = %self.source.display(),
            workspace = %root.display(),
            "build stage started"
        );

        // 1. 生成清单
        let manifest_path = root.join(&self.manifest_file);
        let generated = self.generator.generate_to(&self.source, &manifest_path).await?;
        if !generated.warnings.is_empty() {
            warn!(
                count = generated.warnings.len(),
                "manifest generated with skipped files"
            );
        }

        // 2. 按清单文件安装构建环境
        let manifest = DependencyManifest::read_from(&manifest_path).await?;
        let env_dir = root.join(ENV_DIR);
        let outcome = self.installer.install(&manifest, &env_dir).await?;

        // 3. 构建产物
        let artifact = self
            .builder
            .build(ArtifactInput {
                project: &self.project,
                version,
                source: &self.source,
                manifest: &manifest,
                environment: &outcome.environment,
                environment_dir: &env_dir,
                output_dir: &root.join(OUT_DIR),
            })
            .await?;

        // 4. 只复制清单与产物
        let output = self
            .export(manifest, &manifest_path, artifact)
            .await
            .map_err(BuildError::from)?;

        if let Workspace::Kept(path) = &workspace {
            info!(workspace = %path.display(), "build workspace kept");
        }
        info!(
            project = %output.project,
            version = %output.version,
            artifact = %output.artifact.path.display(),
            "build stage finished"
        );
        Ok(output)
    }

    async fn open_workspace(&self) -> Result<Workspace, BuildError> {
        let workspace = match (&self.workspace, self.keep_workspace) {
            (Some(path), true) => {
                fs::create_dir_all(path).await?;
                Workspace::Kept(path.clone())
            }
            (Some(path), false) => {
                fs::create_dir_all(path).await?;
                Workspace::Temporary(
                    tempfile::Builder::new()
                        .prefix("crawlship-build-")
                        .tempdir_in(path)?,
                )
            }
            (None, keep) => {
                let dir = tempfile::Builder::new()
                    .prefix("crawlship-build-")
                    .keep(keep)
                    .tempdir()?;
                if keep {
                    Workspace::Kept(dir.path().to_path_buf())
                } else {
                    Workspace::Temporary(dir)
                }
            }
        };
        Ok(workspace)
    }

    /// 将清单与产物复制到输出目录并写入交接文件
    async fn export(
        &self,
        manifest: DependencyManifest,
        manifest_path: &Path,
        mut artifact: BuiltArtifact,
    ) -> std::io::Result<BuildOutput> {
        fs::create_dir_all(&self.output_dir).await?;

        let exported_manifest = self.output_dir.join(&self.manifest_file);
        write_atomic(&exported_manifest, &fs::read(manifest_path).await?).await?;

        let file_name = artifact
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.project.clone());
        let exported_artifact = self.output_dir.join(&file_name);
        let partial = self.output_dir.join(format!(".{}.partial", file_name));
        if let Err(e) = copy_then_rename(&artifact.path, &partial, &exported_artifact).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }
        artifact.path = exported_artifact;

        let output = BuildOutput {
            project: self.project.clone(),
            version: artifact.version,
            manifest,
            manifest_path: exported_manifest,
            artifact,
            built_at: Utc::now(),
        };
        let handoff = output.write_to(&self.output_dir).await?;
        debug!(handoff = %handoff.display(), "hand-off written");
        Ok(output)
    }
}

async fn copy_then_rename(src: &Path, partial: &Path, target: &Path) -> std::io::Result<()> {
    fs::copy(src, partial).await?;
    fs::File::open(partial).await?.sync_all().await?;
    fs::rename(partial, target).await
}

/// 位于源码目录内的目录对应的排除规则
fn nested_pattern(source: &Path, dir: &Path) -> Option<String> {
    let source = std::path::absolute(source).ok()?;
    let dir = std::path::absolute(dir).ok()?;
    let relative = dir.strip_prefix(&source).ok()?;
    if relative.as_os_str().is_empty() {
        return None;
    }
    Some(format!("{}/", relative.to_string_lossy()))
}

#[cfg(test)]
#[path = "build_stage_test.rs"]
mod tests;
