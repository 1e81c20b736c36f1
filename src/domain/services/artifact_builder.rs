// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::config::settings::BuildSettings;
use crate::domain::models::artifact::{
    artifact_file_name, ArtifactMetadata, ArtifactVersion, BuiltArtifact, DEPS_PREFIX,
    MANIFEST_ENTRY, METADATA_ENTRY, SOURCE_PREFIX,
};
use crate::domain::models::environment::{ResolvedEnvironment, LOCK_FILE};
use crate::domain::models::manifest::DependencyManifest;
use crate::infrastructure::archive::{
    archive_path, digest_entries, read_entries, write_archive, ArchiveEntry,
};
use crate::utils::digest::sha256_file;
use crate::utils::errors::BuildError;
use crate::utils::fs::{collect_files, ExcludeSet};
use crate::utils::process::{render_args, run_captured, ProcessError};

/// 产物构建输入
#[derive(Debug, Clone, Copy)]
pub struct ArtifactInput<'a> {
    pub project: &'a str,
    pub version: ArtifactVersion,
    /// 项目源码目录
    pub source: &'a Path,
    pub manifest: &'a DependencyManifest,
    /// 构建阶段安装的依赖环境
    pub environment: &'a ResolvedEnvironment,
    pub environment_dir: &'a Path,
    /// 产物输出目录
    pub output_dir: &'a Path,
}

/// 产物构建服务
///
/// 将项目源码、清单与环境锁打包为单个可复现的产物文件
pub struct ArtifactBuilder {
    excludes: Vec<String>,
    project_marker: String,
    check_command: Vec<String>,
    check_timeout: Duration,
    bundle_dependencies: bool,
}

impl ArtifactBuilder {
    pub fn from_settings(build: &BuildSettings, exclude: &[String]) -> Self {
        Self {
            excludes: exclude.to_vec(),
            project_marker: build.project_marker.clone(),
            check_command: build.check_command.clone(),
            check_timeout: build.check_timeout(),
            bundle_dependencies: build.bundle_dependencies,
        }
    }

    /// 构建产物
    ///
    /// # 参数
    ///
    /// * `input` - 源码、清单、依赖环境与输出位置
    ///
    /// # 返回值
    ///
    /// * `Ok(BuiltArtifact)` - 输出目录中的产物文件 `<project>.<version>`
    /// * `Err(BuildError)` - 校验或打包失败，输出目录中不会留下产物
    pub async fn build(&self, input: ArtifactInput<'_>) -> Result<BuiltArtifact, BuildError> {
        let files = self.validate_source(input.source).await?;

        let manifest_digest = input.manifest.digest();
        if input.environment.manifest_digest != manifest_digest {
            return Err(BuildError::EnvironmentMismatch {
                manifest: manifest_digest,
                environment: input.environment.manifest_digest.clone(),
            });
        }

        self.run_check(input.source).await?;

        let mut entries = vec![
            ArchiveEntry::bytes(MANIFEST_ENTRY, input.manifest.render()),
            ArchiveEntry::bytes(LOCK_FILE, input.environment.to_json()?),
        ];
        let source_files = files.len();
        entries.extend(
            files
                .iter()
                .map(|f| ArchiveEntry::file(archive_path(SOURCE_PREFIX, f), input.source.join(f))),
        );
        if self.bundle_dependencies {
            entries.extend(self.dependency_entries(input.environment_dir).await?);
        }

        let content_digest = digest_entries(entries.clone()).await?;
        let metadata = ArtifactMetadata {
            schema_version: ArtifactMetadata::SCHEMA_VERSION,
            project: input.project.to_string(),
            version: input.version,
            manifest_digest,
            content_digest: content_digest.clone(),
            source_files,
            bundles_dependencies: self.bundle_dependencies,
            builder: format!("crawlship {}", env!("CARGO_PKG_VERSION")),
        };
        entries.push(ArchiveEntry::bytes(
            METADATA_ENTRY,
            serde_json::to_vec_pretty(&metadata)?,
        ));

        fs::create_dir_all(input.output_dir).await?;
        let file_name = artifact_file_name(input.project, input.version);
        let target = input.output_dir.join(&file_name);
        let partial = input.output_dir.join(format!(".{}.partial", file_name));

        let (size, file_digest) = match write_and_digest(&partial, entries).await {
            Ok(result) => result,
            Err(e) => {
                remove_partial(&partial).await;
                return Err(e.into());
            }
        };
        if let Err(e) = fs::rename(&partial, &target).await {
            remove_partial(&partial).await;
            return Err(e.into());
        }

        info!(
            project = input.project,
            version = %input.version,
            path = %target.display(),
            size,
            source_files,
            "artifact built"
        );

        Ok(BuiltArtifact {
            project: input.project.to_string(),
            version: input.version,
            path: target,
            file_digest,
            content_digest,
            size,
        })
    }

    /// 读取产物中的元数据与环境锁
    pub async fn read_metadata(
        path: &Path,
    ) -> Result<(ArtifactMetadata, ResolvedEnvironment), BuildError> {
        let malformed = |reason: String| BuildError::MalformedArtifact {
            path: path.to_path_buf(),
            reason,
        };

        let mut found = read_entries(path, &[METADATA_ENTRY, LOCK_FILE])
            .await
            .map_err(|e| malformed(e.to_string()))?;
        let metadata = found
            .remove(METADATA_ENTRY)
            .ok_or_else(|| malformed(format!("missing {}", METADATA_ENTRY)))?;
        let lock = found
            .remove(LOCK_FILE)
            .ok_or_else(|| malformed(format!("missing {}", LOCK_FILE)))?;

        let metadata: ArtifactMetadata =
            serde_json::from_slice(&metadata).map_err(|e| malformed(e.to_string()))?;
        let environment: ResolvedEnvironment =
            serde_json::from_slice(&lock).map_err(|e| malformed(e.to_string()))?;
        Ok((metadata, environment))
    }

    async fn validate_source(&self, source: &Path) -> Result<Vec<PathBuf>, BuildError> {
        let invalid = |reason: &str| BuildError::InvalidSource {
            path: source.to_path_buf(),
            reason: reason.to_string(),
        };

        if !fs::metadata(source)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            return Err(invalid("not a directory"));
        }

        let root = source.to_path_buf();
        let excludes = ExcludeSet::new(&self.excludes);
        let files = spawn_blocking(move || collect_files(&root, &excludes))
            .await
            .map_err(std::io::Error::from)??;

        if files.is_empty() {
            return Err(invalid("contains no files"));
        }
        if !self.project_marker.is_empty()
            && !files.iter().any(|f| f == Path::new(&self.project_marker))
        {
            return Err(invalid(&format!("missing project marker {}", self.project_marker)));
        }
        debug!(source = %source.display(), files = files.len(), "project source validated");
        Ok(files)
    }

    async fn run_check(&self, source: &Path) -> Result<(), BuildError> {
        let rendered = render_args(
            &self.check_command,
            &[("source", source.to_string_lossy().to_string())],
        );
        let Some((program, args)) = rendered.split_first() else {
            return Ok(());
        };

        let output = run_captured(program, args, Some(source), self.check_timeout)
            .await
            .map_err(|e| match e {
                ProcessError::Spawn { program, source } => BuildError::CheckFailed {
                    program,
                    code: None,
                    stderr: source.to_string(),
                },
                ProcessError::Timeout(program) => BuildError::CheckTimeout(program),
            })?;

        if !output.success() {
            return Err(BuildError::CheckFailed {
                program: program.clone(),
                code: output.code,
                stderr: output.stderr_tail(),
            });
        }
        debug!(program = %program, "build check passed");
        Ok(())
    }

    async fn dependency_entries(&self, environment_dir: &Path) -> Result<Vec<ArchiveEntry>, BuildError> {
        let root = environment_dir.to_path_buf();
        let excludes = ExcludeSet::new(&[LOCK_FILE, "__pycache__", "*.pyc"]);
        let files = spawn_blocking(move || collect_files(&root, &excludes))
            .await
            .map_err(std::io::Error::from)??;
        Ok(files
            .iter()
            .map(|f| ArchiveEntry::file(archive_path(DEPS_PREFIX, f), environment_dir.join(f)))
            .collect())
    }
}

async fn write_and_digest(
    path: &Path,
    entries: Vec<ArchiveEntry>,
) -> std::io::Result<(u64, String)> {
    let size = write_archive(path, entries).await?;
    let digest = sha256_file(path).await?;
    Ok((size, digest))
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove partial artifact");
        }
    }
}

#[cfg(test)]
#[path = "artifact_builder_test.rs"]
mod tests;
