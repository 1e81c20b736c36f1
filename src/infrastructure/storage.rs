// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::settings::StoreSettings;
use crate::domain::models::artifact::{is_valid_project_name, ArtifactVersion, BuiltArtifact};
use crate::domain::repositories::artifact_store::{ArtifactStore, PublishedVersion, StoreError};
use crate::utils::digest::sha256_file;
use crate::utils::fs::write_atomic;

const REGISTRY_SUFFIX: &str = ".registry";

/// 持久化的版本登记表
#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionRegistry {
    project: String,
    latest: u64,
    versions: Vec<PublishedVersion>,
}

/// 本地文件系统产物仓库
///
/// 布局：
/// - `<root>/<project>/<version><suffix>`：产物文件，根目录下只有项目目录
/// - `<root>/<project>/.<uuid>.partial`：发布过程中的临时文件，与版本槽位同一文件系统
/// - `<parent>/.<root-name>.registry/<project>.json`：版本计数与发布记录，位于根目录旁
pub struct LocalArtifactStore {
    root: PathBuf,
    registry_dir: PathBuf,
    suffix: String,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        let root = root.into();
        Self {
            registry_dir: registry_dir_for(&root),
            root,
            suffix: suffix.into(),
        }
    }

    /// 根据配置创建位于指定根目录下的仓库
    pub fn from_settings(root: impl Into<PathBuf>, settings: &StoreSettings) -> Self {
        Self::new(root, settings.artifact_suffix.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    pub fn registry_dir(&self) -> &Path {
        &self.registry_dir
    }

    fn registry_path(&self, project: &str) -> PathBuf {
        self.registry_dir.join(format!("{}.json", project))
    }

    fn check_project(project: &str) -> Result<(), StoreError> {
        if is_valid_project_name(project) {
            Ok(())
        } else {
            Err(StoreError::InvalidProject(project.to_string()))
        }
    }

    async fn read_registry(&self, project: &str) -> Result<VersionRegistry, StoreError> {
        match fs::read(self.registry_path(project)).await {
            Ok(data) => {
                let registry: VersionRegistry = serde_json::from_slice(&data)
                    .map_err(|e| StoreError::Corrupt(format!("{}: {}", project, e)))?;
                Ok(registry)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VersionRegistry {
                project: project.to_string(),
                ..Default::default()
            }),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_registry(&self, registry: &VersionRegistry) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(registry)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        write_atomic(&self.registry_path(&registry.project), &data).await?;
        Ok(())
    }

    /// 磁盘上已存在的最高版本号
    ///
    /// 产物已落盘但登记表未更新（例如进程中断）时，以磁盘为准，避免覆盖
    async fn highest_on_disk(&self, project: &str) -> Result<u64, StoreError> {
        let mut entries = match fs::read_dir(self.project_dir(project)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut highest = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let stem = name.strip_suffix(self.suffix.as_str()).unwrap_or(&name);
            if let Ok(version) = stem.parse::<u64>() {
                highest = highest.max(version);
            }
        }
        Ok(highest)
    }
}

/// 版本登记表目录：与仓库根目录同级的隐藏目录
///
/// 仓库根目录会被服务当作项目列表读取，其中只能有项目目录
fn registry_dir_for(root: &Path) -> PathBuf {
    match root.file_name() {
        Some(name) => {
            root.with_file_name(format!(".{}{}", name.to_string_lossy(), REGISTRY_SUFFIX))
        }
        None => root.join(REGISTRY_SUFFIX),
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn next_version(&self, project: &str) -> Result<ArtifactVersion, StoreError> {
        Self::check_project(project)?;
        let registry = self.read_registry(project).await?;
        let on_disk = self.highest_on_disk(project).await?;
        let latest = registry.latest.max(on_disk);
        latest
            .checked_add(1)
            .and_then(ArtifactVersion::new)
            .ok_or_else(|| StoreError::Corrupt(format!("{}: version counter exhausted", project)))
    }

    async fn publish(&self, artifact: &BuiltArtifact) -> Result<PublishedVersion, StoreError> {
        let project = artifact.project.as_str();
        Self::check_project(project)?;

        let expected = self.next_version(project).await?;
        if artifact.version != expected {
            return Err(StoreError::VersionConflict {
                project: project.to_string(),
                expected,
                actual: artifact.version,
            });
        }

        let target = self.artifact_path(project, artifact.version);
        if fs::try_exists(&target).await? {
            return Err(StoreError::VersionExists {
                project: project.to_string(),
                version: artifact.version,
            });
        }

        let project_dir = self.project_dir(project);
        fs::create_dir_all(&project_dir).await?;

        let staged = project_dir.join(format!(".{}.partial", Uuid::new_v4().simple()));
        let result = self.stage_and_link(artifact, &staged, &target).await;
        if let Err(e) = fs::remove_file(&staged).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %staged.display(), error = %e, "failed to clean staging file");
            }
        }
        let size = result?;

        let record = PublishedVersion {
            version: artifact.version,
            file_digest: artifact.file_digest.clone(),
            size,
            published_at: Utc::now(),
        };

        let mut registry = self.read_registry(project).await?;
        registry.project = project.to_string();
        registry.latest = registry.latest.max(artifact.version.get());
        registry.versions.retain(|v| v.version != artifact.version);
        registry.versions.push(record.clone());
        registry.versions.sort_by_key(|v| v.version);
        self.write_registry(&registry).await?;

        info!(
            project,
            version = %artifact.version,
            path = %target.display(),
            "artifact published"
        );
        Ok(record)
    }

    async fn versions(&self, project: &str) -> Result<Vec<PublishedVersion>, StoreError> {
        Self::check_project(project)?;
        let registry = self.read_registry(project).await?;
        Ok(registry.versions)
    }

    async fn verify(
        &self,
        project: &str,
        version: ArtifactVersion,
    ) -> Result<PathBuf, StoreError> {
        Self::check_project(project)?;
        let registry = self.read_registry(project).await?;
        let record = registry
            .versions
            .iter()
            .find(|v| v.version == version)
            .ok_or_else(|| StoreError::NotFound {
                project: project.to_string(),
                version,
            })?;

        let path = self.artifact_path(project, version);
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound {
                project: project.to_string(),
                version,
            });
        }

        let actual = sha256_file(&path).await?;
        if actual != record.file_digest {
            return Err(StoreError::DigestMismatch {
                path,
                expected: record.file_digest.clone(),
                actual,
            });
        }
        Ok(path)
    }

    fn artifact_path(&self, project: &str, version: ArtifactVersion) -> PathBuf {
        self.project_dir(project)
            .join(format!("{}{}", version, self.suffix))
    }
}

impl LocalArtifactStore {
    /// 复制到暂存区、校验摘要，再以硬链接方式放入版本槽位
    ///
    /// 硬链接在目标已存在时失败，因此已发布版本不会被覆盖
    async fn stage_and_link(
        &self,
        artifact: &BuiltArtifact,
        staged: &Path,
        target: &Path,
    ) -> Result<u64, StoreError> {
        let size = fs::copy(&artifact.path, staged).await?;
        fs::File::open(staged).await?.sync_all().await?;

        let actual = sha256_file(staged).await?;
        if actual != artifact.file_digest {
            return Err(StoreError::DigestMismatch {
                path: artifact.path.clone(),
                expected: artifact.file_digest.clone(),
                actual,
            });
        }

        match fs::hard_link(staged, target).await {
            Ok(()) => {
                debug!(target = %target.display(), size, "artifact linked into slot");
                Ok(size)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(StoreError::VersionExists {
                    project: artifact.project.clone(),
                    version: artifact.version,
                })
            }
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[cfg(test)]
#[path = "storage_test.rs"]
mod tests;
