// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::domain::models::artifact::{ArtifactVersion, BuiltArtifact};

/// 产物仓库错误类型
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// 项目名称不能用作目录名
    #[error("invalid project name `{0}`")]
    InvalidProject(String),
    /// 版本号不是下一个可用版本
    #[error("project `{project}` expects version {expected}, got {actual}")]
    VersionConflict {
        project: String,
        expected: ArtifactVersion,
        actual: ArtifactVersion,
    },
    /// 版本已存在，不允许覆盖
    #[error("version {version} of `{project}` already exists")]
    VersionExists {
        project: String,
        version: ArtifactVersion,
    },
    /// 版本不存在
    #[error("version {version} of `{project}` not found")]
    NotFound {
        project: String,
        version: ArtifactVersion,
    },
    /// 摘要不一致
    #[error("digest mismatch for {path}: expected {expected}, found {actual}")]
    DigestMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    /// 版本登记文件损坏
    #[error("corrupt version registry: {0}")]
    Corrupt(String),
}

/// 已发布的产物版本记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedVersion {
    pub version: ArtifactVersion,
    pub file_digest: String,
    pub size: u64,
    pub published_at: DateTime<Utc>,
}

/// 产物仓库特质
///
/// 按项目名称组织的只追加版本登记表。版本从 1 开始严格递增，已发布版本不可覆盖，
/// 仓库本身从不删除旧版本
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// 下一个可用版本号
    async fn next_version(&self, project: &str) -> Result<ArtifactVersion, StoreError>;

    /// 将产物发布到其版本槽位
    async fn publish(&self, artifact: &BuiltArtifact) -> Result<PublishedVersion, StoreError>;

    /// 列出项目的全部已发布版本（升序）
    async fn versions(&self, project: &str) -> Result<Vec<PublishedVersion>, StoreError>;

    /// 最新已发布版本
    async fn latest(&self, project: &str) -> Result<Option<PublishedVersion>, StoreError> {
        Ok(self.versions(project).await?.into_iter().last())
    }

    /// 校验已发布产物的完整性，返回其路径
    async fn verify(&self, project: &str, version: ArtifactVersion)
        -> Result<PathBuf, StoreError>;

    /// 版本槽位路径
    fn artifact_path(&self, project: &str, version: ArtifactVersion) -> PathBuf;
}
