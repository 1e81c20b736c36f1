// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::models::artifact::{ArtifactVersion, BuiltArtifact};
use crate::domain::models::manifest::DependencyManifest;

/// 交接文件名
pub const HANDOFF_FILE: &str = "handoff.json";

/// 构建阶段的输出
///
/// 构建阶段与运行时镜像之间唯一的交接对象：依赖清单与产物。
/// 构建工作区中的其它内容（包括已安装的构建环境）不会越过边界。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOutput {
    pub project: String,
    pub version: ArtifactVersion,
    pub manifest: DependencyManifest,
    pub manifest_path: PathBuf,
    pub artifact: BuiltArtifact,
    pub built_at: DateTime<Utc>,
}

impl BuildOutput {
    /// 写入交接文件
    pub async fn write_to(&self, dir: &Path) -> std::io::Result<PathBuf> {
        let path = dir.join(HANDOFF_FILE);
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        crate::utils::fs::write_atomic(&path, &data).await?;
        Ok(path)
    }

    /// 读取交接文件
    pub async fn read_from(path: &Path) -> std::io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        serde_json::from_slice(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
