// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// 产物内元数据文件名
pub const METADATA_ENTRY: &str = "ARTIFACT.json";
/// 产物内清单文件名
pub const MANIFEST_ENTRY: &str = "manifest.txt";
/// 产物内源码目录前缀
pub const SOURCE_PREFIX: &str = "source";
/// 产物内依赖目录前缀
pub const DEPS_PREFIX: &str = "deps";

/// 产物版本号
///
/// 同一项目下严格递增，首次部署为 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactVersion(u64);

impl ArtifactVersion {
    pub const FIRST: ArtifactVersion = ArtifactVersion(1);

    /// 创建版本号，0 不是合法版本
    pub fn new(value: u64) -> Option<Self> {
        (value > 0).then_some(ArtifactVersion(value))
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        ArtifactVersion(self.0 + 1)
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArtifactVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .ok()
            .and_then(ArtifactVersion::new)
            .ok_or_else(|| format!("invalid artifact version `{}`", s))
    }
}

/// 检查项目名称是否可以安全地用作目录名
pub fn is_valid_project_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name != "."
        && name != ".."
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// 产物文件名：`<project>.<version>`
pub fn artifact_file_name(project: &str, version: ArtifactVersion) -> String {
    format!("{}.{}", project, version)
}

/// 产物元数据
///
/// 作为 `ARTIFACT.json` 写入产物，除版本信息外，相同源码与清单生成的元数据完全一致
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub schema_version: u32,
    pub project: String,
    pub version: ArtifactVersion,
    pub manifest_digest: String,
    /// 除元数据外所有条目的内容摘要
    pub content_digest: String,
    pub source_files: usize,
    pub bundles_dependencies: bool,
    pub builder: String,
}

impl ArtifactMetadata {
    pub const SCHEMA_VERSION: u32 = 1;
}

/// 已构建的产物文件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuiltArtifact {
    pub project: String,
    pub version: ArtifactVersion,
    pub path: PathBuf,
    /// 产物文件字节的 SHA-256
    pub file_digest: String,
    pub content_digest: String,
    pub size: u64,
}
