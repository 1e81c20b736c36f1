// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::models::version::{VersionConstraint, VersionParseError};
use crate::utils::digest::sha256_hex;

/// 标记仅在构建阶段需要的依赖
pub const BUILD_ONLY_MARKER: &str = "build-only";

const MANIFEST_HEADER: &str = "# generated by crawlship; do not edit\n";

/// 清单解析错误
#[derive(Error, Debug)]
pub enum ManifestParseError {
    #[error("line {line}: invalid requirement `{content}`")]
    InvalidRequirement { line: usize, content: String },
    #[error("line {line}: {source}")]
    InvalidConstraint {
        line: usize,
        #[source]
        source: VersionParseError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// 规范化依赖库名称
///
/// 小写，并将 `_` 与 `.` 统一为 `-`，用于比较和排序
pub fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(['_', '.'], "-")
}

/// 单条依赖声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// 发行包名称
    pub name: String,
    /// 版本约束
    pub constraint: VersionConstraint,
    /// 是否仅在构建阶段需要
    #[serde(default)]
    pub build_only: bool,
}

impl Requirement {
    pub fn new(name: impl Into<String>, constraint: VersionConstraint) -> Self {
        Self {
            name: name.into(),
            constraint,
            build_only: false,
        }
    }

    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    fn parse_numbered(line: &str, number: usize) -> Result<Option<Requirement>, ManifestParseError> {
        let (body, comment) = match line.split_once('#') {
            Some((body, comment)) => (body.trim(), Some(comment.trim())),
            None => (line.trim(), None),
        };
        if body.is_empty() {
            return Ok(None);
        }

        let name_end = body
            .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
            .unwrap_or(body.len());
        let (name, rest) = body.split_at(name_end);
        if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(ManifestParseError::InvalidRequirement {
                line: number,
                content: line.to_string(),
            });
        }

        let constraint = rest
            .parse::<VersionConstraint>()
            .map_err(|source| ManifestParseError::InvalidConstraint {
                line: number,
                source,
            })?;

        Ok(Some(Requirement {
            name: name.to_string(),
            constraint,
            build_only: comment == Some(BUILD_ONLY_MARKER),
        }))
    }

    fn to_line(&self) -> String {
        let mut line = format!("{}{}", self.name, self.constraint);
        if self.build_only {
            line.push_str(&format!("  # {}", BUILD_ONLY_MARKER));
        }
        line
    }
}

/// 依赖清单
///
/// 有序的依赖声明列表，按规范化名称排序，保证相同输入生成完全相同的文件
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DependencyManifest {
    requirements: Vec<Requirement>,
}

impl DependencyManifest {
    /// 创建清单，同名依赖的约束会合并
    pub fn new(requirements: Vec<Requirement>) -> Self {
        let mut merged: BTreeMap<String, Requirement> = BTreeMap::new();
        for requirement in requirements {
            match merged.get_mut(&requirement.normalized_name()) {
                Some(existing) => {
                    existing.constraint = existing.constraint.intersect(&requirement.constraint);
                    // 任一声明需要运行时即视为运行时依赖
                    existing.build_only &= requirement.build_only;
                }
                None => {
                    merged.insert(requirement.normalized_name(), requirement);
                }
            }
        }
        Self {
            requirements: merged.into_values().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    pub fn get(&self, name: &str) -> Option<&Requirement> {
        let normalized = normalize_name(name);
        self.requirements
            .iter()
            .find(|r| r.normalized_name() == normalized)
    }

    /// 运行时子集：去掉仅构建阶段需要的依赖
    pub fn runtime_subset(&self) -> DependencyManifest {
        DependencyManifest {
            requirements: self
                .requirements
                .iter()
                .filter(|r| !r.build_only)
                .cloned()
                .collect(),
        }
    }

    /// 渲染为 requirements 文件格式
    pub fn render(&self) -> String {
        let mut out = String::from(MANIFEST_HEADER);
        for requirement in &self.requirements {
            out.push_str(&requirement.to_line());
            out.push('\n');
        }
        out
    }

    pub fn parse(content: &str) -> Result<Self, ManifestParseError> {
        let mut requirements = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if let Some(requirement) = Requirement::parse_numbered(line, index + 1)? {
                requirements.push(requirement);
            }
        }
        Ok(Self::new(requirements))
    }

    /// 清单内容摘要，用于判断环境是否需要重新安装
    pub fn digest(&self) -> String {
        sha256_hex(self.render().as_bytes())
    }

    pub async fn write_to(&self, path: &Path) -> std::io::Result<()> {
        crate::utils::fs::write_atomic(path, self.render().as_bytes()).await
    }

    pub async fn read_from(path: &Path) -> Result<Self, ManifestParseError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }
}

impl fmt::Display for DependencyManifest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.render())
    }
}
