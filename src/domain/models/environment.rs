// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::models::manifest::{normalize_name, DependencyManifest};
use crate::domain::models::version::Version;

/// 环境锁文件名
pub const LOCK_FILE: &str = "environment.lock.json";

/// 已安装的依赖库
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub version: Version,
}

impl InstalledPackage {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// 运行时与构建环境之间的版本差异
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDrift {
    pub name: String,
    pub expected: Option<Version>,
    pub actual: Version,
}

impl fmt::Display for PackageDrift {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.expected {
            Some(expected) => write!(f, "{} {} (built with {})", self.name, self.actual, expected),
            None => write!(f, "{} {} (absent at build time)", self.name, self.actual),
        }
    }
}

/// 已解析的依赖环境
///
/// 记录满足某个清单的具体依赖版本集合，以及该清单的摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEnvironment {
    /// 所满足清单的摘要
    pub manifest_digest: String,
    /// 已安装依赖，按规范化名称排序
    pub packages: Vec<InstalledPackage>,
}

impl ResolvedEnvironment {
    pub fn new(manifest_digest: impl Into<String>, mut packages: Vec<InstalledPackage>) -> Self {
        packages.sort_by_key(|p| normalize_name(&p.name));
        packages.dedup_by_key(|p| normalize_name(&p.name));
        Self {
            manifest_digest: manifest_digest.into(),
            packages,
        }
    }

    pub fn get(&self, name: &str) -> Option<&InstalledPackage> {
        let normalized = normalize_name(name);
        self.packages
            .iter()
            .find(|p| normalize_name(&p.name) == normalized)
    }

    /// 找出清单中未被满足的依赖名称
    pub fn unsatisfied<'a>(&self, manifest: &'a DependencyManifest) -> Vec<&'a str> {
        manifest
            .requirements()
            .iter()
            .filter(|r| {
                self.get(&r.name)
                    .map_or(true, |p| !r.constraint.matches(&p.version))
            })
            .map(|r| r.name.as_str())
            .collect()
    }

    /// 与参考环境比较版本差异
    ///
    /// 只检查本环境中的依赖；参考环境里多出的依赖（例如仅构建阶段需要的）不算差异
    pub fn drift_against(&self, reference: &ResolvedEnvironment) -> Vec<PackageDrift> {
        self.packages
            .iter()
            .filter_map(|package| match reference.get(&package.name) {
                Some(expected) if expected.version == package.version => None,
                Some(expected) => Some(PackageDrift {
                    name: package.name.clone(),
                    expected: Some(expected.version.clone()),
                    actual: package.version.clone(),
                }),
                None => Some(PackageDrift {
                    name: package.name.clone(),
                    expected: None,
                    actual: package.version.clone(),
                }),
            })
            .collect()
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut data = serde_json::to_vec_pretty(self)?;
        data.push(b'\n');
        Ok(data)
    }

    /// 读取目录中的锁文件，不存在时返回 None
    pub async fn read_lock(dir: &Path) -> std::io::Result<Option<Self>> {
        match tokio::fs::read(dir.join(LOCK_FILE)).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub async fn write_lock(&self, dir: &Path) -> std::io::Result<()> {
        let data = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        crate::utils::fs::write_atomic(&dir.join(LOCK_FILE), &data).await
    }
}
