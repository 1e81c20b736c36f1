// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::spawn_blocking;
use tracing::debug;

use crate::domain::models::environment::InstalledPackage;
use crate::domain::models::manifest::{normalize_name, DependencyManifest};
use crate::domain::models::version::Version;
use crate::domain::services::environment_installer::PackageResolver;
use crate::utils::errors::InstallError;
use crate::utils::fs::copy_tree;

/// 索引文件名
pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Deserialize)]
struct PackageIndex {
    packages: BTreeMap<String, Vec<Version>>,
}

/// 离线本地包索引解析器
///
/// 索引目录结构：
/// - `index.json`：`{"packages": {"Scrapy": ["2.11.0", "2.11.2"]}}`
/// - `<name>/<version>/`：可选的依赖内容，安装时复制到 `<target>/<name>/`
///
/// `<name>` 使用规范化名称
pub struct IndexResolver {
    root: PathBuf,
}

impl IndexResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn load_index(&self) -> Result<HashMap<String, (String, Vec<Version>)>, InstallError> {
        let path = self.root.join(INDEX_FILE);
        let data = tokio::fs::read(&path)
            .await
            .map_err(|e| InstallError::Index(format!("{}: {}", path.display(), e)))?;
        let index: PackageIndex = serde_json::from_slice(&data)
            .map_err(|e| InstallError::Index(format!("{}: {}", path.display(), e)))?;

        Ok(index
            .packages
            .into_iter()
            .map(|(name, versions)| (normalize_name(&name), (name, versions)))
            .collect())
    }
}

#[async_trait]
impl PackageResolver for IndexResolver {
    fn name(&self) -> &str {
        "index"
    }

    async fn install(
        &self,
        manifest: &DependencyManifest,
        target: &Path,
    ) -> Result<Vec<InstalledPackage>, InstallError> {
        let index = self.load_index().await?;

        // 先完成全部解析，再复制内容
        let mut selected = Vec::with_capacity(manifest.len());
        for requirement in manifest.requirements() {
            let normalized = requirement.normalized_name();
            let (name, versions) = index
                .get(&normalized)
                .ok_or_else(|| InstallError::UnknownPackage(requirement.name.clone()))?;
            let version = requirement
                .constraint
                .best_match(versions.iter())
                .ok_or_else(|| InstallError::Unsatisfiable {
                    name: requirement.name.clone(),
                    constraint: requirement.constraint.to_string(),
                    available: versions
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", "),
                })?;
            debug!(package = %name, version = %version, "resolved from index");
            selected.push((normalized, InstalledPackage::new(name.clone(), version.clone())));
        }

        for (normalized, package) in &selected {
            let payload = self
                .root
                .join(normalized)
                .join(package.version.to_string());
            if !tokio::fs::try_exists(&payload).await? {
                continue;
            }
            let destination = target.join(normalized);
            let copied = spawn_blocking(move || copy_tree(&payload, &destination))
                .await
                .map_err(|e| InstallError::Io(e.into()))??;
            debug!(package = %package.name, files = copied, "payload copied");
        }

        Ok(selected.into_iter().map(|(_, package)| package).collect())
    }
}
