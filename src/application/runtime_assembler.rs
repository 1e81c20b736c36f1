// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::fs;
use tracing::{debug, info};

use crate::config::settings::Settings;
use crate::domain::models::environment::ResolvedEnvironment;
use crate::domain::models::handoff::BuildOutput;
use crate::domain::models::image::{DaemonCommand, ImageReceipt};
use crate::domain::models::manifest::DependencyManifest;
use crate::domain::repositories::artifact_store::{ArtifactStore, StoreError};
use crate::domain::services::artifact_builder::ArtifactBuilder;
use crate::domain::services::environment_installer::{EnvironmentInstaller, PackageResolver};
use crate::infrastructure::storage::LocalArtifactStore;
use crate::utils::digest::sha256_file;
use crate::utils::errors::{AssembleError, PipelineError};
use crate::utils::fs::write_atomic;

/// 不允许出现在运行时镜像中的构建工具链
const TOOLCHAIN_PACKAGES: &[&str] = &[
    "autoconf",
    "automake",
    "binutils",
    "build-essential",
    "c++",
    "cargo",
    "cc",
    "clang",
    "cmake",
    "g++",
    "gcc",
    "libtool",
    "make",
    "pkg-config",
    "rustc",
];

/// 判断系统包是否属于构建工具链
///
/// 除固定名单外，`-dev`/`-devel` 头文件包以及 `gcc-12` 这类带版本号的编译器也算
pub fn is_toolchain_package(name: &str) -> bool {
    let name = name.trim().to_ascii_lowercase();
    if TOOLCHAIN_PACKAGES.contains(&name.as_str()) {
        return true;
    }
    if name.ends_with("-dev") || name.ends_with("-devel") {
        return true;
    }
    ["gcc-", "g++-", "clang-", "llvm-"].iter().any(|prefix| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with(|c: char| c.is_ascii_digit()))
    })
}

/// 运行时镜像组装器
///
/// 只接收构建阶段的交接对象（清单与产物），不会重新构建产物。
/// 镜像回执在所有步骤成功后最后写入
pub struct RuntimeAssembler {
    settings: Settings,
    installer: EnvironmentInstaller,
    store: Arc<dyn ArtifactStore>,
}

impl RuntimeAssembler {
    pub fn new(
        settings: &Settings,
        resolver: Arc<dyn PackageResolver>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            settings: settings.clone(),
            installer: EnvironmentInstaller::new(resolver),
            store,
        }
    }

    /// 使用镜像内的本地产物仓库
    pub fn from_settings(settings: &Settings, resolver: Arc<dyn PackageResolver>) -> Self {
        let store = LocalArtifactStore::from_settings(
            settings.image_path(&settings.store.root),
            &settings.store,
        );
        Self::new(settings, resolver, Arc::new(store))
    }

    /// 组装运行时镜像
    ///
    /// # 参数
    ///
    /// * `output` - 构建阶段的交接对象
    ///
    /// # 返回值
    ///
    /// * `Ok(ImageReceipt)` - 已写入镜像根目录的回执
    /// * `Err(PipelineError)` - 任一检查失败；此时产物不会被发布
    pub async fn assemble(&self, output: &BuildOutput) -> Result<ImageReceipt, PipelineError> {
        let image = &self.settings.image;
        info!(
            project = %output.project,
            version = %output.version,
            image_root = %image.root.display(),
            "assembling runtime image"
        );

        // 1. 运行时系统库中不能混入构建工具链
        let toolchain: Vec<String> = image
            .runtime_libraries
            .iter()
            .filter(|name| is_toolchain_package(name))
            .cloned()
            .collect();
        if !toolchain.is_empty() {
            return Err(AssembleError::ToolchainInRuntime(toolchain).into());
        }

        // 2. 产物必须与交接对象一致
        let build_environment = self.verify_artifact(output).await?;
        self.ensure_slot_free(output).await?;

        // 3. 复制清单
        let manifest = self.import_manifest(output).await?;

        // 4. 在镜像中安装运行时依赖并检查版本漂移
        let runtime = manifest.runtime_subset();
        let env_dir = self.settings.image_path(&image.environment_dir);
        let outcome = self
            .installer
            .install_matching(&runtime, &env_dir, &build_environment)
            .await?;
        let drift = outcome.environment.drift_against(&build_environment);
        if !drift.is_empty() {
            return Err(AssembleError::Drift(drift).into());
        }

        // 5. 安装服务配置
        self.install_service_config().await?;

        // 6. 发布产物
        let published = self.store.publish(&output.artifact).await?;
        debug!(
            version = %published.version,
            digest = %published.file_digest,
            "artifact published"
        );

        // 7. 最后写入回执
        let runtime_store =
            LocalArtifactStore::from_settings(&self.settings.store.root, &self.settings.store);
        let receipt = ImageReceipt {
            schema_version: ImageReceipt::SCHEMA_VERSION,
            project: output.project.clone(),
            version: output.version,
            artifact_path: runtime_store.artifact_path(&output.project, output.version),
            file_digest: published.file_digest,
            runtime_libraries: image.runtime_libraries.clone(),
            environment: outcome.environment,
            daemon: DaemonCommand {
                program: self.settings.service.program.clone(),
                args: self.settings.service.args.clone(),
            },
            bind_address: self.settings.service.bind_address.clone(),
            port: self.settings.service.port,
            config_mount: self.settings.service.config_mount.clone(),
            state_mount: self.settings.service.state_mount.clone(),
            store_root: self.settings.store.root.clone(),
            config_path: image.config_path.clone(),
            assembled_at: Utc::now(),
        };
        receipt
            .write_to(&image.root)
            .await
            .map_err(AssembleError::from)?;

        info!(
            project = %receipt.project,
            version = %receipt.version,
            artifact = %receipt.artifact_path.display(),
            "runtime image assembled"
        );
        Ok(receipt)
    }

    /// 校验产物文件与元数据，返回产物中记录的构建环境
    async fn verify_artifact(
        &self,
        output: &BuildOutput,
    ) -> Result<ResolvedEnvironment, AssembleError> {
        let artifact = &output.artifact;
        let actual = sha256_file(&artifact.path).await?;
        if actual != artifact.file_digest {
            return Err(AssembleError::ArtifactTampered {
                path: artifact.path.clone(),
                expected: artifact.file_digest.clone(),
                actual,
            });
        }

        let (metadata, environment) = ArtifactBuilder::read_metadata(&artifact.path)
            .await
            .map_err(|e| AssembleError::MetadataMismatch(e.to_string()))?;

        let mut mismatches = Vec::new();
        if metadata.project != output.project || artifact.project != output.project {
            mismatches.push(format!("project `{}`", metadata.project));
        }
        if metadata.version != output.version || artifact.version != output.version {
            mismatches.push(format!("version {}", metadata.version));
        }
        if metadata.manifest_digest != output.manifest.digest() {
            mismatches.push("manifest digest".to_string());
        }
        if metadata.content_digest != artifact.content_digest {
            mismatches.push("content digest".to_string());
        }
        if !mismatches.is_empty() {
            return Err(AssembleError::MetadataMismatch(mismatches.join(", ")));
        }

        debug!(path = %artifact.path.display(), "artifact verified");
        Ok(environment)
    }

    /// 在修改镜像之前确认版本槽位可用
    async fn ensure_slot_free(&self, output: &BuildOutput) -> Result<(), StoreError> {
        let published = self.store.versions(&output.project).await?;
        if published.iter().any(|p| p.version == output.version) {
            return Err(StoreError::VersionExists {
                project: output.project.clone(),
                version: output.version,
            });
        }
        let expected = self.store.next_version(&output.project).await?;
        if expected != output.version {
            return Err(StoreError::VersionConflict {
                project: output.project.clone(),
                expected,
                actual: output.version,
            });
        }
        Ok(())
    }

    async fn import_manifest(
        &self,
        output: &BuildOutput,
    ) -> Result<DependencyManifest, PipelineError> {
        let data = fs::read(&output.manifest_path)
            .await
            .map_err(AssembleError::from)?;
        let manifest = DependencyManifest::parse(&String::from_utf8_lossy(&data))?;
        if manifest.digest() != output.manifest.digest() {
            return Err(AssembleError::MetadataMismatch(format!(
                "manifest {} differs from the hand-off",
                output.manifest_path.display()
            ))
            .into());
        }

        let target = self.settings.image_path(&self.settings.image.manifest_path);
        write_atomic(&target, &data)
            .await
            .map_err(AssembleError::from)?;
        debug!(path = %target.display(), "manifest copied into image");
        Ok(manifest)
    }

    async fn install_service_config(&self) -> Result<PathBuf, AssembleError> {
        let image = &self.settings.image;
        let target = self.settings.image_path(&image.config_path);

        let data = match &image.service_config_source {
            Some(source) => {
                debug!(source = %source.display(), "copying operator service configuration");
                fs::read(source).await?
            }
            None => render_service_config(
                &image.config_path,
                &image.service_config_section,
                &self.service_config_values(),
            )?
            .into_bytes(),
        };

        write_atomic(&target, &data).await?;
        info!(path = %target.display(), "service configuration installed");
        Ok(target)
    }

    /// 渲染服务配置的键值，`image.service_config` 覆盖默认值
    fn service_config_values(&self) -> BTreeMap<String, String> {
        let service = &self.settings.service;
        let mut values = BTreeMap::from([
            ("bind_address".to_string(), service.bind_address.clone()),
            ("http_port".to_string(), service.port.to_string()),
            (
                "eggs_dir".to_string(),
                self.settings.store.root.display().to_string(),
            ),
            (
                "dbs_dir".to_string(),
                service.state_mount.join("dbs").display().to_string(),
            ),
            (
                "logs_dir".to_string(),
                service.state_mount.join("logs").display().to_string(),
            ),
        ]);
        values.extend(
            self.settings
                .image
                .service_config
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        values
    }
}

/// 按文件扩展名渲染服务配置
///
/// `.yaml`/`.yml` 输出 YAML，其余输出 INI 节
pub fn render_service_config(
    path: &Path,
    section: &str,
    values: &BTreeMap<String, String>,
) -> Result<String, AssembleError> {
    let is_yaml = path
        .extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml");

    if is_yaml {
        let document = BTreeMap::from([(section.to_string(), values.clone())]);
        return Ok(serde_yaml::to_string(&document)?);
    }

    let mut rendered = format!("[{}]\n", section);
    for (key, value) in values {
        rendered.push_str(&format!("{} = {}\n", key, value));
    }
    Ok(rendered)
}

#[cfg(test)]
#[path = "runtime_assembler_test.rs"]
mod tests;
