// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::domain::models::artifact::is_valid_project_name;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum SettingsError {
    /// 配置加载或反序列化失败
    #[error("failed to load configuration: {0}")]
    Config(#[from] ConfigError),
    /// 配置值不合法
    #[error("invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// 应用程序配置设置
///
/// 包含项目、构建、清单、依赖解析、产物仓库、运行时镜像、服务和日志等所有配置项
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Settings {
    /// 项目配置
    #[validate(nested)]
    pub project: ProjectSettings,
    /// 构建阶段配置
    #[validate(nested)]
    pub build: BuildSettings,
    /// 清单生成配置
    #[serde(default)]
    pub manifest: ManifestSettings,
    /// 依赖解析配置
    #[validate(nested)]
    pub resolver: ResolverSettings,
    /// 产物仓库配置
    pub store: StoreSettings,
    /// 运行时镜像配置
    #[validate(nested)]
    pub image: ImageSettings,
    /// 服务配置
    #[validate(nested)]
    pub service: ServiceSettings,
    /// 日志配置
    pub logging: LoggingSettings,
}

/// 项目配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProjectSettings {
    /// 项目名称，决定产物文件名与仓库目录
    #[validate(custom(function = "validate_project_name"))]
    pub name: String,
    /// 项目源码目录
    pub source: PathBuf,
    /// 打包与扫描时忽略的文件
    #[serde(default = "default_excludes")]
    pub exclude: Vec<String>,
}

/// 构建阶段配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BuildSettings {
    /// 清单与产物的输出目录
    pub output_dir: PathBuf,
    /// 构建工作区，未设置时使用临时目录
    pub workspace: Option<PathBuf>,
    /// 构建结束后是否保留工作区
    pub keep_workspace: bool,
    /// 项目标记文件，为空表示不检查
    pub project_marker: String,
    /// 仅构建阶段需要的依赖
    #[serde(default)]
    pub build_only: Vec<String>,
    /// 打包前执行的检查命令，支持 `{source}` 占位符
    #[serde(default)]
    pub check_command: Vec<String>,
    /// 检查命令超时时间（秒）
    #[validate(range(min = 1))]
    pub check_timeout_secs: u64,
    /// 是否将依赖打入产物
    pub bundle_dependencies: bool,
}

impl BuildSettings {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

/// 清单生成配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestSettings {
    /// 清单文件名
    #[serde(default = "default_manifest_file")]
    pub file_name: String,
    /// 导入名到发行包名的映射，覆盖内置映射
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    /// 发行包的版本约束
    #[serde(default)]
    pub pins: BTreeMap<String, String>,
    /// 忽略的导入名或包名
    #[serde(default)]
    pub ignore: Vec<String>,
    /// 无法静态检测到的附加依赖，格式同清单行
    #[serde(default)]
    pub extra: Vec<String>,
}

impl Default for ManifestSettings {
    fn default() -> Self {
        Self {
            file_name: default_manifest_file(),
            aliases: BTreeMap::new(),
            pins: BTreeMap::new(),
            ignore: Vec::new(),
            extra: Vec::new(),
        }
    }
}

/// 依赖解析器类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// 离线本地包索引
    Index,
    /// 外部包管理器命令
    Command,
}

/// 依赖解析配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_resolver"))]
pub struct ResolverSettings {
    /// 解析器类型
    pub kind: ResolverKind,
    /// 本地包索引目录（kind = index 时使用）
    pub index_path: Option<PathBuf>,
    /// 安装命令，支持 `{manifest}` 与 `{target}` 占位符
    #[serde(default = "default_install_command")]
    pub install_command: Vec<String>,
    /// 列出已安装依赖的命令，输出 `name==version` 行
    #[serde(default = "default_freeze_command")]
    pub freeze_command: Vec<String>,
    /// 命令超时时间（秒）
    #[validate(range(min = 1))]
    pub timeout_secs: u64,
}

impl ResolverSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// 产物仓库配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct StoreSettings {
    /// 仓库根目录（运行时文件系统中的路径）
    pub root: PathBuf,
    /// 版本文件后缀，例如 `.egg`
    pub artifact_suffix: String,
}

/// 运行时镜像配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ImageSettings {
    /// 镜像根目录，其余绝对路径都挂在它之下
    pub root: PathBuf,
    /// 运行时系统库
    #[serde(default = "default_runtime_libraries")]
    pub runtime_libraries: Vec<String>,
    /// 运行时依赖环境目录
    pub environment_dir: PathBuf,
    /// 镜像内的清单路径
    pub manifest_path: PathBuf,
    /// 服务配置文件路径
    pub config_path: PathBuf,
    /// 由运维提供的服务配置文件，设置后原样复制
    pub service_config_source: Option<PathBuf>,
    /// 渲染服务配置时使用的节名
    #[validate(length(min = 1))]
    pub service_config_section: String,
    /// 渲染服务配置时附加或覆盖的键值
    #[serde(default)]
    pub service_config: BTreeMap<String, String>,
}

/// 服务配置设置
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ServiceSettings {
    /// 服务监听地址
    pub bind_address: String,
    /// 服务监听端口
    #[validate(range(min = 1))]
    pub port: u16,
    /// 配置挂载目录
    pub config_mount: PathBuf,
    /// 状态挂载目录
    pub state_mount: PathBuf,
    /// 守护进程程序
    #[validate(length(min = 1))]
    pub program: String,
    /// 守护进程参数，支持 `{port}`、`{bind}`、`{config}`、`{state}`、`{store}` 占位符
    #[serde(default = "default_service_args")]
    pub args: Vec<String>,
}

/// 日志配置设置
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// 输出格式：text 或 json
    pub format: String,
    /// 日志过滤规则，`RUST_LOG` 优先
    pub filter: Option<String>,
}

fn default_excludes() -> Vec<String> {
    [
        ".git",
        ".hg",
        ".svn",
        "__pycache__",
        "*.pyc",
        "*.pyo",
        ".venv",
        ".tox",
        ".mypy_cache",
        ".pytest_cache",
        "*.egg-info",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_manifest_file() -> String {
    "requirements.txt".to_string()
}

fn default_install_command() -> Vec<String> {
    [
        "pip",
        "install",
        "--disable-pip-version-check",
        "--no-input",
        "--target",
        "{target}",
        "-r",
        "{manifest}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_freeze_command() -> Vec<String> {
    ["pip", "freeze", "--path", "{target}"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_runtime_libraries() -> Vec<String> {
    ["libxml2", "libxslt1.1", "libssl3", "ca-certificates"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_service_args() -> Vec<String> {
    vec!["--pidfile=".to_string()]
}

fn validate_project_name(name: &str) -> Result<(), ValidationError> {
    if is_valid_project_name(name) {
        Ok(())
    } else {
        Err(ValidationError::new("project_name"))
    }
}

fn validate_resolver(resolver: &ResolverSettings) -> Result<(), ValidationError> {
    match resolver.kind {
        ResolverKind::Index if resolver.index_path.is_none() => {
            Err(ValidationError::new("index_path_required"))
        }
        ResolverKind::Command
            if resolver.install_command.is_empty() || resolver.freeze_command.is_empty() =>
        {
            Err(ValidationError::new("command_required"))
        }
        _ => Ok(()),
    }
}

impl Settings {
    /// 创建新的配置实例
    ///
    /// 依次加载内置默认值、`config/default`、`config/{APP_ENVIRONMENT}` 与环境变量
    ///
    /// # Returns
    ///
    /// * `Ok(Settings)` - 成功加载的配置
    /// * `Err(SettingsError)` - 配置加载失败或校验不通过
    pub fn new() -> Result<Self, SettingsError> {
        Self::load(None)
    }

    /// 加载配置，可额外指定一个必须存在的配置文件
    ///
    /// 指定文件的优先级高于 `config/` 目录，低于环境变量
    pub fn load(config_file: Option<&Path>) -> Result<Self, SettingsError> {
        let env = std::env::var("APP_ENVIRONMENT").unwrap_or_else(|_| "default".to_string());
        let mut builder = Config::builder()
            // Project
            .set_default("project.name", "default")?
            .set_default("project.source", ".")?
            // Build stage
            .set_default("build.output_dir", "dist")?
            .set_default("build.keep_workspace", false)?
            .set_default("build.project_marker", "scrapy.cfg")?
            .set_default("build.check_timeout_secs", 300)?
            .set_default("build.bundle_dependencies", false)?
            // Resolver
            .set_default("resolver.kind", "command")?
            .set_default("resolver.timeout_secs", 600)?
            // Artifact store
            .set_default("store.root", "/var/lib/scrapyd/eggs")?
            .set_default("store.artifact_suffix", "")?
            // Runtime image
            .set_default("image.root", "/")?
            .set_default("image.environment_dir", "/opt/crawlship/env")?
            .set_default("image.manifest_path", "/opt/crawlship/requirements.txt")?
            .set_default("image.config_path", "/etc/scrapyd/scrapyd.conf")?
            .set_default("image.service_config_section", "scrapyd")?
            // Service
            .set_default("service.bind_address", "0.0.0.0")?
            .set_default("service.port", 6800)?
            .set_default("service.config_mount", "/etc/scrapyd")?
            .set_default("service.state_mount", "/var/lib/scrapyd")?
            .set_default("service.program", "scrapyd")?
            // Logging
            .set_default("logging.format", "text")?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", env)).required(false));

        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("CRAWLSHIP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// 运行时镜像中某个绝对路径对应的宿主路径
    pub fn image_path(&self, path: &Path) -> PathBuf {
        crate::utils::fs::rooted(&self.image.root, path)
    }
}

#[cfg(test)]
#[path = "settings_test.rs"]
mod tests;
