// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::settings::SettingsError;
use crate::domain::models::environment::PackageDrift;
use crate::domain::models::manifest::ManifestParseError;
use crate::domain::repositories::artifact_store::StoreError;
use crate::utils::port_probe::PortProbeError;

/// 流水线阶段
///
/// 用于错误上下文与退出码映射
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Configuration,
    Manifest,
    Install,
    Build,
    Assemble,
    Bootstrap,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PipelineStage::Configuration => write!(f, "configuration"),
            PipelineStage::Manifest => write!(f, "manifest"),
            PipelineStage::Install => write!(f, "install"),
            PipelineStage::Build => write!(f, "build"),
            PipelineStage::Assemble => write!(f, "assemble"),
            PipelineStage::Bootstrap => write!(f, "bootstrap"),
        }
    }
}

/// 依赖安装错误
///
/// 所有变体都是致命错误，流水线会在构建产物之前终止
#[derive(Error, Debug)]
pub enum InstallError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid manifest: {0}")]
    Manifest(#[from] ManifestParseError),

    #[error("package `{0}` is not available from the package index")]
    UnknownPackage(String),

    #[error("no version of `{name}` satisfies `{constraint}` (available: {available})")]
    Unsatisfiable {
        name: String,
        constraint: String,
        available: String,
    },

    #[error("package index error: {0}")]
    Index(String),

    #[error("`{program}` exited with {code:?}: {stderr}")]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("`{0}` timed out")]
    CommandTimeout(String),

    #[error("resolver `{resolver}` did not install `{name}` matching `{constraint}`")]
    Unsatisfied {
        resolver: String,
        name: String,
        constraint: String,
    },
}

/// 产物构建错误
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid project source {path}: {reason}")]
    InvalidSource { path: PathBuf, reason: String },

    #[error("environment was resolved for manifest {environment}, expected {manifest}")]
    EnvironmentMismatch {
        manifest: String,
        environment: String,
    },

    #[error("build check `{program}` failed with {code:?}: {stderr}")]
    CheckFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("build check `{0}` timed out")]
    CheckTimeout(String),

    #[error("malformed artifact {path}: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 运行时镜像组装错误
#[derive(Error, Debug)]
pub enum AssembleError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime profile contains build toolchain packages: {}", .0.join(", "))]
    ToolchainInRuntime(Vec<String>),

    #[error("artifact {path} does not match the build output (expected {expected}, found {actual})")]
    ArtifactTampered {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("artifact metadata does not match the build output: {0}")]
    MetadataMismatch(String),

    #[error("runtime environment drifted from the build environment: {}", format_drift(.0))]
    Drift(Vec<PackageDrift>),

    #[error("failed to render service configuration: {0}")]
    ServiceConfig(#[from] serde_yaml::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_drift(drift: &[PackageDrift]) -> String {
    drift
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// 服务启动错误
///
/// 启动前检查失败时服务立即退出，不会以降级状态运行
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} mount {path} is missing")]
    MountMissing { kind: &'static str, path: PathBuf },

    #[error("{kind} mount {path} is not a directory")]
    MountNotDirectory { kind: &'static str, path: PathBuf },

    #[error("{kind} mount {path} is not readable: {reason}")]
    MountUnreadable {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("{kind} mount {path} is not writable: {reason}")]
    MountUnwritable {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("runtime image at {0} is not fully assembled")]
    ImageIncomplete(PathBuf),

    #[error("deployed artifact failed verification: {0}")]
    Artifact(#[from] StoreError),

    #[error("runtime environment {0} is not installed")]
    EnvironmentMissing(PathBuf),

    #[error("runtime environment {path} does not match the image receipt: {reason}")]
    EnvironmentMismatch { path: PathBuf, reason: String },

    #[error("daemon argument `{0}` would detach the service from the foreground")]
    Daemonizing(String),

    #[error("port check failed: {0}")]
    Port(#[from] PortProbeError),

    #[error("failed to launch `{program}`: {reason}")]
    Launch { program: String, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 流水线错误
///
/// 汇总各阶段的致命错误，并提供阶段信息与进程退出码
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Settings(#[from] SettingsError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestParseError),

    #[error("installation failed: {0}")]
    Install(#[from] InstallError),

    #[error("build failed: {0}")]
    Build(#[from] BuildError),

    #[error("assembly failed: {0}")]
    Assemble(#[from] AssembleError),

    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),

    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
}

impl PipelineError {
    /// 返回出错的流水线阶段
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Settings(_) => PipelineStage::Configuration,
            PipelineError::Manifest(_) => PipelineStage::Manifest,
            PipelineError::Install(_) => PipelineStage::Install,
            PipelineError::Build(_) => PipelineStage::Build,
            PipelineError::Assemble(_) | PipelineError::Store(_) => PipelineStage::Assemble,
            PipelineError::Bootstrap(_) => PipelineStage::Bootstrap,
        }
    }

    /// 进程退出码
    pub fn exit_code(&self) -> i32 {
        match self.stage() {
            PipelineStage::Configuration | PipelineStage::Manifest => 2,
            PipelineStage::Install => 3,
            PipelineStage::Build => 4,
            PipelineStage::Assemble => 5,
            PipelineStage::Bootstrap => 6,
        }
    }
}
