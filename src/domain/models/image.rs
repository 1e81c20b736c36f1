// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::domain::models::artifact::ArtifactVersion;
use crate::domain::models::environment::ResolvedEnvironment;

/// 镜像回执文件名
pub const RECEIPT_FILE: &str = "image.json";

/// 服务守护进程的启动命令
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// 运行时镜像回执
///
/// 组装的最后一步写入；存在即表示镜像已完整组装，服务启动前必须检查
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReceipt {
    pub schema_version: u32,
    pub project: String,
    pub version: ArtifactVersion,
    /// 产物在运行时文件系统中的绝对路径
    pub artifact_path: PathBuf,
    pub file_digest: String,
    pub runtime_libraries: Vec<String>,
    pub environment: ResolvedEnvironment,
    pub daemon: DaemonCommand,
    pub bind_address: String,
    pub port: u16,
    pub config_mount: PathBuf,
    pub state_mount: PathBuf,
    pub store_root: PathBuf,
    pub config_path: PathBuf,
    pub assembled_at: DateTime<Utc>,
}

impl ImageReceipt {
    pub const SCHEMA_VERSION: u32 = 1;

    pub async fn write_to(&self, image_root: &Path) -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        crate::utils::fs::write_atomic(&image_root.join(RECEIPT_FILE), &data).await
    }

    /// 读取镜像回执，不存在时返回 None
    pub async fn read_from(image_root: &Path) -> std::io::Result<Option<Self>> {
        match tokio::fs::read(image_root.join(RECEIPT_FILE)).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}
