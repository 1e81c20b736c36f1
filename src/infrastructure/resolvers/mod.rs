// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 依赖解析器实现
///
/// - 本地索引（index_resolver）：离线包索引，适合测试与隔离网络
/// - 外部命令（command_resolver）：调用包管理器，例如 pip
pub mod command_resolver;
pub mod index_resolver;

use std::sync::Arc;

use crate::config::settings::{ResolverKind, ResolverSettings};
use crate::domain::services::environment_installer::PackageResolver;
use crate::utils::errors::InstallError;

pub use command_resolver::CommandResolver;
pub use index_resolver::IndexResolver;

/// 根据配置创建依赖解析器
pub fn from_settings(settings: &ResolverSettings) -> Result<Arc<dyn PackageResolver>, InstallError> {
    match settings.kind {
        ResolverKind::Index => {
            let root = settings
                .index_path
                .clone()
                .ok_or_else(|| InstallError::Index("resolver.index_path is not set".to_string()))?;
            Ok(Arc::new(IndexResolver::new(root)))
        }
        ResolverKind::Command => Ok(Arc::new(CommandResolver::new(
            settings.install_command.clone(),
            settings.freeze_command.clone(),
            settings.timeout(),
        ))),
    }
}
