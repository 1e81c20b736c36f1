// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 构建阶段与运行时镜像组装两个流水线阶段
pub mod application;

/// 配置模块
///
/// 处理分层配置文件与环境变量
pub mod config;

/// 领域模块
///
/// 包含清单、环境、产物等核心模型，产物仓库接口以及清单生成、依赖安装、产物构建服务
pub mod domain;

/// 基础设施模块
///
/// 提供归档读写、依赖解析器与本地产物仓库
pub mod infrastructure;

/// 表示层模块
///
/// 命令行参数解析与子命令执行
pub mod presentation;

/// 服务模块
///
/// 启动前检查与前台守护进程管理
pub mod service;

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
pub mod utils;
