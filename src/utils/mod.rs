// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 工具模块
///
/// 提供通用的工具函数和辅助功能
/// 包括错误类型、摘要计算、文件操作、端口检测和日志初始化
pub mod digest;
pub mod errors;
pub mod fs;
pub mod port_probe;
pub mod process;
pub mod telemetry;
