// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域模型模块
///
/// 定义清单、环境、产物、交接对象和镜像回执等核心数据结构
pub mod artifact;
pub mod environment;
pub mod handoff;
pub mod image;
pub mod manifest;
pub mod version;
