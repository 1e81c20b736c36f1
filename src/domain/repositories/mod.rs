// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 仓库模块
///
/// 定义产物仓库的访问接口
pub mod artifact_store;
