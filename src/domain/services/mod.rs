// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod artifact_builder;
pub mod environment_installer;
pub mod import_scanner;
pub mod manifest_generator;
