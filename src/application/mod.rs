// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod build_stage;
pub mod runtime_assembler;

#[cfg(test)]
pub(crate) mod fixtures;

pub use build_stage::BuildStage;
pub use runtime_assembler::RuntimeAssembler;
