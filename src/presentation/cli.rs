// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::models::artifact::ArtifactVersion;

/// crawlship - 构建、打包并启动爬虫项目
#[derive(Parser, Debug)]
#[command(
    name = "crawlship",
    version,
    about = "Package crawler projects into versioned artifacts and boot the crawl service",
    long_about = "crawlship runs a two-phase pipeline: the build stage generates a dependency \
                  manifest, installs a build environment and packs the project into an immutable \
                  artifact; the runtime stage installs only the runtime dependencies, publishes \
                  the artifact into the store and boots the service in the foreground."
)]
pub struct Cli {
    /// Configuration file, layered over config/ and below CRAWLSHIP__* variables
    #[arg(long, global = true, env = "CRAWLSHIP_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate the dependency manifest of a project
    Manifest(ManifestArgs),

    /// Install a dependency environment from a manifest
    Install(InstallArgs),

    /// Run the build stage and write the hand-off
    Build(BuildArgs),

    /// Assemble the runtime image from a build hand-off
    Assemble(AssembleArgs),

    /// Build and assemble in one invocation
    Deploy(BuildArgs),

    /// Run preflight checks and start the service in the foreground
    Serve(ServeArgs),

    /// List published artifact versions
    Versions(VersionsArgs),
}

#[derive(Args, Debug)]
pub struct ManifestArgs {
    /// Project source directory (defaults to project.source)
    #[arg(short, long)]
    pub source: Option<PathBuf>,

    /// Output file (defaults to <build.output_dir>/<manifest.file_name>)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Manifest file
    #[arg(short, long)]
    pub manifest: PathBuf,

    /// Environment directory
    #[arg(short, long)]
    pub target: PathBuf,

    /// Skip build-only requirements
    #[arg(long)]
    pub runtime: bool,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Artifact version (defaults to the store's next version)
    #[arg(long)]
    pub version: Option<ArtifactVersion>,
}

#[derive(Args, Debug)]
pub struct AssembleArgs {
    /// Hand-off file (defaults to <build.output_dir>/handoff.json)
    #[arg(long)]
    pub handoff: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (overrides service.port)
    #[arg(short, long)]
    pub port: Option<u16>,
}

#[derive(Args, Debug)]
pub struct VersionsArgs {
    /// Project name (defaults to project.name)
    #[arg(short, long)]
    pub project: Option<String>,
}
