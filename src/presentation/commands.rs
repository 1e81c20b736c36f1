// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::path::PathBuf;

use tracing::{info, warn};

use crate::application::{BuildStage, RuntimeAssembler};
use crate::config::settings::Settings;
use crate::domain::models::artifact::ArtifactVersion;
use crate::domain::models::handoff::{BuildOutput, HANDOFF_FILE};
use crate::domain::models::manifest::DependencyManifest;
use crate::domain::repositories::artifact_store::ArtifactStore;
use crate::domain::services::environment_installer::EnvironmentInstaller;
use crate::domain::services::manifest_generator::ManifestGenerator;
use crate::infrastructure::resolvers;
use crate::infrastructure::storage::LocalArtifactStore;
use crate::presentation::cli::{
    AssembleArgs, BuildArgs, Commands, InstallArgs, ManifestArgs, ServeArgs, VersionsArgs,
};
use crate::service::ServiceBootstrap;
use crate::utils::errors::{AssembleError, PipelineError};

/// 执行子命令，返回进程退出码
pub async fn execute(command: Commands, settings: &Settings) -> Result<i32, PipelineError> {
    match command {
        Commands::Manifest(args) => manifest(args, settings).await,
        Commands::Install(args) => install(args, settings).await,
        Commands::Build(args) => build(args, settings).await.map(|_| 0),
        Commands::Assemble(args) => assemble(args, settings).await,
        Commands::Deploy(args) => deploy(args, settings).await,
        Commands::Serve(args) => serve(args, settings).await,
        Commands::Versions(args) => versions(args, settings).await,
    }
}

/// 镜像中的产物仓库
fn image_store(settings: &Settings) -> LocalArtifactStore {
    LocalArtifactStore::from_settings(settings.image_path(&settings.store.root), &settings.store)
}

async fn manifest(args: ManifestArgs, settings: &Settings) -> Result<i32, PipelineError> {
    let source = args.source.unwrap_or_else(|| settings.project.source.clone());
    let out = args.out.unwrap_or_else(|| {
        settings
            .build
            .output_dir
            .join(&settings.manifest.file_name)
    });

    let generator = ManifestGenerator::from_settings(
        &settings.manifest,
        &settings.build,
        &settings.project.exclude,
    )?;
    let generated = generator.generate_to(&source, &out).await?;
    for warning in &generated.warnings {
        warn!("{}", warning);
    }
    println!("{}", out.display());
    Ok(0)
}

async fn install(args: InstallArgs, settings: &Settings) -> Result<i32, PipelineError> {
    let mut manifest = DependencyManifest::read_from(&args.manifest).await?;
    if args.runtime {
        manifest = manifest.runtime_subset();
    }

    let installer = EnvironmentInstaller::new(resolvers::from_settings(&settings.resolver)?);
    let outcome = installer.install(&manifest, &args.target).await?;
    for package in &outcome.environment.packages {
        println!("{}=={}", package.name, package.version);
    }
    Ok(0)
}

async fn build(args: BuildArgs, settings: &Settings) -> Result<BuildOutput, PipelineError> {
    let version = match args.version {
        Some(version) => version,
        None => next_version(settings).await?,
    };
    let stage = BuildStage::new(settings, resolvers::from_settings(&settings.resolver)?)?;
    let output = stage.run(version).await?;
    println!("{}", settings.build.output_dir.join(HANDOFF_FILE).display());
    Ok(output)
}

async fn next_version(settings: &Settings) -> Result<ArtifactVersion, PipelineError> {
    let version = image_store(settings)
        .next_version(&settings.project.name)
        .await?;
    info!(project = %settings.project.name, version = %version, "using next store version");
    Ok(version)
}

async fn assemble(args: AssembleArgs, settings: &Settings) -> Result<i32, PipelineError> {
    let path = args
        .handoff
        .unwrap_or_else(|| settings.build.output_dir.join(HANDOFF_FILE));
    let output = BuildOutput::read_from(&path)
        .await
        .map_err(AssembleError::from)?;
    run_assembler(&output, settings).await
}

async fn deploy(args: BuildArgs, settings: &Settings) -> Result<i32, PipelineError> {
    let output = build(args, settings).await?;
    run_assembler(&output, settings).await
}

async fn run_assembler(output: &BuildOutput, settings: &Settings) -> Result<i32, PipelineError> {
    let assembler =
        RuntimeAssembler::from_settings(settings, resolvers::from_settings(&settings.resolver)?);
    let receipt = assembler.assemble(output).await?;
    println!("{} {}", receipt.project, receipt.artifact_path.display());
    Ok(0)
}

async fn serve(args: ServeArgs, settings: &Settings) -> Result<i32, PipelineError> {
    let bootstrap = ServiceBootstrap::new(settings).with_port(args.port);
    let plan = bootstrap.preflight().await?;
    Ok(bootstrap.run(plan).await?)
}

async fn versions(args: VersionsArgs, settings: &Settings) -> Result<i32, PipelineError> {
    let project = args.project.unwrap_or_else(|| settings.project.name.clone());
    let store = image_store(settings);
    for published in store.versions(&project).await? {
        let path: PathBuf = store.artifact_path(&project, published.version);
        println!(
            "{}\t{}\t{}\t{}\t{}",
            published.version,
            published.published_at.to_rfc3339(),
            published.size,
            published.file_digest,
            path.display()
        );
    }
    Ok(0)
}
