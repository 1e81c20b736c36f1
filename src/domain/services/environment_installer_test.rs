// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use super::*;
use crate::domain::models::environment::LOCK_FILE;
use crate::domain::models::manifest::normalize_name;
use crate::domain::models::version::Version;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// 内存中的依赖目录
struct CatalogResolver {
    catalog: HashMap<String, Vec<Version>>,
    calls: AtomicUsize,
    /// 忽略约束，总是返回最旧版本
    ignore_constraints: bool,
}

impl CatalogResolver {
    fn new(entries: &[(&str, &[&str])]) -> Self {
        let catalog = entries
            .iter()
            .map(|(name, versions)| {
                (
                    normalize_name(name),
                    versions.iter().map(|v| v.parse().unwrap()).collect(),
                )
            })
            .collect();
        Self {
            catalog,
            calls: AtomicUsize::new(0),
            ignore_constraints: false,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackageResolver for CatalogResolver {
    fn name(&self) -> &str {
        "catalog"
    }

    async fn install(
        &self,
        manifest: &DependencyManifest,
        target: &Path,
    ) -> Result<Vec<InstalledPackage>, InstallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut installed = Vec::new();
        for requirement in manifest.requirements() {
            let versions = self
                .catalog
                .get(&requirement.normalized_name())
                .ok_or_else(|| InstallError::UnknownPackage(requirement.name.clone()))?;
            let version = if self.ignore_constraints {
                versions.iter().min()
            } else {
                requirement.constraint.best_match(versions.iter())
            }
            .ok_or_else(|| InstallError::Unsatisfiable {
                name: requirement.name.clone(),
                constraint: requirement.constraint.to_string(),
                available: String::new(),
            })?;
            std::fs::write(target.join(requirement.normalized_name()), version.to_string())?;
            installed.push(InstalledPackage::new(requirement.name.clone(), version.clone()));
        }
        Ok(installed)
    }
}

fn catalog() -> Arc<CatalogResolver> {
    Arc::new(CatalogResolver::new(&[
        ("Scrapy", &["2.11.0", "2.11.2"]),
        ("lxml", &["4.9.4", "5.2.1"]),
        ("Cython", &["3.0.10"]),
    ]))
}

fn staging_leftovers(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.ends_with(".staging") || n.ends_with(".old"))
        .collect()
}

#[tokio::test]
async fn test_install_writes_lock_and_picks_highest_match() {
    let root = TempDir::new().unwrap();
    let target = root.path().join("env");
    let resolver = catalog();
    let installer = EnvironmentInstaller::new(resolver.clone());
    let manifest = DependencyManifest::parse("Scrapy>=2.11\nlxml<5\n").unwrap();

    let outcome = installer.install(&manifest, &target).await.unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.environment.manifest_digest, manifest.digest());
    assert_eq!(
        outcome.environment.get("scrapy").unwrap().version.to_string(),
        "2.11.2"
    );
    assert_eq!(
        outcome.environment.get("lxml").unwrap().version.to_string(),
        "4.9.4"
    );
    assert!(target.join(LOCK_FILE).exists());
    assert!(target.join("scrapy").exists());
    assert!(staging_leftovers(root.path()).is_empty());
}

#[tokio::test]
async fn test_install_is_idempotent() {
    let root = TempDir::new().unwrap();
    let target = root.path().join("env");
    let resolver = catalog();
    let installer = EnvironmentInstaller::new(resolver.clone());
    let manifest = DependencyManifest::parse("Scrapy\n").unwrap();

    let first = installer.install(&manifest, &target).await.unwrap();
    let second = installer.install(&manifest, &target).await.unwrap();

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(first.environment, second.environment);
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn test_changed_manifest_replaces_environment() {
    let root = TempDir::new().unwrap();
    let target = root.path().join("env");
    let resolver = catalog();
    let installer = EnvironmentInstaller::new(resolver.clone());

    let first = DependencyManifest::parse("Scrapy\nlxml\n").unwrap();
    installer.install(&first, &target).await.unwrap();
    let second = DependencyManifest::parse("Scrapy==2.11.0\n").unwrap();
    let outcome = installer.install(&second, &target).await.unwrap();

    assert!(outcome.changed);
    assert_eq!(resolver.calls(), 2);
    assert!(!target.join("lxml").exists());
    assert_eq!(
        std::fs::read_to_string(target.join("scrapy")).unwrap(),
        "2.11.0"
    );
    assert!(staging_leftovers(root.path()).is_empty());
}

#[tokio::test]
async fn test_failed_install_leaves_nothing_behind() {
    let root = TempDir::new().unwrap();
    let target = root.path().join("env");
    let installer = EnvironmentInstaller::new(catalog());
    let manifest = DependencyManifest::parse("Scrapy\nno-such-package\n").unwrap();

    let err = installer.install(&manifest, &target).await.unwrap_err();

    assert!(matches!(err, InstallError::UnknownPackage(name) if name == "no-such-package"));
    assert!(!target.exists());
    assert!(staging_leftovers(root.path()).is_empty());
}

#[tokio::test]
async fn test_failed_reinstall_keeps_previous_environment() {
    let root = TempDir::new().unwrap();
    let target = root.path().join("env");
    let installer = EnvironmentInstaller::new(catalog());

    let good = DependencyManifest::parse("Scrapy\n").unwrap();
    installer.install(&good, &target).await.unwrap();
    let bad = DependencyManifest::parse("Scrapy>=3\n").unwrap();
    let err = installer.install(&bad, &target).await.unwrap_err();

    assert!(matches!(err, InstallError::Unsatisfiable { .. }));
    let lock = ResolvedEnvironment::read_lock(&target).await.unwrap().unwrap();
    assert_eq!(lock.manifest_digest, good.digest());
}

#[tokio::test]
async fn test_resolver_output_is_checked_against_constraints() {
    let root = TempDir::new().unwrap();
    let target = root.path().join("env");
    let mut resolver = CatalogResolver::new(&[("Scrapy", &["2.10.0", "2.11.2"])]);
    resolver.ignore_constraints = true;
    let installer = EnvironmentInstaller::new(Arc::new(resolver));
    let manifest = DependencyManifest::parse("Scrapy>=2.11\n").unwrap();

    let err = installer.install(&manifest, &target).await.unwrap_err();

    assert!(matches!(
        err,
        InstallError::Unsatisfied { resolver, name, .. } if resolver == "catalog" && name == "Scrapy"
    ));
    assert!(!target.exists());
}

#[tokio::test]
async fn test_runtime_subset_skips_build_only_requirements() {
    let root = TempDir::new().unwrap();
    let installer = EnvironmentInstaller::new(catalog());
    let manifest =
        DependencyManifest::parse("Scrapy\nCython==3.0.10  # build-only\n").unwrap();

    let build = installer
        .install(&manifest, &root.path().join("build-env"))
        .await
        .unwrap();
    let runtime = installer
        .install(&manifest.runtime_subset(), &root.path().join("runtime-env"))
        .await
        .unwrap();

    assert!(build.environment.get("cython").is_some());
    assert!(runtime.environment.get("cython").is_none());
    assert!(runtime.environment.get("scrapy").is_some());
}

#[tokio::test]
async fn test_empty_manifest_installs_empty_environment() {
    let root = TempDir::new().unwrap();
    let target = root.path().join("env");
    let installer = EnvironmentInstaller::new(catalog());

    let outcome = installer
        .install(&DependencyManifest::empty(), &target)
        .await
        .unwrap();
    assert!(outcome.environment.packages.is_empty());
    assert!(target.join(LOCK_FILE).exists());
}

#[tokio::test]
async fn test_install_matching_reinstalls_when_locked_versions_are_stale() {
    let root = TempDir::new().unwrap();
    let target = root.path().join("env");
    let resolver = catalog();
    let installer = EnvironmentInstaller::new(resolver.clone());
    let manifest = DependencyManifest::parse("Scrapy\n").unwrap();

    let first = installer.install(&manifest, &target).await.unwrap();
    let reused = installer
        .install_matching(&manifest, &target, &first.environment)
        .await
        .unwrap();
    assert!(!reused.changed);
    assert_eq!(resolver.calls(), 1);

    let older = ResolvedEnvironment::new(
        "other",
        vec![InstalledPackage::new("Scrapy", "2.11.0".parse().unwrap())],
    );
    let outcome = installer
        .install_matching(&manifest, &target, &older)
        .await
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(resolver.calls(), 2);
    assert!(staging_leftovers(root.path()).is_empty());
}
