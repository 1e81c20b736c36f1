// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::config::settings::{BuildSettings, ManifestSettings};
use crate::domain::models::manifest::{
    normalize_name, DependencyManifest, ManifestParseError, Requirement,
};
use crate::domain::models::version::VersionConstraint;
use crate::domain::services::import_scanner::{builtin_alias, is_stdlib, scan_imports};
use crate::utils::fs::{collect_files, ExcludeSet};

/// 清单生成过程中的非致命问题
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestWarning {
    pub path: PathBuf,
    pub reason: String,
}

impl fmt::Display for ManifestWarning {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// 清单生成结果
#[derive(Debug, Clone)]
pub struct GeneratedManifest {
    pub manifest: DependencyManifest,
    /// 检测到的第三方导入名
    pub detected: Vec<String>,
    pub warnings: Vec<ManifestWarning>,
}

/// 扫描源码目录得到的原始信息
struct SourceScan {
    imports: BTreeSet<String>,
    first_party: HashSet<String>,
    warnings: Vec<ManifestWarning>,
}

/// 依赖清单生成服务
///
/// 扫描项目源码中的导入语句，过滤标准库与项目自身模块，
/// 再按映射表与版本配置生成确定性的依赖清单。源码目录只读
pub struct ManifestGenerator {
    aliases: HashMap<String, String>,
    pins: HashMap<String, VersionConstraint>,
    ignore: HashSet<String>,
    extra: Vec<Requirement>,
    build_only: Vec<Requirement>,
    excludes: ExcludeSet,
}

impl ManifestGenerator {
    /// 根据配置创建清单生成器
    ///
    /// # 参数
    ///
    /// * `manifest` - 清单配置（映射、版本约束、忽略项与附加依赖）
    /// * `build` - 构建配置，提供仅构建阶段需要的依赖
    /// * `exclude` - 扫描时忽略的文件
    ///
    /// # 返回值
    ///
    /// * `Ok(ManifestGenerator)` - 生成器
    /// * `Err(ManifestParseError)` - 版本约束或附加依赖格式错误
    pub fn from_settings(
        manifest: &ManifestSettings,
        build: &BuildSettings,
        exclude: &[String],
    ) -> Result<Self, ManifestParseError> {
        let mut pins = HashMap::new();
        for (index, (name, constraint)) in manifest.pins.iter().enumerate() {
            let constraint = constraint.parse::<VersionConstraint>().map_err(|source| {
                ManifestParseError::InvalidConstraint {
                    line: index + 1,
                    source,
                }
            })?;
            pins.insert(normalize_name(name), constraint);
        }

        Ok(Self {
            aliases: manifest
                .aliases
                .iter()
                .map(|(module, dist)| (module.clone(), dist.clone()))
                .collect(),
            pins,
            ignore: manifest.ignore.iter().map(|n| normalize_name(n)).collect(),
            extra: parse_lines(&manifest.extra)?,
            build_only: parse_lines(&build.build_only)?
                .into_iter()
                .map(|mut r| {
                    r.build_only = true;
                    r
                })
                .collect(),
            excludes: ExcludeSet::new(exclude),
        })
    }

    /// 为项目源码生成依赖清单
    pub async fn generate(&self, source: &Path) -> Result<GeneratedManifest, ManifestParseError> {
        let root = source.to_owned();
        let excludes = self.excludes.clone();
        let scan = spawn_blocking(move || scan_source(&root, &excludes))
            .await
            .map_err(|e| ManifestParseError::Io(e.into()))??;

        for warning in &scan.warnings {
            warn!(path = %warning.path.display(), reason = %warning.reason, "source file skipped");
        }

        let mut detected = Vec::new();
        let mut requirements = Vec::new();
        for module in &scan.imports {
            if is_stdlib(module) || scan.first_party.contains(module) {
                continue;
            }
            let distribution = self.distribution_for(module);
            if self.is_ignored(module, &distribution) {
                debug!(module = %module, "import ignored");
                continue;
            }
            detected.push(module.clone());
            requirements.push(Requirement::new(distribution, VersionConstraint::any()));
        }
        requirements.extend(self.extra.iter().cloned());

        // 构建期依赖：已检测到的标记为仅构建，未检测到的补充进清单
        let build_only: HashSet<String> =
            self.build_only.iter().map(|r| r.normalized_name()).collect();
        for requirement in requirements.iter_mut() {
            if build_only.contains(&requirement.normalized_name()) {
                requirement.build_only = true;
            }
        }
        requirements.extend(self.build_only.iter().cloned());

        for requirement in requirements.iter_mut() {
            if let Some(pin) = self.pins.get(&requirement.normalized_name()) {
                requirement.constraint = requirement.constraint.intersect(pin);
            }
        }

        let manifest = DependencyManifest::new(requirements);
        info!(
            requirements = manifest.len(),
            detected = detected.len(),
            warnings = scan.warnings.len(),
            "manifest generated"
        );

        Ok(GeneratedManifest {
            manifest,
            detected,
            warnings: scan.warnings,
        })
    }

    /// 生成清单并写入文件
    pub async fn generate_to(
        &self,
        source: &Path,
        output: &Path,
    ) -> Result<GeneratedManifest, ManifestParseError> {
        let generated = self.generate(source).await?;
        generated.manifest.write_to(output).await?;
        debug!(path = %output.display(), "manifest written");
        Ok(generated)
    }

    fn distribution_for(&self, module: &str) -> String {
        self.aliases
            .get(module)
            .cloned()
            .or_else(|| builtin_alias(module).map(str::to_string))
            .unwrap_or_else(|| module.to_string())
    }

    fn is_ignored(&self, module: &str, distribution: &str) -> bool {
        self.ignore.contains(&normalize_name(module))
            || self.ignore.contains(&normalize_name(distribution))
    }
}

fn parse_lines(lines: &[String]) -> Result<Vec<Requirement>, ManifestParseError> {
    let parsed = DependencyManifest::parse(&lines.join("\n"))?;
    Ok(parsed.requirements().to_vec())
}

fn scan_source(root: &Path, excludes: &ExcludeSet) -> std::io::Result<SourceScan> {
    let files = collect_files(root, excludes)?;
    let mut scan = SourceScan {
        imports: BTreeSet::new(),
        first_party: first_party_modules(root, &files),
        warnings: Vec::new(),
    };

    for relative in files.iter().filter(|f| is_python(f)) {
        let path = root.join(relative);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                scan.warnings.push(ManifestWarning {
                    path: relative.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        match String::from_utf8(bytes) {
            Ok(text) => scan.imports.extend(scan_imports(&text)),
            Err(_) => scan.warnings.push(ManifestWarning {
                path: relative.clone(),
                reason: "not valid UTF-8".to_string(),
            }),
        }
    }
    Ok(scan)
}

fn is_python(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
}

/// 项目自身的顶层模块
///
/// 包含最外层的包（含 `__init__.py` 且父目录不是包的目录）以及
/// 非包目录中的脚本模块，后者可以被同目录脚本直接导入
fn first_party_modules(root: &Path, files: &[PathBuf]) -> HashSet<String> {
    let packages: HashSet<PathBuf> = files
        .iter()
        .filter(|f| f.file_name().is_some_and(|n| n == "__init__.py"))
        .filter_map(|f| f.parent().map(Path::to_path_buf))
        .collect();

    let mut modules = HashSet::new();
    for package in &packages {
        let parent_is_package = package
            .parent()
            .is_some_and(|p| packages.contains(p));
        if !parent_is_package {
            if let Some(name) = package.file_name() {
                modules.insert(name.to_string_lossy().to_string());
            }
        }
    }

    for file in files.iter().filter(|f| is_python(f)) {
        let in_package = file.parent().is_some_and(|p| packages.contains(p));
        if !in_package {
            if let Some(stem) = file.file_stem() {
                modules.insert(stem.to_string_lossy().to_string());
            }
        }
    }

    // 顶层目录即使没有 __init__.py 也可作为命名空间包导入
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let has_python = files
                .iter()
                .any(|f| f.starts_with(&name) && is_python(f));
            if entry.path().is_dir() && has_python {
                modules.insert(name);
            }
        }
    }
    modules
}

#[cfg(test)]
#[path = "manifest_generator_test.rs"]
mod tests;
