// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

use std::io;
use std::path::{Component, Path, PathBuf};

use uuid::Uuid;

/// 文件排除规则
///
/// 支持三种模式：按路径分量精确匹配（如 `.git`）、后缀通配（如 `*.pyc`）
/// 以及以 `/` 结尾的相对路径前缀（如 `build/dist/`）
#[derive(Debug, Clone, Default)]
pub struct ExcludeSet {
    names: Vec<String>,
    suffixes: Vec<String>,
    prefixes: Vec<PathBuf>,
}

impl ExcludeSet {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let mut set = ExcludeSet::default();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            let trimmed = pattern.trim_matches('/');
            if let Some(suffix) = pattern.strip_prefix('*') {
                set.suffixes.push(suffix.to_string());
            } else if pattern.ends_with('/') || trimmed.contains('/') {
                set.prefixes.push(PathBuf::from(trimmed));
            } else {
                set.names.push(trimmed.to_string());
            }
        }
        set
    }

    /// 判断相对路径是否被排除
    pub fn is_excluded(&self, relative: &Path) -> bool {
        if self.prefixes.iter().any(|p| relative.starts_with(p)) {
            return true;
        }
        relative.components().any(|component| match component {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                self.names.iter().any(|n| *n == name)
                    || self.suffixes.iter().any(|s| name.ends_with(s.as_str()))
            }
            _ => false,
        })
    }
}

/// 递归收集目录下的所有普通文件
///
/// 返回按字典序排序的相对路径；符号链接不会被跟随
pub fn collect_files(root: &Path, excludes: &ExcludeSet) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    walk(root, root, excludes, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk(root: &Path, dir: &Path, excludes: &ExcludeSet, out: &mut Vec<PathBuf>) -> io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?
            .to_path_buf();

        if excludes.is_excluded(&relative) {
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            walk(root, &path, excludes, out)?;
        } else if file_type.is_file() {
            out.push(relative);
        }
    }
    Ok(())
}

/// 递归复制目录树
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    std::fs::create_dir_all(dst)?;
    let mut copied = 0;
    for relative in collect_files(src, &ExcludeSet::default())? {
        let target = dst.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(src.join(&relative), &target)?;
        copied += 1;
    }
    Ok(copied)
}

/// 原子写入文件
///
/// 先写入同目录下的临时文件，再重命名覆盖目标
pub async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent).await?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let temp = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    if let Err(e) = write_and_sync(&temp, data).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }

    match tokio::fs::rename(&temp, path).await {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = tokio::fs::remove_file(&temp).await;
            Err(e)
        }
    }
}

async fn write_and_sync(path: &Path, data: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    Ok(())
}

/// 将绝对路径挂到镜像根目录之下
///
/// `rooted("/tmp/image", "/var/lib/scrapyd")` 得到 `/tmp/image/var/lib/scrapyd`
pub fn rooted(root: &Path, path: &Path) -> PathBuf {
    let relative: PathBuf = path
        .components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect();
    root.join(relative)
}
