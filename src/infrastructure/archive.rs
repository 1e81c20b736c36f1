// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

//! 可复现的 tar.gz 归档读写
//!
//! 相同的条目集合总是生成字节一致的归档：条目按路径排序，
//! 时间戳、属主与权限位固定，gzip 头部不记录时间与文件名

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use sha2::{Digest, Sha256};
use tar::{Archive, Builder, EntryType, Header};
use tokio::task::spawn_blocking;
use tracing::debug;

const FILE_MODE: u32 = 0o644;
const DIR_MODE: u32 = 0o755;

/// 条目内容来源
#[derive(Debug, Clone)]
pub enum EntrySource {
    /// 磁盘上的文件
    File(PathBuf),
    /// 内存中的数据
    Bytes(Vec<u8>),
}

/// 归档条目
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// 归档内路径，使用 `/` 分隔
    pub path: String,
    pub source: EntrySource,
}

impl ArchiveEntry {
    pub fn file(path: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: EntrySource::File(source.into()),
        }
    }

    pub fn bytes(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            source: EntrySource::Bytes(data.into()),
        }
    }

    fn open(&self) -> io::Result<(u64, Box<dyn Read + '_>)> {
        match &self.source {
            EntrySource::File(path) => {
                let file = File::open(path)?;
                let size = file.metadata()?.len();
                Ok((size, Box::new(BufReader::new(file))))
            }
            EntrySource::Bytes(data) => Ok((data.len() as u64, Box::new(data.as_slice()))),
        }
    }
}

/// 将相对路径转换为归档内路径
pub fn archive_path(prefix: &str, relative: &Path) -> String {
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/");
    if prefix.is_empty() {
        joined
    } else {
        format!("{}/{}", prefix, joined)
    }
}

/// 计算条目集合的内容摘要
///
/// 按路径排序后依次哈希路径、长度与内容，与归档格式无关
pub async fn digest_entries(entries: Vec<ArchiveEntry>) -> io::Result<String> {
    spawn_blocking(move || digest_entries_sync(&entries)).await?
}

fn digest_entries_sync(entries: &[ArchiveEntry]) -> io::Result<String> {
    let mut sorted: Vec<&ArchiveEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    for entry in sorted {
        let (size, mut reader) = entry.open()?;
        hasher.update(entry.path.as_bytes());
        hasher.update([0u8]);
        hasher.update(size.to_le_bytes());
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// 写入可复现的 tar.gz 归档
pub async fn write_archive(dest: &Path, entries: Vec<ArchiveEntry>) -> io::Result<u64> {
    let dest = dest.to_owned();
    spawn_blocking(move || write_archive_sync(&dest, entries)).await?
}

fn write_archive_sync(dest: &Path, mut entries: Vec<ArchiveEntry>) -> io::Result<u64> {
    entries.sort_by(|a, b| a.path.cmp(&b.path));

    let mut directories = BTreeSet::new();
    for entry in &entries {
        let mut current = entry.path.as_str();
        while let Some((parent, _)) = current.rsplit_once('/') {
            directories.insert(parent.to_string());
            current = parent;
        }
    }

    let file = File::create(dest)?;
    let encoder = GzBuilder::new()
        .mtime(0)
        .write(BufWriter::new(file), Compression::default());
    let mut builder = Builder::new(encoder);

    // 目录条目先于其内容写入
    let mut pending_dirs = directories.into_iter().peekable();
    for entry in &entries {
        while let Some(dir) = pending_dirs.next_if(|d| d.as_str() < entry.path.as_str()) {
            append_directory(&mut builder, &dir)?;
        }
        let (size, reader) = entry.open()?;
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(size);
        header.set_mode(FILE_MODE);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        builder.append_data(&mut header, &entry.path, reader)?;
    }
    for dir in pending_dirs {
        append_directory(&mut builder, &dir)?;
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    let size = file.metadata()?.len();

    debug!(path = %dest.display(), entries = entries.len(), size, "archive written");
    Ok(size)
}

fn append_directory<W: Write>(builder: &mut Builder<W>, path: &str) -> io::Result<()> {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(DIR_MODE);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    builder.append_data(&mut header, format!("{}/", path), io::empty())
}

/// 从归档中读取指定的若干条目
///
/// 返回找到的条目，缺失的名称不会出现在结果中
pub async fn read_entries(
    archive: &Path,
    names: &[&str],
) -> io::Result<HashMap<String, Vec<u8>>> {
    let archive = archive.to_owned();
    let wanted: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    spawn_blocking(move || read_entries_sync(&archive, &wanted)).await?
}

fn read_entries_sync(archive: &Path, wanted: &[String]) -> io::Result<HashMap<String, Vec<u8>>> {
    let file = File::open(archive)?;
    let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
    let mut found = HashMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().to_string();
        if wanted.iter().any(|w| *w == path) {
            let mut data = Vec::new();
            entry.read_to_end(&mut data)?;
            found.insert(path, data);
            if found.len() == wanted.len() {
                break;
            }
        }
    }
    Ok(found)
}

/// 列出归档中的所有文件条目
pub async fn list_files(archive: &Path) -> io::Result<Vec<String>> {
    let archive = archive.to_owned();
    spawn_blocking(move || -> io::Result<Vec<String>> {
        let file = File::open(&archive)?;
        let mut archive = Archive::new(GzDecoder::new(BufReader::new(file)));
        let mut files = Vec::new();
        for entry in archive.entries()? {
            let entry = entry?;
            if entry.header().entry_type() == EntryType::Regular {
                files.push(entry.path()?.to_string_lossy().to_string());
            }
        }
        Ok(files)
    })
    .await?
}
