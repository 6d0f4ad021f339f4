// File tree access
//
// All filesystem reads of the core go through `FileTree` so indexing can be
// exercised against failing or synthetic trees.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::constants::{IMAGE_EXTENSIONS, SIDECAR_EXTENSION, VIDEO_EXTENSIONS};
use crate::error::{Result, SyncError};

/// Size and modification time, the validity key of a cached hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime_ns: i64,
}

pub trait FileTree: Send + Sync {
    /// Every regular file under `dir`, sorted by path.
    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>>;

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>>;

    fn stat(&self, path: &Path) -> Result<FileStat>;

    /// Delete one file. Only duplicate removal mutates a tree this way.
    fn remove(&self, path: &Path) -> Result<()>;

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let mut raw = String::new();
        self.open(path)?.read_to_string(&mut raw)?;
        Ok(raw)
    }
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFileTree;

impl FileTree for LocalFileTree {
    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() || std::fs::read_dir(dir).is_err() {
            return Err(SyncError::InaccessibleDirectory(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(true) {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => log::warn!("Skipping unreadable entry under {}: {}", dir.display(), e),
            }
        }

        // Sort by path for consistent ordering
        files.sort();
        Ok(files)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        let file = File::open(path).map_err(|e| SyncError::UnreadableFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(file))
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        let meta = std::fs::metadata(path).map_err(|e| SyncError::UnreadableFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        Ok(FileStat { size: meta.len(), mtime_ns })
    }

    fn remove(&self, path: &Path) -> Result<()> {
        std::fs::remove_file(path).map_err(|e| SyncError::WriteRejected {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

/// Lowercased extension of a path, if any.
pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Check if a file is a media file based on extension
pub fn is_media_file(path: &Path) -> bool {
    match extension_of(path) {
        Some(ext) => VIDEO_EXTENSIONS.contains(&ext.as_str()) || IMAGE_EXTENSIONS.contains(&ext.as_str()),
        None => false,
    }
}

/// Check if a file could be a JSON sidecar
pub fn is_sidecar_candidate(path: &Path) -> bool {
    extension_of(path).as_deref() == Some(SIDECAR_EXTENSION)
}
