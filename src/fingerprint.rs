// Fingerprint: the per-file identity descriptor all matching operates on

use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{IMAGE_EXTENSIONS, PERCEPTUAL_EXTENSIONS, VIDEO_EXTENSIONS};
use crate::error::{FailureKind, Result, SyncError};
use crate::hash::PerceptualHash;
use crate::tree::extension_of;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TreeSide {
    Source,
    Target,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// Determine media kind from file extension
    pub fn from_path(path: &Path) -> Self {
        match extension_of(path) {
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Image,
            Some(ext) if VIDEO_EXTENSIONS.contains(&ext.as_str()) => MediaKind::Video,
            _ => MediaKind::Other,
        }
    }
}

/// Whether the image decoder can rasterize this file for a perceptual hash.
pub fn supports_perceptual_hash(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| PERCEPTUAL_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Folds exporter renames onto a common key: lowercase, collapsed whitespace,
/// extension dropped, configured duplicate-suffix markers stripped.
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    suffix_patterns: Vec<Regex>,
}

impl NameNormalizer {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let suffix_patterns = patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    SyncError::InvalidConfig(format!("bad duplicate suffix pattern {:?}: {}", p, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { suffix_patterns })
    }

    pub fn normalize(&self, file_name: &str) -> String {
        let stem = Path::new(file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut name = stem.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");

        // One pass per pattern: a pattern like "_\d+$" must not eat "IMG_0042" down to "img"
        for pattern in &self.suffix_patterns {
            let stripped = pattern.replace(&name, "").trim_end().to_string();
            if !stripped.is_empty() {
                name = stripped;
            }
        }
        name
    }
}

/// Why a file could not be fingerprinted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FingerprintError {
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub side: TreeSide,
    pub path: PathBuf,
    /// Name used for matching. For sources this is the sidecar's original name when known.
    pub file_name: String,
    pub normalized_name: String,
    pub kind: MediaKind,
    pub exact_hash: Option<String>,
    pub perceptual_hash: Option<PerceptualHash>,
    pub byte_size: u64,
    pub embedded_captured_at: Option<DateTime<Utc>>,
    pub error: Option<FingerprintError>,
}

impl Fingerprint {
    /// A fingerprint with no content yet; hashes are filled in by the index.
    pub fn new(side: TreeSide, path: &Path, normalizer: &NameNormalizer) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            side,
            path: path.to_path_buf(),
            normalized_name: normalizer.normalize(&file_name),
            file_name,
            kind: MediaKind::from_path(path),
            exact_hash: None,
            perceptual_hash: None,
            byte_size: 0,
            embedded_captured_at: None,
            error: None,
        }
    }

    /// A source known only by its sidecar; it can take part in the name layers only.
    pub fn name_only(path: &Path, original_name: &str, normalizer: &NameNormalizer) -> Self {
        let mut fp = Self::new(TreeSide::Source, path, normalizer);
        fp.rename(original_name, normalizer);
        fp.kind = MediaKind::from_path(Path::new(original_name));
        fp
    }

    pub fn failed(side: TreeSide, path: &Path, normalizer: &NameNormalizer, kind: FailureKind, reason: String) -> Self {
        let mut fp = Self::new(side, path, normalizer);
        fp.error = Some(FingerprintError { kind, reason });
        fp
    }

    /// Match under a different name than the one on disk.
    pub fn rename(&mut self, file_name: &str, normalizer: &NameNormalizer) {
        self.file_name = file_name.to_string();
        self.normalized_name = normalizer.normalize(file_name);
    }

    /// Excluded from matching when indexing failed.
    pub fn is_matchable(&self) -> bool {
        self.error.is_none()
    }
}
