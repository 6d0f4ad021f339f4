// Run configuration
//
// Loaded from an optional JSON file; every field has a default so a partial
// file (or none at all) is valid. CLI flags override individual values.

use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

use crate::constants::{
    APP_NAME, DEFAULT_DUPLICATE_SUFFIX_PATTERNS, DEFAULT_PERCEPTUAL_HASH_SIZE,
    DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_TOOL_TIMEOUT_SECS, HASH_CACHE_FILENAME,
    MAX_DEFAULT_WORKERS, MAX_PERCEPTUAL_HASH_SIZE, MIN_PERCEPTUAL_HASH_SIZE,
};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Minimum perceptual similarity (0..=1) for a match or duplicate.
    /// An approximation tuned for recompressed JPEGs, not a correctness guarantee.
    pub similarity_threshold: f64,
    /// Regexes stripped from the end of a file stem during name normalization.
    pub duplicate_suffix_patterns: Vec<String>,
    pub perceptual_hash_size: u32,
    pub workers: usize,
    /// `None` keeps the cache in memory for this run only.
    pub hash_cache_path: Option<PathBuf>,
    pub tool_timeout_secs: u64,
    /// Fall back to the sidecar's upload time when no capture time is recorded.
    pub creation_time_fallback: bool,
    /// Try the perceptual layer after names and content hashes.
    pub perceptual_matching: bool,
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            duplicate_suffix_patterns: DEFAULT_DUPLICATE_SUFFIX_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            perceptual_hash_size: DEFAULT_PERCEPTUAL_HASH_SIZE,
            workers: default_workers(),
            hash_cache_path: default_cache_path(),
            tool_timeout_secs: DEFAULT_TOOL_TIMEOUT_SECS,
            creation_time_fallback: false,
            perceptual_matching: true,
            dry_run: false,
        }
    }
}

impl SyncConfig {
    /// Load a config file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: SyncConfig = serde_json::from_str(&raw)
            .map_err(|e| SyncError::InvalidConfig(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(SyncError::InvalidConfig(format!(
                "similarityThreshold must be within 0..=1, got {}",
                self.similarity_threshold
            )));
        }
        if !(MIN_PERCEPTUAL_HASH_SIZE..=MAX_PERCEPTUAL_HASH_SIZE).contains(&self.perceptual_hash_size) {
            return Err(SyncError::InvalidConfig(format!(
                "perceptualHashSize must be within {}..={}, got {}",
                MIN_PERCEPTUAL_HASH_SIZE, MAX_PERCEPTUAL_HASH_SIZE, self.perceptual_hash_size
            )));
        }
        if self.workers == 0 {
            return Err(SyncError::InvalidConfig("workers must be at least 1".to_string()));
        }
        for pattern in &self.duplicate_suffix_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                SyncError::InvalidConfig(format!("bad duplicate suffix pattern {:?}: {}", pattern, e))
            })?;
        }
        Ok(())
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_DEFAULT_WORKERS)
}

/// Platform cache directory, e.g. ~/.cache/sidecar-sync/hash_cache.db
fn default_cache_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME)
        .map(|dirs| dirs.cache_dir().join(HASH_CACHE_FILENAME))
}
