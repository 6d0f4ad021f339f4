// HashIndex: builds fingerprints, consulting and refreshing the hash cache

use std::io::Read;
use std::path::Path;
use std::sync::Mutex;

use crate::error::{FailureKind, SyncError};
use crate::fingerprint::{supports_perceptual_hash, Fingerprint, NameNormalizer, TreeSide};
use crate::tree::FileTree;
use super::cache::{CacheEntry, HashCache};
use super::perceptual::{compute_perceptual_hash, scheme_tag};
use super::{compute_exact_hash, compute_exact_hash_from_bytes};

pub struct HashIndex<'a> {
    tree: &'a dyn FileTree,
    normalizer: &'a NameNormalizer,
    cache: Mutex<HashCache>,
    hash_size: u32,
    scheme: String,
}

impl<'a> HashIndex<'a> {
    pub fn new(tree: &'a dyn FileTree, normalizer: &'a NameNormalizer, cache: HashCache, hash_size: u32) -> Self {
        Self {
            tree,
            normalizer,
            cache: Mutex::new(cache),
            hash_size,
            scheme: scheme_tag(hash_size),
        }
    }

    /// Fingerprint one file. Never fails: an unreadable file yields a fingerprint
    /// with no hashes and a recorded reason.
    pub fn fingerprint(&self, path: &Path, side: TreeSide) -> Fingerprint {
        let stat = match self.tree.stat(path) {
            Ok(stat) => stat,
            Err(e) => return self.failed(side, path, &e),
        };

        let mut fp = Fingerprint::new(side, path, self.normalizer);
        fp.byte_size = stat.size;

        let cached = self.with_cache(|cache| cache.lookup(path, stat, &self.scheme).cloned());
        if let Some(entry) = cached {
            log::debug!("Hash cache hit: {}", path.display());
            fp.exact_hash = Some(entry.exact_hash);
            fp.perceptual_hash = entry.perceptual_hash;
            return fp;
        }

        let computed = if supports_perceptual_hash(path) {
            self.read_all(path).map(|bytes| {
                let perceptual = match compute_perceptual_hash(&bytes, self.hash_size) {
                    Ok(hash) => Some(hash),
                    Err(e) => {
                        log::debug!("No perceptual hash for {}: {}", path.display(), e);
                        None
                    }
                };
                (compute_exact_hash_from_bytes(&bytes), perceptual)
            })
        } else {
            self.tree
                .open(path)
                .and_then(|mut reader| compute_exact_hash(&mut reader))
                .map(|hash| (hash, None))
        };

        match computed {
            Ok((exact_hash, perceptual_hash)) => {
                let entry = CacheEntry {
                    stat,
                    exact_hash: exact_hash.clone(),
                    perceptual_scheme: self.scheme.clone(),
                    perceptual_hash: perceptual_hash.clone(),
                };
                // Two workers racing on the same path write identical entries
                self.with_cache(|cache| cache.insert(path.to_path_buf(), entry));
                fp.exact_hash = Some(exact_hash);
                fp.perceptual_hash = perceptual_hash;
                fp
            }
            Err(e) => self.failed(side, path, &e),
        }
    }

    /// Hand the (updated) cache back for persisting.
    pub fn into_cache(self) -> HashCache {
        self.cache.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_all(&self, path: &Path) -> crate::error::Result<Vec<u8>> {
        let mut reader = self.tree.open(path)?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .map_err(|e| SyncError::HashComputationFailed(format!("Failed to read: {}", e)))?;
        Ok(bytes)
    }

    fn with_cache<T>(&self, f: impl FnOnce(&mut HashCache) -> T) -> T {
        let mut guard = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn failed(&self, side: TreeSide, path: &Path, err: &SyncError) -> Fingerprint {
        let kind = match err.failure_kind() {
            FailureKind::HashComputationFailed => FailureKind::HashComputationFailed,
            _ => FailureKind::UnreadableFile,
        };
        log::warn!("Cannot fingerprint {}: {}", path.display(), err);
        Fingerprint::failed(side, path, self.normalizer, kind, err.to_string())
    }
}
