// Sync engine: Indexing -> Matching -> Resolving -> Applying -> Reporting
//
// Indexing and Applying fan out over a bounded worker pool. Matching and
// Resolving run single-threaded over the complete fingerprint sets. Applying
// is the only state with side effects, and dry-run only changes Applying.

pub mod report;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use rayon::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::dupes::{DuplicateDetector, DuplicateGroup, DuplicateReason};
use crate::error::{FailureKind, Result, SyncError};
use crate::fingerprint::{Fingerprint, NameNormalizer, TreeSide};
use crate::hash::{HashCache, HashIndex};
use crate::matcher::{MatchResult, Matcher};
use crate::metadata::{Fields, MetadataStore};
use crate::resolver::MetadataResolver;
use crate::sidecar::{scan_source, SidecarMetadata, SourceAsset};
use crate::tree::{is_media_file, FileTree};

pub use report::{
    write_report, ApplyOutcome, FileFailure, PairOutcome, Removal, RemovalOutcome, RunPhase, SyncReport, SyncSummary,
};

/// Shared interrupt flag, checked before each file in Indexing and Applying.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A source file (or lone sidecar) after Indexing.
struct IndexedSource {
    fingerprint: Fingerprint,
    sidecar: Option<SidecarMetadata>,
    embedded: Fields,
}

/// A target file after Indexing. `embedded` is the read error when unreadable.
struct IndexedTarget {
    fingerprint: Fingerprint,
    embedded: std::result::Result<Fields, SyncError>,
}

/// Fingerprint and embedded fields of one file.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub fingerprint: Fingerprint,
    pub embedded: Option<Fields>,
    pub embedded_error: Option<String>,
}

pub struct SyncEngine {
    config: SyncConfig,
    store: Arc<dyn MetadataStore>,
    tree: Arc<dyn FileTree>,
    normalizer: NameNormalizer,
    cancel: CancelToken,
}

impl SyncEngine {
    /// Fails with `InvalidConfig` before any work is done.
    pub fn new(config: SyncConfig, store: Arc<dyn MetadataStore>, tree: Arc<dyn FileTree>) -> Result<Self> {
        config.validate()?;
        let normalizer = NameNormalizer::new(&config.duplicate_suffix_patterns)?;
        Ok(Self {
            config,
            store,
            tree,
            normalizer,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    /// Reconcile `target_dir` against `source_dir`.
    ///
    /// Only an inaccessible directory or a broken worker pool fails the run;
    /// every per-file problem lands in the report.
    pub fn run(&self, source_dir: &Path, target_dir: &Path) -> Result<SyncReport> {
        let run_id = Uuid::new_v4().to_string();
        log::info!(
            "Sync run {}: {} -> {}{}",
            run_id,
            source_dir.display(),
            target_dir.display(),
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        // Both trees must be listable before any per-file work
        let target_files: Vec<PathBuf> = self
            .tree
            .list(target_dir)
            .map_err(fatal)?
            .into_iter()
            .filter(|p| is_media_file(p))
            .collect();
        let scan = scan_source(self.tree.as_ref(), source_dir, self.config.creation_time_fallback)
            .map_err(fatal)?;
        let pool = self.worker_pool()?;

        let mut report = SyncReport::new(run_id, source_dir, target_dir, self.config.dry_run);

        // Indexing
        report.enter(RunPhase::Indexing);
        for (path, err) in &scan.failures {
            report.failures.push(FileFailure::from_error(path, err));
        }
        let index = HashIndex::new(
            self.tree.as_ref(),
            &self.normalizer,
            self.load_cache(),
            self.config.perceptual_hash_size,
        );
        let (sources, targets): (Vec<Option<IndexedSource>>, Vec<Option<IndexedTarget>>) = pool.install(|| {
            rayon::join(
                || scan.assets.par_iter().map(|asset| self.index_source(&index, asset)).collect(),
                || target_files.par_iter().map(|path| self.index_target(&index, path)).collect(),
            )
        });
        let cache = index.into_cache();

        if self.cancel.is_cancelled() {
            log::warn!("Run cancelled during indexing");
            report.cancelled = true;
            report.enter(RunPhase::Reporting);
            self.persist_cache(&cache);
            report.finish(scan.assets.len(), target_files.len());
            return Ok(report);
        }

        let sources: Vec<IndexedSource> = sources.into_iter().flatten().collect();
        let targets: Vec<IndexedTarget> = targets.into_iter().flatten().collect();
        for fp in sources.iter().map(|s| &s.fingerprint).chain(targets.iter().map(|t| &t.fingerprint)) {
            if let Some(error) = &fp.error {
                report.failures.push(FileFailure::new(&fp.path, error.kind, error.reason.clone()));
            }
        }
        for target in &targets {
            if let Err(e) = &target.embedded {
                report.failures.push(FileFailure::new(&target.fingerprint.path, FailureKind::UnreadableFile, e.to_string()));
            }
        }
        log::info!("Indexed {} source and {} target file(s)", sources.len(), targets.len());

        // Matching
        report.enter(RunPhase::Matching);
        let source_fps: Vec<Fingerprint> = sources.iter().map(|s| s.fingerprint.clone()).collect();
        let target_fps: Vec<Fingerprint> = targets.iter().map(|t| t.fingerprint.clone()).collect();
        let matcher = if self.config.perceptual_matching {
            Matcher::new(self.config.similarity_threshold)
        } else {
            Matcher::without_perceptual()
        };
        report.matches = matcher.match_all(&source_fps, &target_fps);
        report.duplicates = DuplicateDetector::new(self.config.similarity_threshold).find_duplicates(&target_fps);
        for result in &report.matches {
            if let MatchResult::Ambiguous { source, candidates } = result {
                let err = SyncError::AmbiguousMatch { path: source.clone(), candidates: candidates.len() };
                report.failures.push(FileFailure::from_error(source, &err));
            }
        }

        // Resolving
        report.enter(RunPhase::Resolving);
        let source_by_path: HashMap<&Path, &IndexedSource> =
            sources.iter().map(|s| (s.fingerprint.path.as_path(), s)).collect();
        let target_by_path: HashMap<&Path, &IndexedTarget> =
            targets.iter().map(|t| (t.fingerprint.path.as_path(), t)).collect();
        let resolver = MetadataResolver;

        let mut pairs = Vec::new();
        for result in &report.matches {
            let (source_path, target_path, strategy, confidence) = match result {
                MatchResult::Matched { source, target, strategy, confidence } => (source, target, *strategy, *confidence),
                _ => continue,
            };
            let (source, target) = match (source_by_path.get(source_path.as_path()), target_by_path.get(target_path.as_path())) {
                (Some(s), Some(t)) => (*s, *t),
                _ => continue,
            };

            let mut pair = PairOutcome {
                source: source_path.clone(),
                target: target_path.clone(),
                strategy,
                confidence,
                plan: None,
                outcome: ApplyOutcome::NothingToWrite,
                error: None,
            };
            match &target.embedded {
                Ok(target_fields) => {
                    let plan = resolver.resolve(source.sidecar.as_ref(), &source.embedded, target_fields);
                    for field in plan.conflicts() {
                        log::warn!("Conflict on {} for {}", field, target_path.display());
                    }
                    pair.plan = Some(plan);
                }
                Err(e) => {
                    // Already recorded as a failure during Indexing
                    pair.outcome = ApplyOutcome::Failed;
                    pair.error = Some(e.to_string());
                }
            }
            pairs.push(pair);
        }

        // Applying
        report.enter(RunPhase::Applying);
        let write_failures: Vec<FileFailure> =
            pool.install(|| pairs.par_iter_mut().filter_map(|pair| self.apply(pair)).collect());
        report.failures.extend(write_failures);
        report.pairs = pairs;
        if self.cancel.is_cancelled() {
            log::warn!("Run cancelled during applying");
            report.cancelled = true;
        }

        // Reporting
        report.enter(RunPhase::Reporting);
        self.persist_cache(&cache);
        report.finish(sources.len(), targets.len());
        log::info!(
            "Run {} finished: {} matched, {} ambiguous, {} written, {} would write, {} failure(s)",
            report.run_id,
            report.summary.matched,
            report.summary.ambiguous,
            report.summary.written,
            report.summary.would_write,
            report.summary.failures
        );
        Ok(report)
    }

    /// Index one tree and group its duplicates. Never deletes anything.
    pub fn find_duplicates(&self, dir: &Path) -> Result<Vec<DuplicateGroup>> {
        let files: Vec<PathBuf> = self
            .tree
            .list(dir)
            .map_err(fatal)?
            .into_iter()
            .filter(|p| is_media_file(p))
            .collect();
        let pool = self.worker_pool()?;

        let index = HashIndex::new(
            self.tree.as_ref(),
            &self.normalizer,
            self.load_cache(),
            self.config.perceptual_hash_size,
        );
        let indexed: Vec<Option<IndexedTarget>> =
            pool.install(|| files.par_iter().map(|path| self.index_target(&index, path)).collect());
        let cache = index.into_cache();
        self.persist_cache(&cache);

        if self.cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let fingerprints: Vec<Fingerprint> = indexed.into_iter().flatten().map(|t| t.fingerprint).collect();
        Ok(DuplicateDetector::new(self.config.similarity_threshold).find_duplicates(&fingerprints))
    }

    /// Delete every non-keeper member of `groups`, keeper untouched.
    ///
    /// Groups joined only by perceptual similarity are skipped unless
    /// `include_similar` is set. Dry-run records what would go.
    pub fn remove_duplicates(&self, groups: &[DuplicateGroup], include_similar: bool) -> Vec<Removal> {
        let mut removals = Vec::new();
        for group in groups {
            let keeper_present = self.tree.stat(&group.keeper).is_ok();
            for member in group.members.iter().filter(|m| **m != group.keeper) {
                let (outcome, reason) = self.remove_member(group, member, keeper_present, include_similar);
                removals.push(Removal {
                    path: member.clone(),
                    keeper: group.keeper.clone(),
                    outcome,
                    reason,
                });
            }
        }

        let removed = removals.iter().filter(|r| r.outcome == RemovalOutcome::Removed).count();
        let would = removals.iter().filter(|r| r.outcome == RemovalOutcome::WouldRemove).count();
        if self.config.dry_run {
            log::info!("[DRY RUN] Would remove {} of {} duplicate file(s)", would, removals.len());
        } else {
            log::info!("Removed {} of {} duplicate file(s)", removed, removals.len());
        }
        removals
    }

    fn remove_member(
        &self,
        group: &DuplicateGroup,
        member: &Path,
        keeper_present: bool,
        include_similar: bool,
    ) -> (RemovalOutcome, Option<String>) {
        if self.cancel.is_cancelled() {
            return (RemovalOutcome::NotApplied, None);
        }
        if group.reason == DuplicateReason::PerceptualSimilarity && !include_similar {
            return (RemovalOutcome::Skipped, Some("only visually similar to the keeper".to_string()));
        }
        if !keeper_present {
            log::warn!("Keeper {} not found; leaving {}", group.keeper.display(), member.display());
            return (RemovalOutcome::Skipped, Some(format!("keeper {} not found", group.keeper.display())));
        }
        if self.tree.stat(member).is_err() {
            log::warn!("Duplicate {} not found", member.display());
            return (RemovalOutcome::Skipped, Some("file not found".to_string()));
        }
        if self.config.dry_run {
            log::info!("[DRY RUN] Would remove duplicate {}", member.display());
            return (RemovalOutcome::WouldRemove, None);
        }

        match self.tree.remove(member) {
            Ok(()) => {
                log::info!("Removed duplicate {} (keeping {})", member.display(), group.keeper.display());
                (RemovalOutcome::Removed, None)
            }
            Err(e) => {
                log::warn!("Failed to remove duplicate {}: {}", member.display(), e);
                (RemovalOutcome::Failed, Some(e.to_string()))
            }
        }
    }

    /// Fingerprint one file and read its embedded fields, without touching the cache file.
    pub fn inspect(&self, path: &Path) -> Inspection {
        let index = HashIndex::new(
            self.tree.as_ref(),
            &self.normalizer,
            HashCache::in_memory(),
            self.config.perceptual_hash_size,
        );
        let mut fingerprint = index.fingerprint(path, TreeSide::Target);
        let (embedded, embedded_error) = match self.store.read(path) {
            Ok(fields) => (Some(fields), None),
            Err(e) => (None, Some(e.to_string())),
        };
        fingerprint.embedded_captured_at = embedded.as_ref().and_then(|f| f.captured_at);
        Inspection { fingerprint, embedded, embedded_error }
    }

    fn index_source(&self, index: &HashIndex<'_>, asset: &SourceAsset) -> Option<IndexedSource> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let media = match &asset.media {
            Some(media) => media,
            None => {
                // A sidecar whose media is missing can still pair by name
                let sidecar = asset.sidecar.as_ref()?;
                let fingerprint = Fingerprint::name_only(asset.path(), &sidecar.original_filename, &self.normalizer);
                return Some(IndexedSource {
                    fingerprint,
                    sidecar: Some(sidecar.clone()),
                    embedded: Fields::default(),
                });
            }
        };

        let mut fingerprint = index.fingerprint(media, TreeSide::Source);
        if let Some(name) = self.matching_name(&fingerprint, asset.sidecar.as_ref()) {
            fingerprint.rename(&name, &self.normalizer);
        }

        let embedded = if fingerprint.is_matchable() {
            self.store.read(media).unwrap_or_else(|e| {
                log::warn!("Treating source {} as having no embedded metadata: {}", media.display(), e);
                Fields::default()
            })
        } else {
            Fields::default()
        };
        fingerprint.embedded_captured_at = embedded.captured_at;

        Some(IndexedSource {
            fingerprint,
            sidecar: asset.sidecar.clone(),
            embedded,
        })
    }

    fn index_target(&self, index: &HashIndex<'_>, path: &Path) -> Option<IndexedTarget> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let mut fingerprint = index.fingerprint(path, TreeSide::Target);
        let embedded = if fingerprint.is_matchable() {
            self.store.read(path)
        } else {
            Ok(Fields::default())
        };
        match &embedded {
            Ok(fields) => fingerprint.embedded_captured_at = fields.captured_at,
            Err(e) => log::warn!("Cannot read metadata of {}: {}", path.display(), e),
        }

        Some(IndexedTarget { fingerprint, embedded })
    }

    /// The sidecar's original name replaces the on-disk name only when the
    /// exporter renamed the file beyond a duplicate-suffix marker; otherwise
    /// "IMG_1(1).jpg" and "IMG_1.jpg" would collapse onto one name.
    fn matching_name(&self, fingerprint: &Fingerprint, sidecar: Option<&SidecarMetadata>) -> Option<String> {
        let original = &sidecar?.original_filename;
        if self.normalizer.normalize(original) == fingerprint.normalized_name {
            None
        } else {
            Some(original.clone())
        }
    }

    /// Apply one pair's plan. Returns the failure to record, if any.
    fn apply(&self, pair: &mut PairOutcome) -> Option<FileFailure> {
        let plan = pair.plan.as_ref()?;
        if self.cancel.is_cancelled() {
            pair.outcome = ApplyOutcome::NotApplied;
            return None;
        }

        let writes = plan.writes();
        if writes.is_empty() {
            pair.outcome = ApplyOutcome::NothingToWrite;
            return None;
        }
        if self.config.dry_run {
            log::info!("[DRY RUN] Would update metadata for {}", pair.target.display());
            pair.outcome = ApplyOutcome::WouldWrite;
            return None;
        }

        match self.store.write(&pair.target, &writes) {
            Ok(()) => {
                log::info!("Updated metadata for {}", pair.target.display());
                pair.outcome = ApplyOutcome::Written;
                None
            }
            Err(e) => {
                log::warn!("Failed to update metadata for {}: {}", pair.target.display(), e);
                pair.outcome = ApplyOutcome::Failed;
                pair.error = Some(e.to_string());
                Some(FileFailure::new(&pair.target, FailureKind::WriteRejected, e.to_string()))
            }
        }
    }

    fn worker_pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers)
            .build()
            .map_err(|e| SyncError::Other(format!("Failed to start worker pool: {}", e)))
    }

    fn load_cache(&self) -> HashCache {
        match &self.config.hash_cache_path {
            Some(path) => HashCache::load(path),
            None => HashCache::in_memory(),
        }
    }

    fn persist_cache(&self, cache: &HashCache) {
        if let Err(e) = cache.persist() {
            log::warn!("Failed to persist hash cache: {}", e);
        }
    }
}

fn fatal(err: SyncError) -> SyncError {
    log::error!("{}", err);
    err
}
