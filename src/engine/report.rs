// Run report: what was matched, decided, written and what failed

use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::REPORT_TMP_PREFIX;
use crate::dupes::DuplicateGroup;
use crate::error::{FailureKind, Result, SyncError};
use crate::matcher::{MatchResult, MatchStrategy};
use crate::resolver::MergePlan;

/// Engine states, entered strictly in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunPhase {
    Indexing,
    Matching,
    Resolving,
    Applying,
    Reporting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyOutcome {
    Written,
    /// Dry run: the plan had writes that were suppressed.
    WouldWrite,
    NothingToWrite,
    Failed,
    /// Run cancelled before this pair was reached.
    NotApplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RemovalOutcome {
    Removed,
    /// Dry run: the file would have been deleted.
    WouldRemove,
    /// Left in place: keeper or duplicate missing, or only visually similar.
    Skipped,
    Failed,
    NotApplied,
}

/// What happened to one non-keeper member of a duplicate group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Removal {
    pub path: PathBuf,
    pub keeper: PathBuf,
    pub outcome: RemovalOutcome,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

impl FileFailure {
    pub fn new(path: &Path, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self { path: path.to_path_buf(), kind, reason: reason.into() }
    }

    pub fn from_error(path: &Path, err: &SyncError) -> Self {
        Self::new(path, err.failure_kind(), err.to_string())
    }
}

/// One matched pair and what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairOutcome {
    pub source: PathBuf,
    pub target: PathBuf,
    pub strategy: MatchStrategy,
    pub confidence: f64,
    /// Absent when the target's embedded metadata could not be read.
    pub plan: Option<MergePlan>,
    pub outcome: ApplyOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub sources: usize,
    pub targets: usize,
    pub matched: usize,
    pub ambiguous: usize,
    pub unmatched_sources: usize,
    pub unmatched_targets: usize,
    pub written: usize,
    pub would_write: usize,
    pub nothing_to_write: usize,
    pub failed: usize,
    pub not_applied: usize,
    pub conflicts: usize,
    pub duplicate_groups: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub source_dir: PathBuf,
    pub target_dir: PathBuf,
    pub dry_run: bool,
    pub cancelled: bool,
    pub phases: Vec<RunPhase>,
    pub matches: Vec<MatchResult>,
    pub pairs: Vec<PairOutcome>,
    /// Duplicate groups found in the target tree. Informational only.
    pub duplicates: Vec<DuplicateGroup>,
    pub failures: Vec<FileFailure>,
    pub summary: SyncSummary,
}

impl SyncReport {
    pub fn new(run_id: String, source_dir: &Path, target_dir: &Path, dry_run: bool) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            finished_at: None,
            source_dir: source_dir.to_path_buf(),
            target_dir: target_dir.to_path_buf(),
            dry_run,
            cancelled: false,
            phases: Vec::new(),
            matches: Vec::new(),
            pairs: Vec::new(),
            duplicates: Vec::new(),
            failures: Vec::new(),
            summary: SyncSummary::default(),
        }
    }

    pub fn enter(&mut self, phase: RunPhase) {
        debug_assert!(self.phases.last().map_or(true, |last| *last < phase));
        log::info!("Entering {:?}", phase);
        self.phases.push(phase);
    }

    /// Stamp the end time and recompute counters.
    pub fn finish(&mut self, sources: usize, targets: usize) {
        self.failures.sort_by(|a, b| a.path.cmp(&b.path));
        self.finished_at = Some(Utc::now());

        let mut summary = SyncSummary {
            sources,
            targets,
            duplicate_groups: self.duplicates.len(),
            failures: self.failures.len(),
            ..SyncSummary::default()
        };
        for result in &self.matches {
            match result {
                MatchResult::Matched { .. } => summary.matched += 1,
                MatchResult::Ambiguous { .. } => summary.ambiguous += 1,
                MatchResult::UnmatchedSource { .. } => summary.unmatched_sources += 1,
                MatchResult::UnmatchedTarget { .. } => summary.unmatched_targets += 1,
            }
        }
        for pair in &self.pairs {
            match pair.outcome {
                ApplyOutcome::Written => summary.written += 1,
                ApplyOutcome::WouldWrite => summary.would_write += 1,
                ApplyOutcome::NothingToWrite => summary.nothing_to_write += 1,
                ApplyOutcome::Failed => summary.failed += 1,
                ApplyOutcome::NotApplied => summary.not_applied += 1,
            }
            if let Some(plan) = &pair.plan {
                summary.conflicts += plan.conflicts().len();
            }
        }
        self.summary = summary;
    }

    /// The merge plans in pair order.
    pub fn plans(&self) -> Vec<Option<&MergePlan>> {
        self.pairs.iter().map(|p| p.plan.as_ref()).collect()
    }
}

/// Write the report atomically: temp file, fsync, rename.
pub fn write_report(path: &Path, report: &SyncReport) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| SyncError::Other(format!("Invalid report path: {}", path.display())))?;
    let tmp_path = dir.join(format!("{}{}", REPORT_TMP_PREFIX, filename));

    // 1. Serialize to JSON
    let json = serde_json::to_string_pretty(report)?;

    // 2. Write to temp file and fsync
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
    }

    // 3. Atomic rename: tmp -> final
    std::fs::rename(&tmp_path, path)?;

    // 4. fsync parent directory (best-effort, not all platforms require this)
    if let Ok(dir) = std::fs::File::open(&dir) {
        let _ = dir.sync_all();
    }

    log::info!("Report written to {}", path.display());
    Ok(())
}
