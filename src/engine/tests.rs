// End-to-end engine runs over temp directories with an in-memory metadata store

use super::*;
use crate::hash::perceptual::tests::{encode_png, gradient_image};
use crate::matcher::MatchStrategy;
use crate::metadata::memory::MemoryStore;
use crate::metadata::GpsCoordinates;
use crate::resolver::{FieldDecision, SkipReason};
use crate::tree::{FileStat, LocalFileTree};
use chrono::{TimeZone, Utc};
use std::collections::HashSet;
use std::io::Read;
use tempfile::TempDir;

/// Local tree whose listed paths can be made unreadable.
struct FlakyTree {
    broken: HashSet<PathBuf>,
}

impl FileTree for FlakyTree {
    fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        LocalFileTree.list(dir)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Read + Send>> {
        self.check(path)?;
        LocalFileTree.open(path)
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        self.check(path)?;
        LocalFileTree.stat(path)
    }

    fn remove(&self, path: &Path) -> Result<()> {
        self.check(path)?;
        LocalFileTree.remove(path)
    }
}

impl FlakyTree {
    fn check(&self, path: &Path) -> Result<()> {
        if self.broken.contains(path) {
            return Err(SyncError::UnreadableFile {
                path: path.to_path_buf(),
                reason: "simulated I/O failure".to_string(),
            });
        }
        Ok(())
    }
}

fn test_config() -> SyncConfig {
    SyncConfig {
        workers: 2,
        hash_cache_path: None,
        ..SyncConfig::default()
    }
}

fn engine_with(config: SyncConfig, store: &Arc<MemoryStore>, tree: Arc<dyn FileTree>) -> SyncEngine {
    let store: Arc<dyn MetadataStore> = store.clone();
    SyncEngine::new(config, store, tree).unwrap()
}

fn engine(config: SyncConfig, store: &Arc<MemoryStore>) -> SyncEngine {
    engine_with(config, store, Arc::new(LocalFileTree))
}

/// Create `source/` and `target/` under a temp dir with the given files.
fn create_trees(source: &[(&str, &[u8])], target: &[(&str, &[u8])]) -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let source_dir = tmp.path().join("source");
    let target_dir = tmp.path().join("target");
    for (dir, files) in [(&source_dir, source), (&target_dir, target)] {
        std::fs::create_dir_all(dir).unwrap();
        for (name, content) in files {
            let path = dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(&path, content).unwrap();
        }
    }
    (tmp, source_dir, target_dir)
}

const IMG_001_SIDECAR: &[u8] = br#"{"title": "IMG_001.jpg", "photoTakenTime": {"timestamp": "1622541600"}}"#;

fn june_first() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 6, 1, 10, 0, 0).unwrap()
}

// ---------------------------------------------------------------
// Scenario: sidecar-only source, "(1)"-renamed target
// ---------------------------------------------------------------
#[test]
fn test_scenario_normalized_name_date_write() {
    let (_tmp, source, target) = create_trees(
        &[("IMG_001.json", IMG_001_SIDECAR)],
        &[("IMG_001(1).jpg", b"target jpeg bytes")],
    );
    let store = Arc::new(MemoryStore::default());
    let report = engine(test_config(), &store).run(&source, &target).unwrap();

    assert_eq!(report.phases, vec![
        RunPhase::Indexing,
        RunPhase::Matching,
        RunPhase::Resolving,
        RunPhase::Applying,
        RunPhase::Reporting,
    ]);
    assert!(matches!(
        &report.matches[0],
        MatchResult::Matched { strategy: MatchStrategy::NormalizedName, .. }
    ));

    let pair = &report.pairs[0];
    let plan = pair.plan.as_ref().unwrap();
    assert_eq!(plan.captured_at, FieldDecision::Write(june_first()));
    assert_eq!(plan.gps, FieldDecision::Skip(SkipReason::NoSourceValue));
    assert_eq!(plan.title, FieldDecision::Skip(SkipReason::NoSourceValue));
    assert_eq!(pair.outcome, ApplyOutcome::Written);

    assert_eq!(store.fields(&target.join("IMG_001(1).jpg")).captured_at, Some(june_first()));
    assert!(report.failures.is_empty());
}

// ---------------------------------------------------------------
// Dry run and real run decide identically
// ---------------------------------------------------------------
#[test]
fn test_dry_run_matches_real_run_plans() {
    let (_tmp, source, target) = create_trees(
        &[
            ("IMG_001.jpg", b"source one"),
            ("IMG_001.jpg.supplemental-metadata.json", IMG_001_SIDECAR),
            ("clip.mp4", b"same video bytes"),
        ],
        &[("IMG_001.jpg", b"target one"), ("renamed.mp4", b"same video bytes")],
    );

    let dry_store = Arc::new(MemoryStore::default());
    let dry = engine(SyncConfig { dry_run: true, ..test_config() }, &dry_store)
        .run(&source, &target)
        .unwrap();

    let real_store = Arc::new(MemoryStore::default());
    let real = engine(test_config(), &real_store).run(&source, &target).unwrap();

    assert_eq!(dry.matches, real.matches);
    assert_eq!(dry.plans(), real.plans());
    assert_eq!(dry_store.write_count(), 0);
    assert_eq!(real_store.write_count(), 1);

    let outcomes = |r: &SyncReport| r.pairs.iter().map(|p| p.outcome).collect::<Vec<_>>();
    assert_eq!(outcomes(&dry), vec![ApplyOutcome::WouldWrite, ApplyOutcome::NothingToWrite]);
    assert_eq!(outcomes(&real), vec![ApplyOutcome::Written, ApplyOutcome::NothingToWrite]);
    assert!(dry.dry_run && !real.dry_run);
}

// ---------------------------------------------------------------
// Unreadable target is excluded, the run goes on
// ---------------------------------------------------------------
#[test]
fn test_unreadable_target_is_reported_and_skipped() {
    let (_tmp, source, target) = create_trees(
        &[
            ("IMG_001.json", IMG_001_SIDECAR),
            ("IMG_002.jpg", b"two"),
            ("IMG_002.jpg.json", br#"{"title": "IMG_002.jpg", "photoTakenTime": {"timestamp": 1622541600}}"#),
        ],
        &[("IMG_001.jpg", b"one"), ("IMG_002.jpg", b"two target")],
    );
    let broken = target.join("IMG_001.jpg");
    let tree = Arc::new(FlakyTree { broken: [broken.clone()].into_iter().collect() });
    let store = Arc::new(MemoryStore::default());

    let report = engine_with(test_config(), &store, tree).run(&source, &target).unwrap();

    let failure = report.failures.iter().find(|f| f.path == broken).unwrap();
    assert_eq!(failure.kind, FailureKind::UnreadableFile);
    assert!(report.matches.iter().any(|m| matches!(
        m,
        MatchResult::UnmatchedTarget { target, reason: Some(_) } if *target == broken
    )));
    assert!(report.pairs.iter().all(|p| p.target != broken));

    // The readable pair still went through
    assert_eq!(report.summary.written, 1);
    assert_eq!(store.fields(&target.join("IMG_002.jpg")).captured_at, Some(june_first()));
}

#[test]
fn test_target_metadata_read_failure_skips_pair() {
    let (_tmp, source, target) = create_trees(
        &[("IMG_001.json", IMG_001_SIDECAR)],
        &[("IMG_001.jpg", b"one")],
    );
    let target_file = target.join("IMG_001.jpg");
    let store = Arc::new(MemoryStore {
        unreadable: [target_file.clone()].into_iter().collect(),
        ..MemoryStore::default()
    });

    let report = engine(test_config(), &store).run(&source, &target).unwrap();

    assert_eq!(report.pairs.len(), 1);
    assert_eq!(report.pairs[0].outcome, ApplyOutcome::Failed);
    assert!(report.pairs[0].plan.is_none());
    assert_eq!(report.failures[0].kind, FailureKind::UnreadableFile);
    assert_eq!(store.write_count(), 0);
}

#[test]
fn test_unmatched_target_read_failure_is_reported() {
    let (_tmp, source, target) = create_trees(
        &[("IMG_001.json", IMG_001_SIDECAR)],
        &[("IMG_001.jpg", b"one"), ("stray.jpg", b"stray")],
    );
    let stray = target.join("stray.jpg");
    let store = Arc::new(MemoryStore {
        unreadable: [stray.clone()].into_iter().collect(),
        ..MemoryStore::default()
    });

    let report = engine(test_config(), &store).run(&source, &target).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, stray);
    assert_eq!(report.failures[0].kind, FailureKind::UnreadableFile);
    assert!(report.matches.contains(&MatchResult::UnmatchedTarget { target: stray, reason: None }));
    assert_eq!(report.summary.written, 1);
}

#[test]
fn test_write_rejected_is_per_file() {
    let (_tmp, source, target) = create_trees(
        &[
            ("IMG_001.json", IMG_001_SIDECAR),
            ("IMG_002.json", br#"{"title": "IMG_002.jpg", "photoTakenTime": {"timestamp": "1622541600"}}"#),
        ],
        &[("IMG_001.jpg", b"one"), ("IMG_002.jpg", b"two")],
    );
    let rejected = target.join("IMG_001.jpg");
    let store = Arc::new(MemoryStore {
        rejecting: [rejected.clone()].into_iter().collect(),
        ..MemoryStore::default()
    });

    let report = engine(test_config(), &store).run(&source, &target).unwrap();

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, FailureKind::WriteRejected);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.written, 1);
}

// ---------------------------------------------------------------
// Re-running after a successful run changes nothing
// ---------------------------------------------------------------
#[test]
fn test_second_run_has_nothing_to_write() {
    let (_tmp, source, target) = create_trees(
        &[(
            "IMG_003.json",
            br#"{"title": "IMG_003.jpg", "description": "Lake",
                 "photoTakenTime": {"timestamp": "1622541600"},
                 "geoData": {"latitude": 46.5, "longitude": 8.25}}"#,
        )],
        &[("IMG_003.jpg", b"three")],
    );
    let store = Arc::new(MemoryStore::default());
    let first = engine(test_config(), &store).run(&source, &target).unwrap();
    assert_eq!(first.summary.written, 1);

    let fields = store.fields(&target.join("IMG_003.jpg"));
    assert_eq!(fields.gps, Some(GpsCoordinates { latitude: 46.5, longitude: 8.25 }));
    assert_eq!(fields.title.as_deref(), Some("Lake"));

    let second = engine(test_config(), &store).run(&source, &target).unwrap();
    assert_eq!(second.pairs[0].outcome, ApplyOutcome::NothingToWrite);
    assert_eq!(store.write_count(), 1);
}

#[test]
fn test_existing_target_title_survives_sync() {
    let (_tmp, source, target) = create_trees(
        &[("IMG_004.json", br#"{"title": "IMG_004.jpg", "description": "From export"}"#)],
        &[("IMG_004.jpg", b"four")],
    );
    let target_file = target.join("IMG_004.jpg");
    let store = Arc::new(MemoryStore::default().with_fields(&target_file, Fields {
        title: Some("Typed by hand".to_string()),
        ..Fields::default()
    }));

    let report = engine(test_config(), &store).run(&source, &target).unwrap();

    assert_eq!(report.pairs[0].outcome, ApplyOutcome::NothingToWrite);
    assert_eq!(store.fields(&target_file).title.as_deref(), Some("Typed by hand"));
}

// ---------------------------------------------------------------
// Perceptual match across a re-encode
// ---------------------------------------------------------------
#[test]
fn test_recompressed_image_matches_perceptually() {
    let original = encode_png(&gradient_image(0));
    let reencoded = encode_png(&gradient_image(1));
    assert_ne!(original, reencoded);

    let (_tmp, source, target) = create_trees(
        &[
            ("holiday.png", original.as_slice()),
            ("holiday.png.json", br#"{"title": "holiday.png", "photoTakenTime": {"timestamp": "1622541600"}}"#),
        ],
        &[("PXL_20210601.png", reencoded.as_slice())],
    );
    let store = Arc::new(MemoryStore::default());
    let report = engine(test_config(), &store).run(&source, &target).unwrap();

    assert!(matches!(
        &report.matches[0],
        MatchResult::Matched { strategy: MatchStrategy::PerceptualSimilarity, .. }
    ));
    assert_eq!(report.summary.written, 1);
}

#[test]
fn test_perceptual_matching_can_be_switched_off() {
    let (_tmp, source, target) = create_trees(
        &[
            ("holiday.png", encode_png(&gradient_image(0)).as_slice()),
            ("holiday.png.json", br#"{"title": "holiday.png", "photoTakenTime": {"timestamp": "1622541600"}}"#),
        ],
        &[("PXL_20210601.png", encode_png(&gradient_image(1)).as_slice())],
    );
    let config = SyncConfig { perceptual_matching: false, ..test_config() };
    let store = Arc::new(MemoryStore::default());
    let report = engine(config, &store).run(&source, &target).unwrap();

    assert_eq!(report.summary.matched, 0);
    assert_eq!(report.summary.unmatched_sources, 1);
    assert_eq!(store.write_count(), 0);
}

// ---------------------------------------------------------------
// Failures that are reported, and the ones that are fatal
// ---------------------------------------------------------------
#[test]
fn test_malformed_sidecar_is_reported() {
    let (_tmp, source, target) = create_trees(
        &[("IMG_005.jpg", b"five"), ("IMG_005.jpg.json", b"{ not json")],
        &[("IMG_005.jpg", b"five target")],
    );
    let store = Arc::new(MemoryStore::default());
    let report = engine(test_config(), &store).run(&source, &target).unwrap();

    assert_eq!(report.failures[0].kind, FailureKind::MalformedSidecar);
    // The media still matches; without a sidecar there is nothing to write
    assert_eq!(report.summary.matched, 1);
    assert_eq!(report.pairs[0].outcome, ApplyOutcome::NothingToWrite);
}

#[test]
fn test_missing_directory_is_fatal() {
    let (tmp, source, _target) = create_trees(&[], &[]);
    let store = Arc::new(MemoryStore::default());
    let result = engine(test_config(), &store).run(&source, &tmp.path().join("nope"));
    assert!(matches!(result, Err(SyncError::InaccessibleDirectory(_))));
}

#[test]
fn test_invalid_config_is_fatal() {
    let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::default());
    let config = SyncConfig { workers: 0, ..test_config() };
    assert!(matches!(
        SyncEngine::new(config, store, Arc::new(LocalFileTree)),
        Err(SyncError::InvalidConfig(_))
    ));
}

#[test]
fn test_cancelled_run_writes_nothing() {
    let (_tmp, source, target) = create_trees(
        &[("IMG_001.json", IMG_001_SIDECAR)],
        &[("IMG_001.jpg", b"one")],
    );
    let store = Arc::new(MemoryStore::default());
    let engine = engine(test_config(), &store);
    engine.cancel_token().cancel();

    let report = engine.run(&source, &target).unwrap();
    assert!(report.cancelled);
    assert_eq!(report.phases, vec![RunPhase::Indexing, RunPhase::Reporting]);
    assert_eq!(store.write_count(), 0);
}

#[test]
fn test_hash_cache_is_persisted() {
    let (tmp, source, target) = create_trees(
        &[("IMG_001.json", IMG_001_SIDECAR)],
        &[("IMG_001.jpg", b"one")],
    );
    let cache_path = tmp.path().join("cache").join("hash_cache.db");
    let config = SyncConfig { hash_cache_path: Some(cache_path.clone()), ..test_config() };
    let store = Arc::new(MemoryStore::default());

    engine(config, &store).run(&source, &target).unwrap();
    assert_eq!(HashCache::load(&cache_path).len(), 1);
}

// ---------------------------------------------------------------
// Duplicates
// ---------------------------------------------------------------
#[test]
fn test_find_duplicates_identical_bytes() {
    let (_tmp, _source, target) = create_trees(
        &[],
        &[("b.jpg", b"identical"), ("a.jpg", b"identical"), ("c.jpg", b"different")],
    );
    let store = Arc::new(MemoryStore::default());
    let groups = engine(test_config(), &store).find_duplicates(&target).unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].members.len(), 2);
    assert_eq!(groups[0].keeper, target.join("a.jpg"));
}

#[test]
fn test_find_duplicates_prefers_dated_keeper() {
    let (_tmp, _source, target) = create_trees(&[], &[("a.jpg", b"same"), ("b.jpg", b"same")]);
    let store = Arc::new(MemoryStore::default().with_fields(&target.join("b.jpg"), Fields {
        captured_at: Some(june_first()),
        ..Fields::default()
    }));
    let groups = engine(test_config(), &store).find_duplicates(&target).unwrap();
    assert_eq!(groups[0].keeper, target.join("b.jpg"));
}

#[test]
fn test_remove_duplicates_dry_run_keeps_files() {
    let (_tmp, _source, target) = create_trees(&[], &[("a.jpg", b"same"), ("b.jpg", b"same")]);
    let config = SyncConfig { dry_run: true, ..test_config() };
    let store = Arc::new(MemoryStore::default());
    let engine = engine(config, &store);

    let groups = engine.find_duplicates(&target).unwrap();
    let removals = engine.remove_duplicates(&groups, false);

    assert_eq!(removals, vec![Removal {
        path: target.join("b.jpg"),
        keeper: target.join("a.jpg"),
        outcome: RemovalOutcome::WouldRemove,
        reason: None,
    }]);
    assert!(target.join("b.jpg").exists());
}

#[test]
fn test_remove_duplicates_deletes_only_non_keepers() {
    let (_tmp, _source, target) = create_trees(
        &[],
        &[("a.jpg", b"same"), ("b.jpg", b"same"), ("c.jpg", b"same"), ("d.jpg", b"unique")],
    );
    let store = Arc::new(MemoryStore::default());
    let engine = engine(test_config(), &store);

    let groups = engine.find_duplicates(&target).unwrap();
    let removals = engine.remove_duplicates(&groups, false);

    assert_eq!(removals.len(), 2);
    assert!(removals.iter().all(|r| r.outcome == RemovalOutcome::Removed));
    assert!(target.join("a.jpg").exists());
    assert!(!target.join("b.jpg").exists());
    assert!(!target.join("c.jpg").exists());
    assert!(target.join("d.jpg").exists());
}

#[test]
fn test_remove_duplicates_spares_lookalikes_unless_asked() {
    let (_tmp, _source, target) = create_trees(
        &[],
        &[
            ("a.png", encode_png(&gradient_image(0)).as_slice()),
            ("b.png", encode_png(&gradient_image(1)).as_slice()),
        ],
    );
    let store = Arc::new(MemoryStore::default());
    let engine = engine(test_config(), &store);
    let groups = engine.find_duplicates(&target).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].reason, DuplicateReason::PerceptualSimilarity);

    let duplicate = groups[0].members.iter().find(|m| **m != groups[0].keeper).unwrap().clone();

    let spared = engine.remove_duplicates(&groups, false);
    assert_eq!(spared[0].outcome, RemovalOutcome::Skipped);
    assert!(duplicate.exists());

    let removed = engine.remove_duplicates(&groups, true);
    assert_eq!(removed[0].outcome, RemovalOutcome::Removed);
    assert!(!duplicate.exists());
    assert!(groups[0].keeper.exists());
}

#[test]
fn test_remove_duplicates_skips_unreachable_files() {
    let (_tmp, _source, target) = create_trees(
        &[],
        &[("a.jpg", b"one"), ("b.jpg", b"one"), ("x.jpg", b"two"), ("y.jpg", b"two")],
    );
    let store = Arc::new(MemoryStore::default());
    let groups = engine(test_config(), &store).find_duplicates(&target).unwrap();
    assert_eq!(groups.len(), 2);

    std::fs::remove_file(target.join("x.jpg")).unwrap();
    let tree = Arc::new(FlakyTree { broken: [target.join("b.jpg")].into_iter().collect() });
    let removals = engine_with(test_config(), &store, tree).remove_duplicates(&groups, false);

    assert_eq!(removals[0].path, target.join("b.jpg"));
    assert_eq!(removals[0].outcome, RemovalOutcome::Skipped);
    assert_eq!(removals[1].path, target.join("y.jpg"));
    assert_eq!(removals[1].outcome, RemovalOutcome::Skipped);
    assert!(target.join("y.jpg").exists());
}

#[test]
fn test_cancelled_removal_deletes_nothing() {
    let (_tmp, _source, target) = create_trees(&[], &[("a.jpg", b"same"), ("b.jpg", b"same")]);
    let store = Arc::new(MemoryStore::default());
    let engine = engine(test_config(), &store);
    let groups = engine.find_duplicates(&target).unwrap();

    engine.cancel_token().cancel();
    let removals = engine.remove_duplicates(&groups, false);
    assert_eq!(removals[0].outcome, RemovalOutcome::NotApplied);
    assert!(target.join("b.jpg").exists());
}

#[test]
fn test_inspect_reports_fingerprint_and_fields() {
    let (_tmp, _source, target) = create_trees(&[], &[("IMG_9 (2).png", encode_png(&gradient_image(0)).as_slice())]);
    let file = target.join("IMG_9 (2).png");
    let store = Arc::new(MemoryStore::default().with_fields(&file, Fields {
        captured_at: Some(june_first()),
        ..Fields::default()
    }));

    let inspection = engine(test_config(), &store).inspect(&file);
    assert_eq!(inspection.fingerprint.normalized_name, "img_9");
    assert!(inspection.fingerprint.perceptual_hash.is_some());
    assert_eq!(inspection.fingerprint.embedded_captured_at, Some(june_first()));
    assert!(inspection.embedded_error.is_none());
}
