// The four standard match layers

use std::collections::{BTreeMap, HashSet};

use crate::constants::{
    CONFIDENCE_EXACT_HASH, CONFIDENCE_EXACT_NAME, CONFIDENCE_NORMALIZED_NAME,
    CONFIDENCE_PERCEPTUAL_SCALE, SIMILARITY_TIE_EPSILON,
};
use crate::fingerprint::{Fingerprint, MediaKind};
use super::{LayerMatch, LayerOutcome, MatchLayer, MatchPool, MatchStrategy};

/// Pair items sharing a key. A key held by exactly one open source and one
/// open target is a match; any other overlap is ambiguous for every source
/// holding that key.
fn match_by_key<K: Ord>(
    pool: &MatchPool<'_>,
    confidence: f64,
    source_key: impl Fn(&Fingerprint) -> Option<K>,
    target_key: impl Fn(&Fingerprint) -> Option<K>,
) -> LayerOutcome {
    let mut buckets: BTreeMap<K, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
    for (i, fp) in pool.open_targets() {
        if let Some(key) = target_key(fp) {
            buckets.entry(key).or_default().1.push(i);
        }
    }
    for (i, fp) in pool.open_sources() {
        if let Some(key) = source_key(fp) {
            if let Some(bucket) = buckets.get_mut(&key) {
                bucket.0.push(i);
            }
        }
    }

    let mut outcome = LayerOutcome::default();
    for (sources, targets) in buckets.into_values() {
        match (sources.as_slice(), targets.as_slice()) {
            ([], _) => {}
            ([source], [target]) => outcome.matches.push(LayerMatch {
                source: *source,
                target: *target,
                confidence,
            }),
            _ => {
                for source in &sources {
                    outcome.ambiguous.push((*source, targets.clone()));
                }
            }
        }
    }
    outcome.matches.sort_by_key(|m| m.source);
    outcome.ambiguous.sort_by_key(|(source, _)| *source);
    outcome
}

/// Source name equals the target's on-disk file name.
pub struct ExactNameLayer;

impl MatchLayer for ExactNameLayer {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::ExactName
    }

    fn attempt_match(&self, pool: &MatchPool<'_>) -> LayerOutcome {
        let key = |fp: &Fingerprint| Some(fp.file_name.clone()).filter(|n| !n.is_empty());
        match_by_key(pool, CONFIDENCE_EXACT_NAME, key, key)
    }
}

/// Same normalized name and media kind; absorbs "(1)"-style renames and
/// format conversions that keep the stem.
pub struct NormalizedNameLayer;

impl MatchLayer for NormalizedNameLayer {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::NormalizedName
    }

    fn attempt_match(&self, pool: &MatchPool<'_>) -> LayerOutcome {
        let key = |fp: &Fingerprint| {
            if fp.normalized_name.is_empty() {
                None
            } else {
                Some((fp.normalized_name.clone(), fp.kind))
            }
        };
        match_by_key(pool, CONFIDENCE_NORMALIZED_NAME, key, key)
    }
}

/// Byte-identical content under an unrelated name.
pub struct ExactHashLayer;

impl MatchLayer for ExactHashLayer {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::ExactHash
    }

    fn attempt_match(&self, pool: &MatchPool<'_>) -> LayerOutcome {
        let key = |fp: &Fingerprint| fp.exact_hash.clone();
        match_by_key(pool, CONFIDENCE_EXACT_HASH, key, key)
    }
}

/// Nearest perceptual hash at or above the threshold. Sources are taken in
/// input order and each claims its best remaining target.
pub struct PerceptualLayer {
    threshold: f64,
}

impl PerceptualLayer {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl MatchLayer for PerceptualLayer {
    fn strategy(&self) -> MatchStrategy {
        MatchStrategy::PerceptualSimilarity
    }

    fn attempt_match(&self, pool: &MatchPool<'_>) -> LayerOutcome {
        let targets: Vec<_> = pool
            .open_targets()
            .filter(|(_, fp)| fp.kind == MediaKind::Image)
            .filter_map(|(i, fp)| fp.perceptual_hash.as_ref().map(|h| (i, h)))
            .collect();

        let mut taken: HashSet<usize> = HashSet::new();
        let mut outcome = LayerOutcome::default();

        for (source, fp) in pool.open_sources() {
            let hash = match (&fp.perceptual_hash, fp.kind) {
                (Some(hash), MediaKind::Image) => hash,
                _ => continue,
            };

            let mut scored: Vec<(usize, f64)> = targets
                .iter()
                .filter(|(t, _)| !taken.contains(t))
                .map(|(t, target_hash)| (*t, hash.similarity(target_hash)))
                .filter(|(_, similarity)| *similarity >= self.threshold)
                .collect();
            if scored.is_empty() {
                continue;
            }
            // Best first; equal scores keep target input order
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));

            let best = scored[0].1;
            let tied: Vec<usize> = scored
                .iter()
                .take_while(|(_, similarity)| best - similarity <= SIMILARITY_TIE_EPSILON)
                .map(|(t, _)| *t)
                .collect();

            if tied.len() > 1 {
                outcome.ambiguous.push((source, tied));
                continue;
            }

            taken.insert(scored[0].0);
            outcome.matches.push(LayerMatch {
                source,
                target: scored[0].0,
                confidence: best * CONFIDENCE_PERCEPTUAL_SCALE,
            });
        }

        outcome
    }
}
