// Source -> target correspondence
//
// Layers run in priority order, each seeing only what earlier layers left open:
// 1. Exact name
// 2. Normalized name (same media kind)
// 3. Exact content hash
// 4. Perceptual similarity (images only)
//
// A source or target is claimed by at most one match. Evidence a layer could
// not disambiguate is kept, and the source is reported `Ambiguous` if no later
// layer matches it.

pub mod layers;

use std::collections::BTreeMap;
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;

pub use layers::{ExactHashLayer, ExactNameLayer, NormalizedNameLayer, PerceptualLayer};

/// Which layer produced a match. Declaration order is trust order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchStrategy {
    ExactName,
    NormalizedName,
    ExactHash,
    PerceptualSimilarity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum MatchResult {
    #[serde(rename_all = "camelCase")]
    Matched {
        source: PathBuf,
        target: PathBuf,
        strategy: MatchStrategy,
        confidence: f64,
    },
    #[serde(rename_all = "camelCase")]
    UnmatchedSource {
        source: PathBuf,
        /// Set when the source could not be fingerprinted.
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UnmatchedTarget {
        target: PathBuf,
        reason: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Ambiguous {
        source: PathBuf,
        candidates: Vec<PathBuf>,
    },
}

/// A pairing proposed by one layer, by index into the matcher's inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerMatch {
    pub source: usize,
    pub target: usize,
    pub confidence: f64,
}

#[derive(Debug, Default)]
pub struct LayerOutcome {
    /// Pairwise disjoint: no source or target appears twice.
    pub matches: Vec<LayerMatch>,
    /// Sources with several equally good targets.
    pub ambiguous: Vec<(usize, Vec<usize>)>,
}

/// The items still open when a layer runs.
pub struct MatchPool<'a> {
    sources: &'a [Fingerprint],
    targets: &'a [Fingerprint],
    source_open: Vec<bool>,
    target_open: Vec<bool>,
}

impl<'a> MatchPool<'a> {
    /// Fingerprints that failed indexing never enter the pool.
    fn new(sources: &'a [Fingerprint], targets: &'a [Fingerprint]) -> Self {
        Self {
            sources,
            targets,
            source_open: sources.iter().map(Fingerprint::is_matchable).collect(),
            target_open: targets.iter().map(Fingerprint::is_matchable).collect(),
        }
    }

    pub fn open_sources(&self) -> impl Iterator<Item = (usize, &'a Fingerprint)> + '_ {
        self.sources.iter().enumerate().filter(|(i, _)| self.source_open[*i])
    }

    pub fn open_targets(&self) -> impl Iterator<Item = (usize, &'a Fingerprint)> + '_ {
        self.targets.iter().enumerate().filter(|(i, _)| self.target_open[*i])
    }

    fn claim(&mut self, m: &LayerMatch) -> bool {
        if !self.source_open[m.source] || !self.target_open[m.target] {
            return false;
        }
        self.source_open[m.source] = false;
        self.target_open[m.target] = false;
        true
    }
}

/// One matching strategy.
pub trait MatchLayer: Send + Sync {
    fn strategy(&self) -> MatchStrategy;

    fn attempt_match(&self, pool: &MatchPool<'_>) -> LayerOutcome;
}

pub struct Matcher {
    layers: Vec<Box<dyn MatchLayer>>,
}

impl Matcher {
    /// The standard four layers.
    pub fn new(similarity_threshold: f64) -> Self {
        Self::with_layers(vec![
            Box::new(ExactNameLayer),
            Box::new(NormalizedNameLayer),
            Box::new(ExactHashLayer),
            Box::new(PerceptualLayer::new(similarity_threshold)),
        ])
    }

    /// Names and content hashes only; visually similar files stay unmatched.
    pub fn without_perceptual() -> Self {
        Self::with_layers(vec![
            Box::new(ExactNameLayer),
            Box::new(NormalizedNameLayer),
            Box::new(ExactHashLayer),
        ])
    }

    pub fn with_layers(layers: Vec<Box<dyn MatchLayer>>) -> Self {
        Self { layers }
    }

    /// Deterministic for a fixed input order. Results list sources in input
    /// order, then unmatched targets in input order.
    pub fn match_all(&self, sources: &[Fingerprint], targets: &[Fingerprint]) -> Vec<MatchResult> {
        let mut pool = MatchPool::new(sources, targets);
        let mut matched: BTreeMap<usize, (LayerMatch, MatchStrategy)> = BTreeMap::new();
        let mut ambiguous: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        for layer in &self.layers {
            let strategy = layer.strategy();
            let outcome = layer.attempt_match(&pool);

            for m in outcome.matches {
                if pool.claim(&m) {
                    log::debug!(
                        "{:?} match: {} -> {} ({:.3})",
                        strategy,
                        sources[m.source].path.display(),
                        targets[m.target].path.display(),
                        m.confidence
                    );
                    ambiguous.remove(&m.source);
                    matched.insert(m.source, (m, strategy));
                }
            }
            for (source, candidates) in outcome.ambiguous {
                // The first layer to find evidence keeps it
                ambiguous.entry(source).or_insert(candidates);
            }
        }

        let mut results = Vec::with_capacity(sources.len() + targets.len());
        let mut target_matched = vec![false; targets.len()];

        for (i, source) in sources.iter().enumerate() {
            if let Some((m, strategy)) = matched.get(&i) {
                target_matched[m.target] = true;
                results.push(MatchResult::Matched {
                    source: source.path.clone(),
                    target: targets[m.target].path.clone(),
                    strategy: *strategy,
                    confidence: m.confidence,
                });
            } else if let Some(candidates) = ambiguous.get(&i) {
                log::warn!(
                    "Ambiguous match for {}: {} candidates",
                    source.path.display(),
                    candidates.len()
                );
                results.push(MatchResult::Ambiguous {
                    source: source.path.clone(),
                    candidates: candidates.iter().map(|t| targets[*t].path.clone()).collect(),
                });
            } else {
                results.push(MatchResult::UnmatchedSource {
                    source: source.path.clone(),
                    reason: source.error.as_ref().map(|e| e.reason.clone()),
                });
            }
        }

        for (i, target) in targets.iter().enumerate() {
            if !target_matched[i] {
                results.push(MatchResult::UnmatchedTarget {
                    target: target.path.clone(),
                    reason: target.error.as_ref().map(|e| e.reason.clone()),
                });
            }
        }

        results
    }
}
