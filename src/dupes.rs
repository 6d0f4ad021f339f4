// Duplicate detection within one tree
//
// Exact-hash groups first. Images left ungrouped by content are then joined
// by perceptual similarity, transitively with union-find: A~B and B~C puts
// A, B and C in one group even when A and C alone fall below the threshold.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, MediaKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuplicateReason {
    /// Every member has the same content hash.
    ExactHash,
    /// At least one member only joined through perceptual similarity.
    PerceptualSimilarity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    /// Sorted by path; always two or more.
    pub members: Vec<PathBuf>,
    pub keeper: PathBuf,
    pub reason: DuplicateReason,
}

struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(len: usize) -> Self {
        Self { parent: (0..len).collect(), rank: vec![0; len] }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            Ordering::Less => self.parent[ra] = rb,
            Ordering::Greater => self.parent[rb] = ra,
            Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

pub struct DuplicateDetector {
    threshold: f64,
}

impl DuplicateDetector {
    pub fn new(similarity_threshold: f64) -> Self {
        Self { threshold: similarity_threshold }
    }

    /// Partition the duplicated subset of `fingerprints` into groups.
    /// Fingerprints that failed indexing are ignored. Groups are sorted by keeper.
    pub fn find_duplicates(&self, fingerprints: &[Fingerprint]) -> Vec<DuplicateGroup> {
        let items: Vec<&Fingerprint> = fingerprints.iter().filter(|fp| fp.is_matchable()).collect();
        let mut sets = UnionFind::new(items.len());

        // Exact content
        let mut by_hash: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, fp) in items.iter().enumerate() {
            if let Some(hash) = fp.exact_hash.as_deref() {
                by_hash.entry(hash).or_default().push(i);
            }
        }
        for bucket in by_hash.values() {
            for &i in &bucket[1..] {
                sets.union(bucket[0], i);
            }
        }

        // Perceptual similarity, only between images no exact group claimed
        let images: Vec<usize> = (0..items.len())
            .filter(|i| items[*i].kind == MediaKind::Image && items[*i].perceptual_hash.is_some())
            .filter(|i| {
                items[*i]
                    .exact_hash
                    .as_deref()
                    .and_then(|h| by_hash.get(h))
                    .map_or(true, |bucket| bucket.len() == 1)
            })
            .collect();
        for (n, &a) in images.iter().enumerate() {
            for &b in &images[n + 1..] {
                if let (Some(ha), Some(hb)) = (&items[a].perceptual_hash, &items[b].perceptual_hash) {
                    if ha.similarity(hb) >= self.threshold {
                        sets.union(a, b);
                    }
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<&Fingerprint>> = BTreeMap::new();
        for i in 0..items.len() {
            let root = sets.find(i);
            groups.entry(root).or_default().push(items[i]);
        }

        let mut result: Vec<DuplicateGroup> = groups
            .into_values()
            .filter(|members| members.len() >= 2)
            .filter_map(|members| build_group(&members))
            .collect();
        result.sort_by(|a, b| a.keeper.cmp(&b.keeper));

        log::info!(
            "Found {} duplicate group(s) covering {} file(s)",
            result.len(),
            result.iter().map(|g| g.members.len()).sum::<usize>()
        );
        result
    }
}

fn build_group(members: &[&Fingerprint]) -> Option<DuplicateGroup> {
    let keeper = members.iter().copied().min_by(|a, b| keeper_order(a, b))?;

    let first_hash = members[0].exact_hash.as_deref();
    let reason = if first_hash.is_some() && members.iter().all(|m| m.exact_hash.as_deref() == first_hash) {
        DuplicateReason::ExactHash
    } else {
        DuplicateReason::PerceptualSimilarity
    };

    let mut paths: Vec<PathBuf> = members.iter().map(|m| m.path.clone()).collect();
    paths.sort();

    Some(DuplicateGroup {
        members: paths,
        keeper: keeper.path.clone(),
        reason,
    })
}

/// Keeper preference: capture time present, then larger file, then smaller path.
fn keeper_order(a: &Fingerprint, b: &Fingerprint) -> Ordering {
    b.embedded_captured_at
        .is_some()
        .cmp(&a.embedded_captured_at.is_some())
        .then_with(|| b.byte_size.cmp(&a.byte_size))
        .then_with(|| a.path.cmp(&b.path))
}
