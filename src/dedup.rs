/// Duplicate detection across sources.
///
/// Every pair of candidates is compared with [`DuplicateDetector::are_duplicates`];
/// positive pairs are unioned into a disjoint-set forest, and every component with
/// more than one member becomes a [`DuplicateGroup`].
use crate::errors::AggregationError;
use crate::models::{CandidateRecord, DuplicateGroup, TaggedCandidate};
use crate::similarity::{distance_m, phone_similarity, string_similarity};
use std::collections::BTreeMap;

/// Thresholds for the pairwise duplicate rules.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupThresholds {
    /// Phone similarity at or above which two records are the same entity.
    pub phone: f64,
    /// Name similarity required together with a matching address or location.
    pub name: f64,
    /// Address similarity that confirms a name match.
    pub address: f64,
    /// Name similarity that only needs a matching location.
    pub strong_name: f64,
    /// Maximum distance in meters for two points to count as the same place.
    pub max_distance_m: f64,
}

impl Default for DedupThresholds {
    fn default() -> Self {
        Self {
            phone: 0.95,
            name: 0.85,
            address: 0.80,
            strong_name: 0.95,
            max_distance_m: 100.0,
        }
    }
}

/// Disjoint-set forest over candidate indices (path halving, union by size).
#[derive(Debug)]
struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
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
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

#[derive(Debug, Clone, Default)]
pub struct DuplicateDetector {
    thresholds: DedupThresholds,
}

impl DuplicateDetector {
    pub fn new(thresholds: DedupThresholds) -> Self {
        Self { thresholds }
    }

    /// Decides whether two records describe the same entity.
    ///
    /// Rules, first match wins:
    /// 1. same email (trimmed, case-insensitive)
    /// 2. phone similarity ≥ 0.95
    /// 3. name similarity ≥ 0.85 and (address similarity ≥ 0.80 or distance ≤ 100 m)
    /// 4. name similarity ≥ 0.95 and distance ≤ 100 m
    pub fn are_duplicates(&self, a: &CandidateRecord, b: &CandidateRecord) -> bool {
        let t = &self.thresholds;

        if let (Some(ea), Some(eb)) = (email_key(a), email_key(b)) {
            if ea == eb {
                return true;
            }
        }

        if phone_similarity(a.phone.as_deref(), b.phone.as_deref()) >= t.phone {
            return true;
        }

        let name_sim = name_similarity(a, b);
        if name_sim < t.name.min(t.strong_name) {
            return false;
        }

        let close = distance_m(a.coordinates.as_ref(), b.coordinates.as_ref()) <= t.max_distance_m;
        if name_sim >= t.name && (address_similarity(a, b) >= t.address || close) {
            return true;
        }

        name_sim >= t.strong_name && close
    }

    /// Groups candidates into transitively-closed duplicate clusters.
    ///
    /// Candidates must carry indices `0..n` in order. Groups list members in
    /// ascending index order and are ordered by their first member; singletons
    /// are not reported.
    pub fn detect(
        &self,
        candidates: &[TaggedCandidate],
    ) -> Result<Vec<DuplicateGroup>, AggregationError> {
        if let Some((position, candidate)) = candidates
            .iter()
            .enumerate()
            .find(|(position, c)| c.index != *position)
        {
            return Err(AggregationError::Detection(format!(
                "candidate at position {} carries index {}",
                position, candidate.index
            )));
        }

        let n = candidates.len();
        let mut forest = UnionFind::new(n);
        for i in 0..n {
            for j in (i + 1)..n {
                if forest.find(i) == forest.find(j) {
                    continue;
                }
                if self.are_duplicates(&candidates[i].record, &candidates[j].record) {
                    forest.union(i, j);
                }
            }
        }

        // Roots keyed by smallest member keeps group order stable.
        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut first_member: Vec<Option<usize>> = vec![None; n];
        for i in 0..n {
            let root = forest.find(i);
            let first = *first_member[root].get_or_insert(i);
            components.entry(first).or_default().push(i);
        }

        let mut seen = vec![false; n];
        let mut groups = Vec::new();
        for indices in components.into_values().filter(|m| m.len() > 1) {
            for &index in &indices {
                if std::mem::replace(&mut seen[index], true) {
                    return Err(AggregationError::Detection(format!(
                        "index {} assigned to more than one group",
                        index
                    )));
                }
            }

            let records: Vec<CandidateRecord> = indices
                .iter()
                .map(|&i| candidates[i].record.clone())
                .collect();
            groups.push(DuplicateGroup {
                similarity_score: group_similarity(&records),
                indices,
                records,
            });
        }

        tracing::debug!(
            "Duplicate detection: {} candidates, {} groups",
            n,
            groups.len()
        );
        Ok(groups)
    }
}

fn email_key(record: &CandidateRecord) -> Option<String> {
    record
        .email
        .as_deref()
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
}

pub fn name_similarity(a: &CandidateRecord, b: &CandidateRecord) -> f64 {
    match (a.name.as_deref(), b.name.as_deref()) {
        (Some(na), Some(nb)) => string_similarity(na, nb),
        _ => 0.0,
    }
}

pub fn address_similarity(a: &CandidateRecord, b: &CandidateRecord) -> f64 {
    if !a.has_address() || !b.has_address() {
        return 0.0;
    }
    string_similarity(&a.address_text(), &b.address_text())
}

/// Mean pairwise similarity across a group.
///
/// Each pair scores the average of its name and address similarity, plus phone
/// similarity when both members have a phone.
pub fn group_similarity(records: &[CandidateRecord]) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;

    for (i, a) in records.iter().enumerate() {
        for b in &records[i + 1..] {
            let mut parts = vec![name_similarity(a, b), address_similarity(a, b)];
            if a.phone.is_some() && b.phone.is_some() {
                parts.push(phone_similarity(a.phone.as_deref(), b.phone.as_deref()));
            }
            total += parts.iter().sum::<f64>() / parts.len() as f64;
            pairs += 1;
        }
    }

    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}
