/// Aggregation pipeline: collect → detect → merge → score → rank.
///
/// Each stage returns `Result<_, AggregationError>`. `aggregate` composes them
/// and, on failure, degrades to the flattened candidates so a search never fails
/// because of deduplication.
use crate::dedup::DuplicateDetector;
use crate::errors::AggregationError;
use crate::merge::ClusterMerger;
use crate::models::{
    AggregationResult, DeduplicationInfo, DuplicateGroup, ScoredRecord, SourceResults,
    TaggedCandidate,
};
use crate::scoring::{rank, ConfidenceScorer};
use std::time::Instant;

/// Flattens per-source results into one indexed candidate list.
///
/// Sources are taken in request order and candidates in the order each source
/// returned them; failed sources contribute nothing. A record without its own
/// `source` field inherits the source it came from.
pub fn collect(sources: &SourceResults) -> Vec<TaggedCandidate> {
    let mut candidates = Vec::with_capacity(sources.total_raw_results());

    for (source, result) in &sources.entries {
        if !result.success {
            continue;
        }
        for record in &result.results {
            let mut record = record.clone();
            if record.source.is_none() {
                record.source = Some(source.clone());
            }
            candidates.push(TaggedCandidate {
                index: candidates.len(),
                source: source.clone(),
                record,
            });
        }
    }

    candidates
}

/// Milliseconds since `started`, rounded to two decimals.
pub fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 100_000.0).round() / 100.0
}

#[derive(Debug, Clone, Default)]
pub struct ResultMerger {
    detector: DuplicateDetector,
    merger: ClusterMerger,
    scorer: ConfidenceScorer,
}

impl ResultMerger {
    pub fn new(detector: DuplicateDetector, merger: ClusterMerger, scorer: ConfidenceScorer) -> Self {
        Self {
            detector,
            merger,
            scorer,
        }
    }

    /// Runs the dedup / merge / score / rank stages over collected candidates.
    pub fn run(
        &self,
        candidates: &[TaggedCandidate],
    ) -> Result<(Vec<ScoredRecord>, Vec<DuplicateGroup>), AggregationError> {
        let groups = self.detector.detect(candidates)?;
        let merged = self.merger.merge_all(&groups, candidates)?;
        let scored = self.scorer.score_all(merged)?;
        Ok((rank(scored), groups))
    }

    /// Aggregates per-source results into ranked, deduplicated records.
    pub fn aggregate(&self, sources: &SourceResults) -> AggregationResult {
        let started = Instant::now();
        let candidates = collect(sources);
        let original_count = candidates.len();

        tracing::info!(
            "Aggregating {} candidates from {} sources",
            original_count,
            sources.entries.len()
        );

        match self.run(&candidates) {
            Ok((merged, duplicates)) => {
                let final_count = merged.len();
                tracing::info!(
                    "Aggregation complete: {} → {} records, {} duplicate groups",
                    original_count,
                    final_count,
                    duplicates.len()
                );
                AggregationResult {
                    deduplication_info: DeduplicationInfo {
                        original_count,
                        final_count,
                        duplicates_removed: original_count - final_count,
                        duplicate_groups: duplicates.len(),
                        processing_time_ms: elapsed_ms(started),
                        error: None,
                    },
                    merged,
                    duplicates,
                }
            }
            Err(e) => {
                tracing::warn!("Aggregation degraded, returning raw candidates: {}", e);
                let merged: Vec<ScoredRecord> = candidates
                    .into_iter()
                    .map(|c| ScoredRecord {
                        record: c.record,
                        confidence_score: None,
                    })
                    .collect();
                AggregationResult {
                    deduplication_info: DeduplicationInfo {
                        original_count,
                        final_count: merged.len(),
                        duplicates_removed: 0,
                        duplicate_groups: 0,
                        processing_time_ms: elapsed_ms(started),
                        error: Some(e.to_string()),
                    },
                    merged,
                    duplicates: Vec::new(),
                }
            }
        }
    }
}
