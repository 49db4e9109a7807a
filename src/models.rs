use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Search filters forwarded to every source (`city`, `sector`, `limit`, ...).
///
/// A `BTreeMap` keeps iteration order stable so cache keys are deterministic.
pub type Filters = BTreeMap<String, Value>;

// ============ Candidate Records ============

/// Latitude / longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Address as returned by a provider: either free text or broken into parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Address {
    Text(String),
    Structured(StructuredAddress),
}

/// Structured address parts. `full` is the provider's one-line rendering when it has one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full: Option<String>,
}

impl Address {
    /// One-line text used for similarity comparisons.
    ///
    /// Structured addresses prefer `full`, otherwise join street, postal code and city.
    pub fn as_text(&self) -> String {
        match self {
            Address::Text(text) => text.clone(),
            Address::Structured(parts) => {
                if let Some(full) = parts.full.as_deref().filter(|f| !f.trim().is_empty()) {
                    return full.to_string();
                }
                [&parts.street, &parts.postal_code, &parts.city]
                    .iter()
                    .filter_map(|p| p.as_deref())
                    .filter(|p| !p.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join(" ")
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_text().trim().is_empty()
    }
}

/// One prospect-like result from a single source, before deduplication.
///
/// The common fields are typed; anything else the provider sent rides along in
/// `extra` and is serialized back out flat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    /// Distinct sources that contributed to a merged record.
    #[serde(
        rename = "_merged_from_sources",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub merged_from_sources: Option<Vec<String>>,
    #[serde(rename = "_is_merged", default, skip_serializing_if = "is_false")]
    pub is_merged: bool,
    /// Provider-specific fields passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// True when the optional text holds something other than whitespace.
pub fn is_filled(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl CandidateRecord {
    pub fn has_address(&self) -> bool {
        self.address.as_ref().is_some_and(|a| !a.is_empty())
    }

    pub fn address_text(&self) -> String {
        self.address.as_ref().map(Address::as_text).unwrap_or_default()
    }
}

/// A candidate as seen by the pipeline: the record plus its batch bookkeeping.
///
/// `index` and `source` never leave the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedCandidate {
    pub index: usize,
    pub source: String,
    pub record: CandidateRecord,
}

// ============ Pipeline Output ============

/// Transitively-linked candidates judged to be the same real-world entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Member indices in ascending order.
    pub indices: Vec<usize>,
    /// Mean pairwise similarity across the group, for reporting only.
    pub similarity_score: f64,
    pub records: Vec<CandidateRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetails {
    pub source_score: f64,
    pub completeness_score: f64,
    pub quality_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_bonus: Option<f64>,
}

/// Composite 0–100 trust metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub total: f64,
    pub details: ScoreDetails,
}

/// Output record. `confidence_score` is absent only when aggregation degraded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub record: CandidateRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<ConfidenceScore>,
}

impl ScoredRecord {
    pub fn total(&self) -> f64 {
        self.confidence_score.as_ref().map_or(0.0, |s| s.total)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationInfo {
    pub original_count: usize,
    pub final_count: usize,
    pub duplicates_removed: usize,
    pub duplicate_groups: usize,
    pub processing_time_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Root output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub merged: Vec<ScoredRecord>,
    pub duplicates: Vec<DuplicateGroup>,
    pub deduplication_info: DeduplicationInfo,
}

// ============ Orchestration ============

/// Outcome of querying one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResult {
    pub success: bool,
    pub results: Vec<CandidateRecord>,
    pub count: usize,
    pub response_time_ms: f64,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SourceResult {
    pub fn ok(results: Vec<CandidateRecord>, response_time_ms: f64, cached: bool) -> Self {
        Self {
            success: true,
            count: results.len(),
            results,
            response_time_ms,
            cached,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, response_time_ms: f64) -> Self {
        Self {
            success: false,
            results: Vec::new(),
            count: 0,
            response_time_ms,
            cached: false,
            error: Some(error.into()),
        }
    }
}

/// Per-source results in the order the sources were requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceResults {
    pub entries: Vec<(String, SourceResult)>,
}

impl SourceResults {
    pub fn push(&mut self, source: impl Into<String>, result: SourceResult) {
        self.entries.push((source.into(), result));
    }

    pub fn get(&self, source: &str) -> Option<&SourceResult> {
        self.entries
            .iter()
            .find(|(name, _)| name == source)
            .map(|(_, result)| result)
    }

    pub fn successful(&self) -> usize {
        self.entries.iter().filter(|(_, r)| r.success).count()
    }

    pub fn total_raw_results(&self) -> usize {
        self.entries.iter().map(|(_, r)| r.count).sum()
    }
}

/// Latency / volume sample recorded after each live source call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStat {
    pub response_time_ms: f64,
    pub results_count: usize,
    pub error: bool,
}

/// Rolling summary of recent calls to one source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStatsSummary {
    pub calls: usize,
    pub avg_response_time_ms: f64,
    pub total_results: usize,
    pub errors: usize,
}

// ============ Search Response ============

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub success: bool,
    pub count: usize,
    pub response_time_ms: f64,
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub total_time_seconds: f64,
    pub sources_used: usize,
    pub sources_successful: usize,
    pub total_raw_results: usize,
    pub by_source: BTreeMap<String, SourceSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
    pub cached_at: Option<String>,
    pub from_cache: bool,
}

/// What the HTTP layer receives from `aggregate_search`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub filters: Filters,
    pub sources_requested: Vec<String>,
    pub aggregated_results: Vec<ScoredRecord>,
    pub duplicates_found: Vec<DuplicateGroup>,
    pub deduplication_info: DeduplicationInfo,
    pub total_found: usize,
    pub search_stats: SearchStats,
    pub cache_info: CacheInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of `POST /api/v1/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub sources: Vec<String>,
}
