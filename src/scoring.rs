use crate::errors::AggregationError;
use crate::models::{is_filled, CandidateRecord, ConfidenceScore, ScoreDetails, ScoredRecord};
use crate::normalize::{is_valid_email, is_valid_phone, is_valid_website};
use std::cmp::Ordering;
use std::collections::HashMap;

pub const MAX_SCORE: f64 = 100.0;

/// Weights and bonuses feeding the confidence score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringWeights {
    /// Trust per source id; unknown sources score 0.
    pub sources: HashMap<String, f64>,
    /// Weight per non-empty field.
    pub fields: Vec<(&'static str, f64)>,
    pub name_length_bonus: f64,
    pub valid_email_bonus: f64,
    pub valid_phone_bonus: f64,
    pub valid_website_bonus: f64,
    pub coordinates_bonus: f64,
    pub merged_bonus: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        let sources = [
            ("google_maps", 30.0),
            ("pages_jaunes", 25.0),
            ("nominatim", 20.0),
            ("hunter", 15.0),
        ]
        .into_iter()
        .map(|(source, weight)| (source.to_string(), weight))
        .collect();

        Self {
            sources,
            fields: vec![
                ("name", 10.0),
                ("phone", 10.0),
                ("email", 10.0),
                ("company", 5.0),
                ("address", 5.0),
                ("website", 5.0),
                ("description", 3.0),
                ("coordinates", 3.0),
                ("city", 2.0),
                ("postal_code", 2.0),
            ],
            name_length_bonus: 2.0,
            valid_email_bonus: 3.0,
            valid_phone_bonus: 3.0,
            valid_website_bonus: 2.0,
            coordinates_bonus: 2.0,
            merged_bonus: 10.0,
        }
    }
}

fn field_present(record: &CandidateRecord, field: &str) -> bool {
    match field {
        "name" => is_filled(&record.name),
        "company" => is_filled(&record.company),
        "sector" => is_filled(&record.sector),
        "city" => is_filled(&record.city),
        "postal_code" => is_filled(&record.postal_code),
        "address" => record.has_address(),
        "phone" => is_filled(&record.phone),
        "email" => is_filled(&record.email),
        "website" => is_filled(&record.website),
        "description" => is_filled(&record.description),
        "coordinates" => record.coordinates.is_some(),
        other => record.extra.get(other).is_some_and(|v| match v {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => !s.trim().is_empty(),
            _ => true,
        }),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfidenceScorer {
    weights: ScoringWeights,
}

impl ConfidenceScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    pub fn source_score(&self, record: &CandidateRecord) -> f64 {
        record
            .source
            .as_deref()
            .and_then(|s| self.weights.sources.get(s))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn completeness_score(&self, record: &CandidateRecord) -> f64 {
        self.weights
            .fields
            .iter()
            .filter(|(field, _)| field_present(record, field))
            .map(|(_, weight)| weight)
            .sum()
    }

    pub fn quality_score(&self, record: &CandidateRecord) -> f64 {
        let w = &self.weights;
        let mut score = 0.0;

        if record
            .name
            .as_deref()
            .is_some_and(|n| n.trim().chars().count() > 3)
        {
            score += w.name_length_bonus;
        }
        if record.email.as_deref().is_some_and(is_valid_email) {
            score += w.valid_email_bonus;
        }
        if record.phone.as_deref().is_some_and(is_valid_phone) {
            score += w.valid_phone_bonus;
        }
        if record.website.as_deref().is_some_and(is_valid_website) {
            score += w.valid_website_bonus;
        }
        if record.coordinates.is_some() {
            score += w.coordinates_bonus;
        }

        score
    }

    /// Scores one record. The total is capped at 100, not normalized.
    pub fn score(&self, record: &CandidateRecord) -> Result<ConfidenceScore, AggregationError> {
        let source_score = self.source_score(record);
        let completeness_score = self.completeness_score(record);
        let quality_score = self.quality_score(record);
        let merged_bonus = record.is_merged.then_some(self.weights.merged_bonus);

        let raw = source_score + completeness_score + quality_score + merged_bonus.unwrap_or(0.0);
        if !raw.is_finite() || raw < 0.0 {
            return Err(AggregationError::Scoring(format!(
                "score {} out of range for {:?}",
                raw,
                record.name.as_deref().unwrap_or("<unnamed>")
            )));
        }

        Ok(ConfidenceScore {
            total: raw.min(MAX_SCORE),
            details: ScoreDetails {
                source_score,
                completeness_score,
                quality_score,
                merged_bonus,
            },
        })
    }

    pub fn score_all(
        &self,
        records: Vec<CandidateRecord>,
    ) -> Result<Vec<ScoredRecord>, AggregationError> {
        records
            .into_iter()
            .map(|record| {
                let score = self.score(&record)?;
                Ok(ScoredRecord {
                    record,
                    confidence_score: Some(score),
                })
            })
            .collect()
    }
}

/// Stable sort by confidence total, highest first.
pub fn rank(mut records: Vec<ScoredRecord>) -> Vec<ScoredRecord> {
    records.sort_by(|a, b| b.total().partial_cmp(&a.total()).unwrap_or(Ordering::Equal));
    records
}
