/// Collapses duplicate groups into single records.
///
/// The first member (lowest index) is the base. Every other member is folded in
/// field by field through a table of [`FieldRule`]s: a missing base value is
/// always filled, an existing one is replaced only when the rule's `better`
/// test prefers the incoming value. Fields without a `better` test keep the
/// first value seen.
use crate::errors::AggregationError;
use crate::models::{is_filled, CandidateRecord, DuplicateGroup, TaggedCandidate};
use crate::normalize::{coordinate_precision, is_https, is_national_format};
use serde_json::Value;

pub type PresentFn = fn(&CandidateRecord) -> bool;
pub type TakeFn = fn(&mut CandidateRecord, &CandidateRecord);
/// `(current, incoming) -> true` when the incoming value should win.
pub type BetterFn = fn(&CandidateRecord, &CandidateRecord) -> bool;

/// Merge strategy for one field.
#[derive(Clone, Copy)]
pub struct FieldRule {
    pub field: &'static str,
    pub present: PresentFn,
    pub take: TakeFn,
    pub better: Option<BetterFn>,
}

impl std::fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRule")
            .field("field", &self.field)
            .field("has_better", &self.better.is_some())
            .finish()
    }
}

macro_rules! text_rule {
    ($field:ident) => {
        text_rule!($field, None)
    };
    ($field:ident, $better:expr) => {
        FieldRule {
            field: stringify!($field),
            present: |r: &CandidateRecord| is_filled(&r.$field),
            take: |acc: &mut CandidateRecord, other: &CandidateRecord| {
                acc.$field = other.$field.clone()
            },
            better: $better,
        }
    };
}

fn longer_description(current: &CandidateRecord, incoming: &CandidateRecord) -> bool {
    let len = |r: &CandidateRecord| r.description.as_deref().map_or(0, |d| d.trim().chars().count());
    len(incoming) > len(current)
}

fn national_phone(current: &CandidateRecord, incoming: &CandidateRecord) -> bool {
    let national = |r: &CandidateRecord| r.phone.as_deref().is_some_and(is_national_format);
    national(incoming) && !national(current)
}

fn https_website(current: &CandidateRecord, incoming: &CandidateRecord) -> bool {
    let secure = |r: &CandidateRecord| r.website.as_deref().is_some_and(is_https);
    secure(incoming) && !secure(current)
}

fn precise_coordinates(current: &CandidateRecord, incoming: &CandidateRecord) -> bool {
    match (&current.coordinates, &incoming.coordinates) {
        (Some(cur), Some(inc)) => coordinate_precision(inc) > coordinate_precision(cur),
        _ => false,
    }
}

/// The built-in strategy table.
pub fn default_rules() -> Vec<FieldRule> {
    vec![
        text_rule!(name),
        text_rule!(company),
        text_rule!(sector),
        text_rule!(city),
        text_rule!(postal_code),
        text_rule!(email),
        text_rule!(source),
        text_rule!(external_id),
        text_rule!(description, Some(longer_description as BetterFn)),
        text_rule!(phone, Some(national_phone as BetterFn)),
        text_rule!(website, Some(https_website as BetterFn)),
        FieldRule {
            field: "address",
            present: |r: &CandidateRecord| r.has_address(),
            take: |acc: &mut CandidateRecord, other: &CandidateRecord| {
                acc.address = other.address.clone()
            },
            better: None,
        },
        FieldRule {
            field: "coordinates",
            present: |r: &CandidateRecord| r.coordinates.is_some(),
            take: |acc: &mut CandidateRecord, other: &CandidateRecord| {
                acc.coordinates = other.coordinates
            },
            better: Some(precise_coordinates as BetterFn),
        },
    ]
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

#[derive(Debug, Clone)]
pub struct ClusterMerger {
    rules: Vec<FieldRule>,
}

impl Default for ClusterMerger {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl ClusterMerger {
    /// Adds or replaces the rule for `rule.field`.
    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rules.retain(|r| r.field != rule.field);
        self.rules.push(rule);
        self
    }

    /// Folds `incoming` into `acc` according to the rule table.
    pub fn fold(&self, acc: &mut CandidateRecord, incoming: &CandidateRecord) {
        for rule in &self.rules {
            if !(rule.present)(incoming) {
                continue;
            }
            let replace = {
                let current: &CandidateRecord = acc;
                !(rule.present)(current)
                    || rule.better.is_some_and(|better| better(current, incoming))
            };
            if replace {
                (rule.take)(acc, incoming);
            }
        }

        for (key, value) in &incoming.extra {
            if is_blank(Some(value)) {
                continue;
            }
            if is_blank(acc.extra.get(key)) {
                acc.extra.insert(key.clone(), value.clone());
            }
        }
    }

    /// Collapses one duplicate group into a merged record.
    pub fn merge(
        &self,
        group: &DuplicateGroup,
        candidates: &[TaggedCandidate],
    ) -> Result<CandidateRecord, AggregationError> {
        let (&first, rest) = group
            .indices
            .split_first()
            .ok_or_else(|| AggregationError::Merge("empty duplicate group".to_string()))?;

        let member = |index: usize| {
            candidates.get(index).ok_or_else(|| {
                AggregationError::Merge(format!(
                    "group member {} out of range ({} candidates)",
                    index,
                    candidates.len()
                ))
            })
        };

        let base = member(first)?;
        let mut merged = base.record.clone();
        let mut sources = vec![base.source.clone()];

        for &index in rest {
            let other = member(index)?;
            self.fold(&mut merged, &other.record);
            if !sources.contains(&other.source) {
                sources.push(other.source.clone());
            }
        }

        merged.merged_from_sources = Some(sources);
        merged.is_merged = true;
        Ok(merged)
    }

    /// Replaces every group with its merged record and passes singletons through.
    ///
    /// Output follows candidate order, a merged record taking the slot of its
    /// group's first member.
    pub fn merge_all(
        &self,
        groups: &[DuplicateGroup],
        candidates: &[TaggedCandidate],
    ) -> Result<Vec<CandidateRecord>, AggregationError> {
        let mut slot: Vec<Option<usize>> = vec![None; candidates.len()];
        for (group_idx, group) in groups.iter().enumerate() {
            for &index in &group.indices {
                let entry = slot.get_mut(index).ok_or_else(|| {
                    AggregationError::Merge(format!("group member {} out of range", index))
                })?;
                *entry = Some(group_idx);
            }
        }

        let mut output = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match slot.get(candidate.index).copied().flatten() {
                None => output.push(candidate.record.clone()),
                Some(group_idx) => {
                    let group = &groups[group_idx];
                    if group.indices.first() == Some(&candidate.index) {
                        output.push(self.merge(group, candidates)?);
                    }
                }
            }
        }

        Ok(output)
    }
}
