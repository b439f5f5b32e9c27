//! # Evidence Reconciliation
//!
//! Rewrites the effect references of every evidence record through the
//! elimination mapping, then merges evidence records sharing the natural key
//! `(citation, type, uri, publisher)` by unioning their effect references.

use crate::model::{Evidence, EvidenceKey};
use crate::rewrite::{rewrite_references, EliminationMapping, RewriteStats};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use tracing::{debug, instrument};

/// Result of reconciling the evidence collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceOutcome {
    /// One record per natural key, sorted by key
    pub evidence: Vec<Evidence>,
    /// Number of records read
    pub input_records: usize,
    /// Number of records merged into another one
    pub merged: usize,
    pub rewrite: RewriteStats,
}

/// Rewrite and deduplicate evidence records.
///
/// Callers are expected to check the mapping against the current effect
/// version first (see [`EliminationMapping::ensure_current`]).
#[instrument(skip_all, fields(records = records.len(), eliminated = mapping.eliminated_count()))]
pub fn reconcile_evidence(records: Vec<Evidence>, mapping: &EliminationMapping) -> EvidenceOutcome {
    let input_records = records.len();

    let (rewritten, rewrite) = records
        .into_par_iter()
        .map(|mut record| {
            let mut stats = RewriteStats::default();
            record.effect_ids = rewrite_references(mapping, &record.effect_ids, &mut stats);
            (record, stats)
        })
        .fold(
            || (Vec::new(), RewriteStats::default()),
            |(mut records, stats), (record, record_stats)| {
                records.push(record);
                (records, stats.merge(record_stats))
            },
        )
        .reduce(
            || (Vec::new(), RewriteStats::default()),
            |(mut left, left_stats), (right, right_stats)| {
                left.extend(right);
                (left, left_stats.merge(right_stats))
            },
        );

    let mut groups: FxHashMap<EvidenceKey, Evidence> = FxHashMap::default();
    for record in rewritten {
        match groups.get_mut(&record.key()) {
            Some(merged) => merge_into(merged, record),
            None => {
                groups.insert(record.key(), record);
            }
        }
    }

    let mut evidence: Vec<Evidence> = groups.into_values().collect();
    evidence.sort_by_cached_key(|record| record.key());
    let merged = input_records - evidence.len();

    debug!(
        merged,
        rewritten = rewrite.rewritten,
        dangling = rewrite.dangling.len(),
        "reconciled evidence collection"
    );

    EvidenceOutcome {
        evidence,
        input_records,
        merged,
        rewrite,
    }
}

/// Fold a duplicate into the record that represents its natural key. The
/// smallest storage id wins so the output does not depend on scan order.
fn merge_into(target: &mut Evidence, duplicate: Evidence) {
    target.effect_ids.extend(duplicate.effect_ids);
    target.id = match (target.id.take(), duplicate.id) {
        (Some(left), Some(right)) => Some(left.min(right)),
        (left, right) => left.or(right),
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Effect, EffectId};
    use crate::store::Version;
    use std::collections::BTreeSet;

    fn ids(values: &[&str]) -> BTreeSet<EffectId> {
        values.iter().map(|v| EffectId::from(*v)).collect()
    }

    fn evidence(citation: &str, effects: &[&str]) -> Evidence {
        Evidence::new(
            Some(citation),
            Some("article"),
            Some("https://doi.org/10.1000/x"),
            Some("nature"),
            ids(effects),
        )
    }

    fn mapping() -> EliminationMapping {
        let mut canonical = Effect::new("E1", Some("t"), None, None, vec![]);
        canonical.eliminated_ids = ids(&["E2"]);
        let other = Effect::new("E3", Some("u"), None, None, vec![]);
        EliminationMapping::from_effects(Version(1), &[canonical, other]).unwrap()
    }

    #[test]
    fn test_eliminated_reference_is_rewritten() {
        let outcome = reconcile_evidence(vec![evidence("smith 2021", &["E2"])], &mapping());
        assert_eq!(outcome.evidence.len(), 1);
        assert_eq!(outcome.evidence[0].effect_ids, ids(&["E1"]));
        assert_eq!(outcome.rewrite.rewritten, 1);
    }

    #[test]
    fn test_duplicates_merge_with_set_union() {
        let outcome = reconcile_evidence(
            vec![
                evidence("smith 2021", &["E1"]).with_id("ev2"),
                evidence("smith 2021", &["E3"]).with_id("ev1"),
            ],
            &mapping(),
        );
        assert_eq!(outcome.evidence.len(), 1);
        assert_eq!(outcome.evidence[0].effect_ids, ids(&["E1", "E3"]));
        assert_eq!(outcome.evidence[0].id.as_deref(), Some("ev1"));
        assert_eq!(outcome.merged, 1);
    }

    #[test]
    fn test_references_collapsing_onto_one_canonical() {
        let outcome = reconcile_evidence(
            vec![
                evidence("smith 2021", &["E1", "E2"]),
                evidence("smith 2021", &["E2"]),
            ],
            &mapping(),
        );
        assert_eq!(outcome.evidence[0].effect_ids, ids(&["E1"]));
        assert_eq!(outcome.rewrite.collapsed, 1);
    }

    #[test]
    fn test_distinct_natural_keys_are_kept() {
        let mut other_publisher = evidence("smith 2021", &["E1"]);
        other_publisher.publisher = Some("science".to_string());
        let outcome = reconcile_evidence(
            vec![evidence("smith 2021", &["E1"]), other_publisher],
            &mapping(),
        );
        assert_eq!(outcome.evidence.len(), 2);
        assert_eq!(outcome.merged, 0);
    }

    #[test]
    fn test_evidence_without_effects_is_kept() {
        let outcome = reconcile_evidence(vec![evidence("lone", &[])], &mapping());
        assert_eq!(outcome.evidence.len(), 1);
        assert!(outcome.evidence[0].effect_ids.is_empty());
    }

    #[test]
    fn test_unknown_references_are_reported() {
        let outcome = reconcile_evidence(vec![evidence("smith 2021", &["E404"])], &mapping());
        assert_eq!(outcome.evidence[0].effect_ids, ids(&["E404"]));
        assert_eq!(outcome.rewrite.dangling, ids(&["E404"]));
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let mapping = mapping();
        let first = reconcile_evidence(
            vec![
                evidence("a", &["E2"]).with_id("x1"),
                evidence("a", &["E3"]).with_id("x2"),
                evidence("b", &["E1"]).with_id("x3"),
            ],
            &mapping,
        );
        let second = reconcile_evidence(first.evidence.clone(), &mapping);
        assert_eq!(first.evidence, second.evidence);
        assert_eq!(second.merged, 0);
        assert_eq!(second.rewrite.rewritten, 0);
    }
}
