//! # Variant Effect Reconciliation
//!
//! Rewrites the effect references carried by variant clusters and collapses
//! records that share the same variant id.

use crate::model::{Variant, VariantId};
use crate::rewrite::{rewrite_references, EliminationMapping, RewriteStats};
use rayon::prelude::*;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Result of reconciling variant effect references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantEffectOutcome {
    /// One record per variant id, sorted by id
    pub variants: Vec<Variant>,
    pub input_records: usize,
    /// Records sharing an id with another record
    pub merged_duplicates: usize,
    pub rewrite: RewriteStats,
}

/// Rewrite every variant's effect references through the mapping and merge
/// records with identical ids by set union.
#[instrument(skip_all, fields(records = variants.len(), eliminated = mapping.eliminated_count()))]
pub fn reconcile_variant_effects(
    variants: Vec<Variant>,
    mapping: &EliminationMapping,
) -> VariantEffectOutcome {
    let input_records = variants.len();

    let rewritten: Vec<(Variant, RewriteStats)> = variants
        .into_par_iter()
        .map(|mut variant| {
            let mut stats = RewriteStats::default();
            variant.effect_ids = rewrite_references(mapping, &variant.effect_ids, &mut stats);
            (variant, stats)
        })
        .collect();

    let mut rewrite = RewriteStats::default();
    let mut by_id: BTreeMap<VariantId, Variant> = BTreeMap::new();
    for (variant, stats) in rewritten {
        rewrite = rewrite.merge(stats);
        match by_id.get_mut(&variant.id) {
            Some(existing) => existing.absorb(&variant),
            None => {
                by_id.insert(variant.id.clone(), variant);
            }
        }
    }

    let variants: Vec<Variant> = by_id.into_values().collect();
    let merged_duplicates = input_records - variants.len();
    debug!(
        merged_duplicates,
        rewritten = rewrite.rewritten,
        "reconciled variant effect references"
    );

    VariantEffectOutcome {
        variants,
        input_records,
        merged_duplicates,
        rewrite,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Alias, Characterization, Effect, EffectId};
    use crate::store::Version;
    use std::collections::BTreeSet;

    fn mapping() -> EliminationMapping {
        let mut canonical = Effect::new("E1", Some("t"), None, None, vec![]);
        canonical.eliminated_ids = BTreeSet::from([EffectId::from("E2")]);
        let other = Effect::new("E3", Some("u"), None, None, vec![]);
        EliminationMapping::from_effects(Version(1), &[canonical, other]).unwrap()
    }

    #[test]
    fn test_effect_references_are_rewritten() {
        let outcome = reconcile_variant_effects(
            vec![Variant::new("V1").with_effect("E2").with_effect("E3")],
            &mapping(),
        );
        assert_eq!(
            outcome.variants[0].effect_ids,
            BTreeSet::from([EffectId::from("E1"), EffectId::from("E3")])
        );
        assert_eq!(outcome.rewrite.rewritten, 1);
    }

    #[test]
    fn test_same_id_records_are_unioned() {
        let outcome = reconcile_variant_effects(
            vec![
                Variant::new("V1")
                    .with_alias(Alias::new("pango", "B.1.1.7"))
                    .with_effect("E1"),
                Variant::new("V1")
                    .with_alias(Alias::new("who", "Alpha"))
                    .with_aa_changes(Characterization::new("phe", vec!["S:N501Y".into()]))
                    .with_effect("E2"),
                Variant::new("V2"),
            ],
            &mapping(),
        );

        assert_eq!(outcome.variants.len(), 2);
        assert_eq!(outcome.merged_duplicates, 1);
        let merged = &outcome.variants[0];
        assert_eq!(merged.id, VariantId::from("V1"));
        assert_eq!(merged.aliases.len(), 2);
        assert_eq!(merged.aa_change_groups.len(), 1);
        assert_eq!(merged.effect_ids, BTreeSet::from([EffectId::from("E1")]));
    }

    #[test]
    fn test_distinct_ids_with_same_content_are_kept() {
        let outcome = reconcile_variant_effects(
            vec![
                Variant::new("V1").with_effect("E1"),
                Variant::new("V2").with_effect("E1"),
            ],
            &mapping(),
        );
        assert_eq!(outcome.variants.len(), 2);
        assert_eq!(outcome.merged_duplicates, 0);
    }

    #[test]
    fn test_output_is_sorted_by_id() {
        let outcome = reconcile_variant_effects(
            vec![Variant::new("V3"), Variant::new("V1"), Variant::new("V2")],
            &mapping(),
        );
        let ids: Vec<&str> = outcome.variants.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["V1", "V2", "V3"]);
    }
}
