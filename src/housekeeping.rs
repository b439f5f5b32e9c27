//! # Housekeeping
//!
//! Maintenance passes over the auxiliary collections: amino-acid change records
//! repeated by ingestion, and protein regions describing proteins no structure
//! annotation knows about. Also lists the proteins named by variant amino-acid
//! changes that no structure characterizes.

use crate::model::{AaChange, ProteinRegion, Structure, Variant};
use std::collections::BTreeSet;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AaChangeOutcome {
    /// One record per change id, sorted by id
    pub changes: Vec<AaChange>,
    pub removed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProteinRegionOutcome {
    pub regions: Vec<ProteinRegion>,
    /// Protein names of the dropped regions
    pub pruned_proteins: Vec<String>,
    pub removed: usize,
}

/// Housekeeping counters included in a pass report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HousekeepingReport {
    pub aa_changes_removed: usize,
    pub protein_regions_removed: usize,
    /// Proteins of the dropped protein regions
    pub pruned_region_proteins: Vec<String>,
    /// Proteins named by variant amino-acid changes but absent from every structure
    pub undescribed_variant_proteins: Vec<String>,
}

/// Keep one amino-acid change per `change_id`, the one with the smallest id.
#[instrument(skip_all, fields(records = changes.len()))]
pub fn dedupe_aa_changes(changes: Vec<AaChange>) -> AaChangeOutcome {
    let input = changes.len();
    let mut kept: FxHashMap<String, AaChange> = FxHashMap::default();
    for change in changes {
        match kept.get_mut(&change.change_id) {
            Some(current) if change.id < current.id => *current = change,
            Some(_) => {}
            None => {
                kept.insert(change.change_id.clone(), change);
            }
        }
    }

    let mut changes: Vec<AaChange> = kept.into_values().collect();
    changes.sort_by(|a, b| a.id.cmp(&b.id));
    let removed = input - changes.len();
    debug!(removed, "deduplicated amino-acid changes");
    AaChangeOutcome { changes, removed }
}

/// Drop protein regions whose protein is not characterized by any structure.
#[instrument(skip_all, fields(regions = regions.len(), structures = structures.len()))]
pub fn prune_protein_regions(
    regions: Vec<ProteinRegion>,
    structures: &[Structure],
) -> ProteinRegionOutcome {
    let described = described_proteins(structures);

    let (kept, dropped): (Vec<ProteinRegion>, Vec<ProteinRegion>) = regions
        .into_iter()
        .partition(|region| described.contains(region.protein_name.as_str()));

    let mut pruned_proteins: Vec<String> =
        dropped.iter().map(|r| r.protein_name.clone()).collect();
    pruned_proteins.sort();
    pruned_proteins.dedup();

    if !dropped.is_empty() {
        warn!(
            removed = dropped.len(),
            proteins = ?pruned_proteins,
            "dropping protein regions of undescribed proteins"
        );
    }

    ProteinRegionOutcome {
        regions: kept,
        removed: dropped.len(),
        pruned_proteins,
    }
}

/// Proteins referenced by variant amino-acid changes (the part of a change
/// before `:`) that no structure characterizes, sorted by name.
#[instrument(skip_all, fields(variants = variants.len(), structures = structures.len()))]
pub fn undescribed_variant_proteins(
    variants: &[Variant],
    structures: &[Structure],
) -> Vec<String> {
    let described = described_proteins(structures);
    let missing: BTreeSet<&str> = variants
        .iter()
        .flat_map(|v| v.aa_change_groups.iter())
        .flat_map(|group| group.changes.iter())
        .filter_map(|change| change.split(':').next())
        .filter(|protein| !protein.is_empty() && !described.contains(protein))
        .collect();

    if !missing.is_empty() {
        warn!(
            count = missing.len(),
            proteins = ?missing,
            "variant changes reference proteins without a structure"
        );
    }
    missing.into_iter().map(str::to_string).collect()
}

fn described_proteins(structures: &[Structure]) -> FxHashSet<&str> {
    structures
        .iter()
        .flat_map(|s| s.protein_characterization.iter())
        .map(|p| p.protein_name.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Characterization;

    #[test]
    fn test_duplicate_changes_keep_minimum_id() {
        let outcome = dedupe_aa_changes(vec![
            AaChange::new("c3", "S_N501Y"),
            AaChange::new("c1", "S_N501Y"),
            AaChange::new("c2", "S_E484K"),
        ]);
        let ids: Vec<&str> = outcome.changes.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
        assert_eq!(outcome.removed, 1);
    }

    #[test]
    fn test_regions_of_undescribed_proteins_are_pruned() {
        let structures = vec![Structure::new("s1", "NC_045512")
            .with_protein("Spike (surface glycoprotein)")
            .with_protein("NSP3")];
        let outcome = prune_protein_regions(
            vec![
                ProteinRegion::new("r1", "Spike (surface glycoprotein)"),
                ProteinRegion::new("r2", "ORF9b"),
                ProteinRegion::new("r3", "ORF9b"),
                ProteinRegion::new("r4", "NSP3"),
            ],
            &structures,
        );
        let kept: Vec<&str> = outcome.regions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(kept, vec!["r1", "r4"]);
        assert_eq!(outcome.removed, 2);
        assert_eq!(outcome.pruned_proteins, vec!["ORF9b".to_string()]);
    }

    #[test]
    fn test_no_structures_prunes_everything() {
        let outcome = prune_protein_regions(vec![ProteinRegion::new("r1", "N")], &[]);
        assert!(outcome.regions.is_empty());
        assert_eq!(outcome.removed, 1);
    }

    #[test]
    fn test_variant_proteins_without_structure_are_listed() {
        let structures = vec![Structure::new("s1", "NC_045512").with_protein("S")];
        let variants = vec![
            Variant::new("1").with_aa_changes(Characterization::new(
                "phe",
                vec!["S:N501Y".into(), "ORF8:Q27*".into()],
            )),
            Variant::new("2")
                .with_aa_changes(Characterization::new("covariants", vec!["ORF8:R52I".into()]))
                .with_aa_changes(Characterization::new("phe", vec!["N:R203K".into()])),
        ];
        let missing = undescribed_variant_proteins(&variants, &structures);
        assert_eq!(missing, vec!["N".to_string(), "ORF8".to_string()]);
        assert!(undescribed_variant_proteins(&variants[..1], &[]).contains(&"S".to_string()));
    }
}
