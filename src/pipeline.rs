//! # Reconciliation Pipeline
//!
//! One reconciliation pass as an explicit sequence of stages over staged
//! snapshots:
//!
//! 1. canonicalize effects and derive the elimination mapping
//! 2. rewrite and deduplicate evidence
//! 3. rewrite variant effect references
//! 4. merge variant clusters by external identifier
//! 5. finalize effects
//! 6. optional housekeeping of the auxiliary collections
//!
//! Every stage works on in-memory snapshots. Nothing reaches the store until
//! [`PassState::commit`], which replaces every changed collection in a single
//! all-or-nothing commit guarded by the versions the pass was loaded from.

use crate::canonical::canonicalize_effects;
use crate::cluster::{merge_clusters, ClusterMergeReport};
use crate::config::{FindingPolicy, ReconcileConfig};
use crate::error::{ReconcileError, Result};
use crate::evidence::reconcile_evidence;
use crate::finalize::finalize_effects;
use crate::housekeeping::{
    dedupe_aa_changes, prune_protein_regions, undescribed_variant_proteins, HousekeepingReport,
};
use crate::model::{AaChange, Effect, EffectId, Evidence, ProteinRegion, Structure, Variant};
use crate::rewrite::{EliminationMapping, RewriteStats};
use crate::store::{
    collection_write, load, Collection, CollectionWrite, Document, DocumentStore, Snapshot, Version,
};
use crate::variant::reconcile_variant_effects;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument, warn};

/// Effect canonicalization counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectStageReport {
    pub input_records: usize,
    pub canonical_records: usize,
    pub collapsed: usize,
    pub eliminated_ids: usize,
}

/// Counters of a stage that rewrites effect references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReferenceStageReport {
    pub input_records: usize,
    pub output_records: usize,
    pub merged: usize,
    pub rewrite: RewriteStats,
}

/// Summary of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub effects: EffectStageReport,
    pub evidence: ReferenceStageReport,
    pub variants: ReferenceStageReport,
    pub clusters: ClusterMergeReport,
    /// Eliminated ids dropped by the finalizer
    pub finalized: usize,
    pub housekeeping: HousekeepingReport,
    /// Effect references to ids unknown to the effect collection
    pub dangling: BTreeSet<EffectId>,
    /// New versions of the collections replaced by the commit
    pub committed: BTreeMap<Collection, Version>,
}

impl PassReport {
    /// Whether the pass left the store untouched
    pub fn is_noop(&self) -> bool {
        self.committed.is_empty()
    }
}

/// A collection as loaded, plus its staged replacement
#[derive(Debug, Clone)]
struct Staged<D> {
    base: Version,
    original: Vec<D>,
    snapshot: Snapshot<D>,
}

impl<D: Document + PartialEq> Staged<D> {
    fn load(store: &dyn DocumentStore) -> Result<Self> {
        let snapshot = load::<D>(store)?;
        Ok(Self {
            base: snapshot.version(),
            original: snapshot.documents().to_vec(),
            snapshot,
        })
    }

    /// Rewrite documents in place without counting it as a stage
    fn map_documents(mut self, f: impl Fn(D) -> D) -> Self {
        let documents = self.snapshot.into_documents().into_iter().map(f).collect();
        self.snapshot = Snapshot::new(self.base, documents);
        self
    }

    /// Guarded replacement of the stored collection, if anything changed.
    /// Documents are compared by key, so a reordered output is not a change.
    fn write(&self) -> Result<Option<CollectionWrite>> {
        if keyed(self.snapshot.documents()) == keyed(&self.original) {
            return Ok(None);
        }
        collection_write(self.base, self.snapshot.documents()).map(Some)
    }
}

fn keyed<D: Document>(documents: &[D]) -> BTreeMap<String, &D> {
    documents.iter().map(|d| (d.document_key(), d)).collect()
}

/// Staged collections of one reconciliation pass
#[derive(Debug, Clone)]
pub struct PassState {
    config: ReconcileConfig,
    effects: Staged<Effect>,
    evidence: Staged<Evidence>,
    variants: Staged<Variant>,
    aa_changes: Option<Staged<AaChange>>,
    regions: Option<(Staged<ProteinRegion>, Vec<Structure>)>,
    report: PassReport,
}

impl PassState {
    /// Load every collection the pass touches
    #[instrument(skip_all)]
    pub fn load(store: &dyn DocumentStore, config: &ReconcileConfig) -> Result<Self> {
        let mut effects = Staged::<Effect>::load(store)?;
        if config.normalize.effects {
            effects = effects.map_documents(Effect::normalized);
        }
        let mut evidence = Staged::<Evidence>::load(store)?;
        if config.normalize.evidence {
            evidence = evidence.map_documents(Evidence::normalized);
        }
        let variants = Staged::<Variant>::load(store)?;

        let aa_changes = if config.housekeeping.dedupe_aa_changes {
            Some(Staged::<AaChange>::load(store)?)
        } else {
            None
        };
        let regions = if config.housekeeping.prune_protein_regions {
            let structures = load::<Structure>(store)?.into_documents();
            Some((Staged::<ProteinRegion>::load(store)?, structures))
        } else {
            None
        };

        info!(
            effects = effects.snapshot.len(),
            evidence = evidence.snapshot.len(),
            variants = variants.snapshot.len(),
            "loaded reconciliation pass"
        );

        Ok(Self {
            config: config.clone(),
            effects,
            evidence,
            variants,
            aa_changes,
            regions,
            report: PassReport::default(),
        })
    }

    /// Staged effect collection
    pub fn effects(&self) -> &Snapshot<Effect> {
        &self.effects.snapshot
    }

    pub fn evidence(&self) -> &Snapshot<Evidence> {
        &self.evidence.snapshot
    }

    pub fn variants(&self) -> &Snapshot<Variant> {
        &self.variants.snapshot
    }

    pub fn report(&self) -> &PassReport {
        &self.report
    }

    /// Collapse duplicate effects and derive the mapping from the result
    pub fn canonicalize(&mut self) -> Result<EliminationMapping> {
        let effects = self.effects.snapshot.documents().to_vec();
        let outcome = canonicalize_effects(effects)?;
        self.report.effects = EffectStageReport {
            input_records: outcome.input_records,
            canonical_records: outcome.effects.len(),
            collapsed: outcome.collapsed,
            eliminated_ids: outcome.eliminated(),
        };
        self.effects.snapshot.replace(outcome.effects);
        EliminationMapping::derive(&self.effects.snapshot)
    }

    pub fn reconcile_evidence(&mut self, mapping: &EliminationMapping) -> Result<()> {
        mapping.ensure_current(self.effects.snapshot.version())?;
        let evidence = self.evidence.snapshot.documents().to_vec();
        let outcome = reconcile_evidence(evidence, mapping);
        self.check_dangling(Collection::Evidence, &outcome.rewrite)?;
        self.report.evidence = ReferenceStageReport {
            input_records: outcome.input_records,
            output_records: outcome.evidence.len(),
            merged: outcome.merged,
            rewrite: outcome.rewrite,
        };
        self.evidence.snapshot.replace(outcome.evidence);
        Ok(())
    }

    pub fn reconcile_variant_effects(&mut self, mapping: &EliminationMapping) -> Result<()> {
        mapping.ensure_current(self.effects.snapshot.version())?;
        let variants = self.variants.snapshot.documents().to_vec();
        let outcome = reconcile_variant_effects(variants, mapping);
        self.check_dangling(Collection::Variant, &outcome.rewrite)?;
        self.report.variants = ReferenceStageReport {
            input_records: outcome.input_records,
            output_records: outcome.variants.len(),
            merged: outcome.merged_duplicates,
            rewrite: outcome.rewrite,
        };
        self.variants.snapshot.replace(outcome.variants);
        Ok(())
    }

    pub fn merge_clusters(&mut self) -> Result<()> {
        let variants = self.variants.snapshot.documents().to_vec();
        let outcome = merge_clusters(variants, &self.config.clusters)?;
        self.report.clusters = outcome.report;
        self.variants.snapshot.replace(outcome.variants);
        Ok(())
    }

    /// Drop the eliminated ids. Mappings derived earlier become stale.
    pub fn finalize(&mut self) {
        let effects = self.effects.snapshot.documents().to_vec();
        let outcome = finalize_effects(effects);
        self.report.finalized = outcome.cleared;
        self.effects.snapshot.replace(outcome.effects);
    }

    pub fn housekeeping(&mut self) {
        if let Some(staged) = &mut self.aa_changes {
            let outcome = dedupe_aa_changes(staged.snapshot.documents().to_vec());
            self.report.housekeeping.aa_changes_removed = outcome.removed;
            staged.snapshot.replace(outcome.changes);
        }
        if let Some((staged, structures)) = &mut self.regions {
            let regions = staged.snapshot.documents().to_vec();
            let outcome = prune_protein_regions(regions, structures.as_slice());
            self.report.housekeeping.protein_regions_removed = outcome.removed;
            self.report.housekeeping.pruned_region_proteins = outcome.pruned_proteins;
            staged.snapshot.replace(outcome.regions);
            let variants = self.variants.snapshot.documents();
            self.report.housekeeping.undescribed_variant_proteins =
                undescribed_variant_proteins(variants, structures.as_slice());
        }
    }

    /// Replace every changed collection in one commit
    #[instrument(skip_all)]
    pub fn commit(mut self, store: &mut dyn DocumentStore) -> Result<PassReport> {
        let mut writes = Vec::new();
        writes.extend(self.effects.write()?);
        writes.extend(self.evidence.write()?);
        writes.extend(self.variants.write()?);
        if let Some(staged) = &self.aa_changes {
            writes.extend(staged.write()?);
        }
        if let Some((staged, _)) = &self.regions {
            writes.extend(staged.write()?);
        }

        if !writes.is_empty() {
            self.report.committed = store.commit(writes)?.into_iter().collect();
        }
        info!(
            collections = self.report.committed.len(),
            "committed reconciliation pass"
        );
        Ok(self.report)
    }

    fn check_dangling(&mut self, collection: Collection, stats: &RewriteStats) -> Result<()> {
        if stats.dangling.is_empty() {
            return Ok(());
        }
        let example = stats
            .dangling
            .iter()
            .next()
            .map(ToString::to_string)
            .unwrap_or_default();
        warn!(
            %collection,
            count = stats.dangling.len(),
            %example,
            "references to unknown effects"
        );
        if self.config.references.dangling == FindingPolicy::Abort {
            return Err(ReconcileError::DanglingReferences {
                collection,
                count: stats.dangling.len(),
                example,
            });
        }
        self.report.dangling.extend(stats.dangling.iter().cloned());
        Ok(())
    }
}

/// Runs complete reconciliation passes with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    config: ReconcileConfig,
}

impl Pipeline {
    /// Create a new pipeline
    pub fn new(config: ReconcileConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Compute a full pass without committing it
    pub fn plan(&self, store: &dyn DocumentStore) -> Result<PassState> {
        let mut state = PassState::load(store, &self.config)?;
        let mapping = state.canonicalize()?;
        state.reconcile_evidence(&mapping)?;
        state.reconcile_variant_effects(&mapping)?;
        state.merge_clusters()?;
        state.finalize();
        state.housekeeping();
        Ok(state)
    }

    /// Run a full pass and commit it atomically
    #[instrument(skip_all, fields(namespace = %self.config.clusters.namespace))]
    pub fn run(&self, store: &mut dyn DocumentStore) -> Result<PassReport> {
        let state = self.plan(&*store)?;
        state.commit(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Alias;
    use crate::store::{ingest, MemoryStore};

    fn seeded_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        ingest(
            &mut store,
            vec![
                Effect::new("E1", Some("t"), Some("l"), None, vec!["S:N501Y".into()]),
                Effect::new("E2", Some("t"), Some("l"), None, vec!["S:N501Y".into()]),
                Effect::new("E3", Some("u"), Some("l"), None, vec![]),
            ],
        )
        .unwrap();
        ingest(
            &mut store,
            vec![Evidence::new(Some("c"), Some("article"), None, None, [EffectId::from("E2")])],
        )
        .unwrap();
        ingest(
            &mut store,
            vec![
                Variant::new("V1").with_alias(Alias::new("pango", "B.1.1.7")).with_effect("E2"),
                Variant::new("V2").with_alias(Alias::new("pango", "B.1.1.7")).with_effect("E3"),
            ],
        )
        .unwrap();
        store
    }

    #[test]
    fn test_full_pass() {
        let mut store = seeded_store();
        let report = Pipeline::default().run(&mut store).unwrap();

        assert_eq!(report.effects.collapsed, 1);
        assert_eq!(report.evidence.rewrite.rewritten, 1);
        assert_eq!(report.clusters.merged_clusters, 1);
        assert_eq!(report.finalized, 1);
        assert_eq!(report.committed.len(), 3);
        assert!(report.dangling.is_empty());

        let effects = load::<Effect>(&store).unwrap();
        assert_eq!(effects.len(), 2);
        assert!(effects.documents().iter().all(|e| e.eliminated_ids.is_empty()));
    }

    #[test]
    fn test_second_pass_is_noop() {
        let mut store = seeded_store();
        let pipeline = Pipeline::default();
        pipeline.run(&mut store).unwrap();
        let second = pipeline.run(&mut store).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.effects.collapsed, 0);
    }

    #[test]
    fn test_stale_mapping_is_refused() {
        let store = seeded_store();
        let mut state = PassState::load(&store, &ReconcileConfig::default()).unwrap();
        let mapping = state.canonicalize().unwrap();
        state.finalize();

        let err = state.reconcile_evidence(&mapping).unwrap_err();
        assert!(matches!(err, ReconcileError::StaleMapping { .. }));
        let err = state.reconcile_variant_effects(&mapping).unwrap_err();
        assert!(matches!(err, ReconcileError::StaleMapping { .. }));
    }

    #[test]
    fn test_dangling_references_can_abort() {
        let mut store = seeded_store();
        ingest(
            &mut store,
            vec![Evidence::new(Some("d"), None, None, None, [EffectId::from("E404")])],
        )
        .unwrap();
        let before = load::<Evidence>(&store).unwrap();

        let mut config = ReconcileConfig::default();
        config.references.dangling = FindingPolicy::Abort;
        let err = Pipeline::new(config).run(&mut store).unwrap_err();
        assert!(matches!(err, ReconcileError::DanglingReferences { .. }));
        assert_eq!(load::<Evidence>(&store).unwrap(), before);

        let report = Pipeline::default().run(&mut store).unwrap();
        assert_eq!(report.dangling, BTreeSet::from([EffectId::from("E404")]));
    }
}
