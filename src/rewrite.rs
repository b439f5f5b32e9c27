//! # Reference Rewriting
//!
//! The elimination mapping produced from a canonicalized effect collection, and
//! the rewrite primitive shared by the evidence and variant reconcilers.
//!
//! Every eliminated id maps to the canonical id it was folded into; canonical ids
//! map to themselves. A lookup is a single hash probe, and rewriting twice is the
//! same as rewriting once because canonical ids are never eliminated.

use crate::error::{ReconcileError, Result};
use crate::model::{Effect, EffectId};
use crate::store::{Snapshot, Version};
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Maps a foreign effect reference onto its canonical id.
pub trait ReferenceRewriter {
    /// Canonical id for `reference`; references the rewriter does not know are
    /// returned unchanged.
    fn rewrite<'a>(&'a self, reference: &'a EffectId) -> &'a EffectId;

    /// Whether the reference names an existing (canonical or eliminated) effect
    fn is_known(&self, reference: &EffectId) -> bool;
}

/// Counters collected while rewriting a collection's references
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteStats {
    /// References read
    pub references: usize,
    /// References replaced by a different canonical id
    pub rewritten: usize,
    /// References removed because they collapsed onto one already present
    pub collapsed: usize,
    /// References to ids unknown to the effect collection
    pub dangling: BTreeSet<EffectId>,
}

impl RewriteStats {
    pub fn merge(mut self, other: RewriteStats) -> Self {
        self.references += other.references;
        self.rewritten += other.rewritten;
        self.collapsed += other.collapsed;
        self.dangling.extend(other.dangling);
        self
    }
}

/// Rewrite a reference set, collapsing references that end up on the same id.
pub fn rewrite_references<R>(
    rewriter: &R,
    references: &BTreeSet<EffectId>,
    stats: &mut RewriteStats,
) -> BTreeSet<EffectId>
where
    R: ReferenceRewriter + ?Sized,
{
    let mut rewritten = BTreeSet::new();
    for reference in references {
        stats.references += 1;
        if !rewriter.is_known(reference) {
            stats.dangling.insert(reference.clone());
        }
        let canonical = rewriter.rewrite(reference);
        if canonical != reference {
            stats.rewritten += 1;
        }
        if !rewritten.insert(canonical.clone()) {
            stats.collapsed += 1;
        }
    }
    rewritten
}

/// `{eliminated_id -> canonical_id}` plus identity entries for canonical ids,
/// tagged with the effect collection version it was derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EliminationMapping {
    source_version: Version,
    canonical_of: FxHashMap<EffectId, EffectId>,
    eliminated: usize,
}

impl EliminationMapping {
    /// Derive the mapping from the `eliminated_ids` fields of an effect snapshot
    pub fn derive(effects: &Snapshot<Effect>) -> Result<Self> {
        Self::from_effects(effects.version(), effects.documents())
    }

    /// Derive the mapping from effect records read at `source_version`.
    ///
    /// Fails when an id is folded into two different canonicals, or is both a
    /// live record and an eliminated one.
    pub fn from_effects(source_version: Version, effects: &[Effect]) -> Result<Self> {
        let mut canonical_of: FxHashMap<EffectId, EffectId> = FxHashMap::default();
        canonical_of.reserve(effects.len());
        for effect in effects {
            canonical_of.insert(effect.id.clone(), effect.id.clone());
        }

        let mut eliminated = 0;
        for effect in effects {
            for id in &effect.eliminated_ids {
                match canonical_of.get(id) {
                    Some(existing) if *existing == effect.id => {}
                    Some(existing) => {
                        return Err(ReconcileError::InconsistentMapping {
                            id: id.0.clone(),
                            first: existing.0.clone(),
                            second: effect.id.0.clone(),
                        });
                    }
                    None => {
                        canonical_of.insert(id.clone(), effect.id.clone());
                        eliminated += 1;
                    }
                }
            }
        }

        Ok(Self {
            source_version,
            canonical_of,
            eliminated,
        })
    }

    /// Version of the effect collection this mapping reflects
    pub fn source_version(&self) -> Version {
        self.source_version
    }

    /// Refuse to rewrite against a mapping that no longer matches the effects
    pub fn ensure_current(&self, current: Version) -> Result<()> {
        if self.source_version != current {
            return Err(ReconcileError::StaleMapping {
                expected: self.source_version,
                found: current,
            });
        }
        Ok(())
    }

    /// Number of eliminated ids
    pub fn eliminated_count(&self) -> usize {
        self.eliminated
    }

    /// Number of canonical ids
    pub fn canonical_count(&self) -> usize {
        self.canonical_of.len() - self.eliminated
    }

    pub fn is_eliminated(&self, id: &EffectId) -> bool {
        self.canonical_of
            .get(id)
            .is_some_and(|canonical| canonical != id)
    }

    pub fn canonical_of(&self, id: &EffectId) -> Option<&EffectId> {
        self.canonical_of.get(id)
    }

    /// Eliminated ids and their canonical targets, ordered by eliminated id
    pub fn eliminations(&self) -> BTreeMap<EffectId, EffectId> {
        self.canonical_of
            .iter()
            .filter(|(id, canonical)| id != canonical)
            .map(|(id, canonical)| (id.clone(), canonical.clone()))
            .collect()
    }
}

impl ReferenceRewriter for EliminationMapping {
    fn rewrite<'a>(&'a self, reference: &'a EffectId) -> &'a EffectId {
        self.canonical_of.get(reference).unwrap_or(reference)
    }

    fn is_known(&self, reference: &EffectId) -> bool {
        self.canonical_of.contains_key(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(id: &str, eliminated: &[&str]) -> Effect {
        let mut effect = Effect::new(id, Some("t"), None, None, vec![]);
        effect.eliminated_ids = eliminated.iter().map(|e| EffectId::from(*e)).collect();
        effect
    }

    fn id(value: &str) -> EffectId {
        EffectId::from(value)
    }

    fn mapping() -> EliminationMapping {
        EliminationMapping::from_effects(
            Version(2),
            &[effect("E1", &["E2", "E4"]), effect("E3", &[])],
        )
        .unwrap()
    }

    #[test]
    fn test_eliminated_ids_map_to_canonical() {
        let mapping = mapping();
        assert_eq!(mapping.rewrite(&id("E2")), &id("E1"));
        assert_eq!(mapping.rewrite(&id("E4")), &id("E1"));
        assert_eq!(mapping.rewrite(&id("E1")), &id("E1"));
        assert_eq!(mapping.rewrite(&id("E3")), &id("E3"));
        assert_eq!(mapping.eliminated_count(), 2);
        assert_eq!(mapping.canonical_count(), 2);
    }

    #[test]
    fn test_unknown_reference_passes_through() {
        let mapping = mapping();
        let unknown = id("E99");
        assert_eq!(mapping.rewrite(&unknown), &unknown);
        assert!(!mapping.is_known(&unknown));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        let mapping = mapping();
        for raw in ["E1", "E2", "E3", "E4", "E99"] {
            let reference = id(raw);
            let once = mapping.rewrite(&reference).clone();
            let twice = mapping.rewrite(&once).clone();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_rewrite_references_collapses_and_counts() {
        let mapping = mapping();
        let refs = BTreeSet::from([id("E1"), id("E2"), id("E3"), id("E99")]);
        let mut stats = RewriteStats::default();
        let rewritten = rewrite_references(&mapping, &refs, &mut stats);

        assert_eq!(rewritten, BTreeSet::from([id("E1"), id("E3"), id("E99")]));
        assert_eq!(stats.references, 4);
        assert_eq!(stats.rewritten, 1);
        assert_eq!(stats.collapsed, 1);
        assert_eq!(stats.dangling, BTreeSet::from([id("E99")]));
    }

    #[test]
    fn test_id_folded_twice_is_inconsistent() {
        let err = EliminationMapping::from_effects(
            Version(1),
            &[effect("E1", &["E5"]), effect("E2", &["E5"])],
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::InconsistentMapping { .. }));
    }

    #[test]
    fn test_live_id_cannot_be_eliminated() {
        let err = EliminationMapping::from_effects(
            Version(1),
            &[effect("E1", &["E2"]), effect("E2", &[])],
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::InconsistentMapping { .. }));
    }

    #[test]
    fn test_stale_version_is_detected() {
        let mapping = mapping();
        assert!(mapping.ensure_current(Version(2)).is_ok());
        let err = mapping.ensure_current(Version(3)).unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::StaleMapping {
                expected: Version(2),
                found: Version(3)
            }
        ));
    }

    #[test]
    fn test_eliminations_are_ordered() {
        let eliminations: Vec<_> = mapping().eliminations().into_iter().collect();
        assert_eq!(
            eliminations,
            vec![(id("E2"), id("E1")), (id("E4"), id("E1"))]
        );
    }
}
