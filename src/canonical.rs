//! # Effect Canonicalization
//!
//! Groups effect records by identity key `(type, level, method, aa_changes)` and
//! elects the minimum id of each group as its canonical representative. The ids
//! of the other members are kept in `eliminated_ids` so that evidence and variant
//! references can be rewritten before the field is dropped.

use crate::error::{ReconcileError, Result};
use crate::model::{Effect, EffectId, EffectKey};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use tracing::{debug, instrument};

/// Result of canonicalizing an effect collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalizationOutcome {
    /// One record per identity key, sorted by id
    pub effects: Vec<Effect>,
    /// Number of records read
    pub input_records: usize,
    /// Number of records folded into another one during this run
    pub collapsed: usize,
}

impl CanonicalizationOutcome {
    /// Total number of ids recorded as eliminated, including ones carried over
    /// from an interrupted earlier pass
    pub fn eliminated(&self) -> usize {
        self.effects.iter().map(|e| e.eliminated_ids.len()).sum()
    }
}

/// Collapse every identity-key group into a single canonical record.
///
/// Eliminated ids already present on an input record are carried into the
/// group's canonical record, so re-running on a collection that was not yet
/// finalized keeps the mapping derivable.
#[instrument(skip_all, fields(records = effects.len()))]
pub fn canonicalize_effects(effects: Vec<Effect>) -> Result<CanonicalizationOutcome> {
    let input_records = effects.len();
    let mut key_of: FxHashMap<EffectId, EffectKey> = FxHashMap::default();
    let mut groups: FxHashMap<EffectKey, Vec<Effect>> = FxHashMap::default();

    for effect in effects {
        let key = effect.identity_key();
        match key_of.get(&effect.id) {
            Some(existing) if *existing != key => {
                return Err(ReconcileError::NonDeterministicTieBreak {
                    id: effect.id.0.clone(),
                    groups: 2,
                });
            }
            Some(_) => {}
            None => {
                key_of.insert(effect.id.clone(), key.clone());
            }
        }
        groups.entry(key).or_default().push(effect);
    }

    let mut canonical: Vec<Effect> = groups
        .into_par_iter()
        .filter_map(|(_, members)| fold_group(members))
        .collect();
    canonical.sort_by(|a, b| a.id.cmp(&b.id));

    let collapsed = input_records - canonical.len();
    debug!(
        groups = canonical.len(),
        collapsed, "canonicalized effect collection"
    );

    Ok(CanonicalizationOutcome {
        effects: canonical,
        input_records,
        collapsed,
    })
}

/// Fold one identity-key group. The canonical id is the minimum member id.
fn fold_group(members: Vec<Effect>) -> Option<Effect> {
    let mut members = members.into_iter();
    let mut canonical = members.next()?;
    let mut folded: BTreeSet<EffectId> = std::mem::take(&mut canonical.eliminated_ids);

    for member in members {
        folded.extend(member.eliminated_ids);
        if member.id < canonical.id {
            folded.insert(std::mem::replace(&mut canonical.id, member.id));
        } else {
            folded.insert(member.id);
        }
    }

    folded.remove(&canonical.id);
    canonical.eliminated_ids = folded;
    Some(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn effect(id: &str, kind: &str, changes: &[&str]) -> Effect {
        Effect::new(
            id,
            Some(kind),
            Some("higher"),
            Some("experimental"),
            changes.iter().map(|c| c.to_string()).collect(),
        )
    }

    fn ids(values: &[&str]) -> BTreeSet<EffectId> {
        values.iter().map(|v| EffectId::from(*v)).collect()
    }

    #[test]
    fn test_duplicates_collapse_to_minimum_id() {
        let outcome = canonicalize_effects(vec![
            effect("E2", "infectivity", &["S:N501Y"]),
            effect("E1", "infectivity", &["S:N501Y"]),
        ])
        .unwrap();

        assert_eq!(outcome.effects.len(), 1);
        assert_eq!(outcome.effects[0].id, EffectId::from("E1"));
        assert_eq!(outcome.effects[0].eliminated_ids, ids(&["E2"]));
        assert_eq!(outcome.collapsed, 1);
    }

    #[test]
    fn test_selection_ignores_input_order() {
        let forward = vec![
            effect("b", "t", &["x"]),
            effect("c", "t", &["x"]),
            effect("a", "t", &["x"]),
        ];
        let mut backward = forward.clone();
        backward.reverse();

        let left = canonicalize_effects(forward).unwrap();
        let right = canonicalize_effects(backward).unwrap();
        assert_eq!(left, right);
        assert_eq!(left.effects[0].id, EffectId::from("a"));
        assert_eq!(left.effects[0].eliminated_ids, ids(&["b", "c"]));
    }

    #[test]
    fn test_distinct_keys_stay_separate() {
        let outcome = canonicalize_effects(vec![
            effect("E1", "infectivity", &["S:N501Y"]),
            effect("E2", "infectivity", &["S:E484K"]),
            effect("E3", "severity", &["S:N501Y"]),
        ])
        .unwrap();

        assert_eq!(outcome.effects.len(), 3);
        assert!(outcome.effects.iter().all(|e| e.eliminated_ids.is_empty()));
        assert_eq!(outcome.collapsed, 0);
    }

    #[test]
    fn test_amino_acid_change_order_is_part_of_the_key() {
        let outcome = canonicalize_effects(vec![
            effect("E1", "t", &["A", "B"]),
            effect("E2", "t", &["B", "A"]),
        ])
        .unwrap();
        assert_eq!(outcome.effects.len(), 2);
    }

    #[test]
    fn test_rerun_is_idempotent() {
        let first = canonicalize_effects(vec![
            effect("E1", "t", &["x"]),
            effect("E2", "t", &["x"]),
            effect("E3", "u", &["y"]),
        ])
        .unwrap();

        let finalized: Vec<Effect> = first
            .effects
            .iter()
            .cloned()
            .map(|mut e| {
                e.eliminated_ids.clear();
                e
            })
            .collect();
        let second = canonicalize_effects(finalized.clone()).unwrap();
        assert_eq!(second.effects, finalized);
        assert_eq!(second.eliminated(), 0);
    }

    #[test]
    fn test_carries_forward_pending_eliminations() {
        let mut pending = effect("E1", "t", &["x"]);
        pending.eliminated_ids = ids(&["E5"]);

        let outcome =
            canonicalize_effects(vec![pending, effect("E3", "t", &["x"])]).unwrap();
        assert_eq!(outcome.effects[0].eliminated_ids, ids(&["E3", "E5"]));
    }

    #[test]
    fn test_new_minimum_takes_over_pending_eliminations() {
        let mut pending = effect("E2", "t", &["x"]);
        pending.eliminated_ids = ids(&["E5"]);

        let outcome =
            canonicalize_effects(vec![pending, effect("E1", "t", &["x"])]).unwrap();
        assert_eq!(outcome.effects[0].id, EffectId::from("E1"));
        assert_eq!(outcome.effects[0].eliminated_ids, ids(&["E2", "E5"]));
    }

    #[test]
    fn test_same_id_under_two_keys_is_rejected() {
        let err = canonicalize_effects(vec![
            effect("E1", "infectivity", &["x"]),
            effect("E1", "severity", &["x"]),
        ])
        .unwrap_err();
        assert!(matches!(err, ReconcileError::NonDeterministicTieBreak { .. }));
    }

    #[test]
    fn test_repeated_identical_record_collapses() {
        let outcome =
            canonicalize_effects(vec![effect("E1", "t", &["x"]), effect("E1", "t", &["x"])])
                .unwrap();
        assert_eq!(outcome.effects.len(), 1);
        assert!(outcome.effects[0].eliminated_ids.is_empty());
    }
}
