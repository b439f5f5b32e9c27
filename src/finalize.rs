//! # Reconciliation Finalizer
//!
//! Drops the transient `eliminated_ids` bookkeeping once every dependent
//! collection has been rewritten. After this step the elimination mapping can no
//! longer be derived from the effect collection.

use crate::model::Effect;
use tracing::{debug, instrument};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeOutcome {
    pub effects: Vec<Effect>,
    /// Eliminated ids removed from the records
    pub cleared: usize,
}

/// Clear `eliminated_ids` on every effect record.
#[instrument(skip_all, fields(records = effects.len()))]
pub fn finalize_effects(mut effects: Vec<Effect>) -> FinalizeOutcome {
    let mut cleared = 0;
    for effect in &mut effects {
        cleared += effect.eliminated_ids.len();
        effect.eliminated_ids.clear();
    }
    debug!(cleared, "finalized effect collection");
    FinalizeOutcome { effects, cleared }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EffectId;

    #[test]
    fn test_eliminated_ids_are_cleared() {
        let mut effect = Effect::new("E1", Some("t"), None, None, vec![]);
        effect.eliminated_ids.insert(EffectId::from("E2"));
        effect.eliminated_ids.insert(EffectId::from("E3"));

        let outcome = finalize_effects(vec![effect, Effect::new("E4", None, None, None, vec![])]);
        assert_eq!(outcome.cleared, 2);
        assert!(outcome.effects.iter().all(|e| e.eliminated_ids.is_empty()));
        assert_eq!(outcome.effects[0].id, EffectId::from("E1"));
    }

    #[test]
    fn test_finalized_collection_is_unchanged() {
        let effects = vec![Effect::new("E1", Some("t"), None, None, vec![])];
        let outcome = finalize_effects(effects.clone());
        assert_eq!(outcome.effects, effects);
        assert_eq!(outcome.cleared, 0);
    }
}
