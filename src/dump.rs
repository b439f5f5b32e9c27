//! # Knowledge Base Dump
//!
//! JSON document dump of every collection, used to seed a store and to export
//! its reconciled state.

use crate::error::Result;
use crate::model::{AaChange, Effect, Evidence, ProteinRegion, Structure, Variant};
use crate::store::{ingest, load, Collection, Document, DocumentStore, Version};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeBaseDump {
    pub effects: Vec<Effect>,
    pub evidence: Vec<Evidence>,
    pub variants: Vec<Variant>,
    pub aa_changes: Vec<AaChange>,
    pub structures: Vec<Structure>,
    pub protein_regions: Vec<ProteinRegion>,
}

impl KnowledgeBaseDump {
    /// Read every collection of a store
    pub fn from_store(store: &dyn DocumentStore) -> Result<Self> {
        Ok(Self {
            effects: load::<Effect>(store)?.into_documents(),
            evidence: load::<Evidence>(store)?.into_documents(),
            variants: load::<Variant>(store)?.into_documents(),
            aa_changes: load::<AaChange>(store)?.into_documents(),
            structures: load::<Structure>(store)?.into_documents(),
            protein_regions: load::<ProteinRegion>(store)?.into_documents(),
        })
    }

    /// Upsert the dumped documents into a store. Empty collections are skipped.
    pub fn ingest_into(self, store: &mut dyn DocumentStore) -> Result<Vec<(Collection, Version)>> {
        let mut versions = Vec::new();
        push_ingested(store, self.effects, &mut versions)?;
        push_ingested(store, self.evidence, &mut versions)?;
        push_ingested(store, self.variants, &mut versions)?;
        push_ingested(store, self.aa_changes, &mut versions)?;
        push_ingested(store, self.structures, &mut versions)?;
        push_ingested(store, self.protein_regions, &mut versions)?;
        Ok(versions)
    }

    pub fn document_count(&self) -> usize {
        self.effects.len()
            + self.evidence.len()
            + self.variants.len()
            + self.aa_changes.len()
            + self.structures.len()
            + self.protein_regions.len()
    }
}

fn push_ingested<D: Document>(
    store: &mut dyn DocumentStore,
    documents: Vec<D>,
    versions: &mut Vec<(Collection, Version)>,
) -> Result<()> {
    if documents.is_empty() {
        return Ok(());
    }
    let count = documents.len();
    let version = ingest(store, documents)?;
    info!(collection = %D::COLLECTION, count, %version, "ingested documents");
    versions.push((D::COLLECTION, version));
    Ok(())
}
