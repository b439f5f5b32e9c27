//! # VarKB
//!
//! Deduplication and reference reconciliation for a variant knowledge base.
//!
//! A reconciliation pass collapses duplicate effect records onto a canonical
//! representative, rewrites every evidence and variant reference through the
//! resulting elimination mapping, merges variant clusters sharing an external
//! lineage identifier, and commits all changed collections atomically.

pub mod canonical;
pub mod cluster;
pub mod config;
pub mod dump;
pub mod error;
pub mod evidence;
pub mod finalize;
pub mod housekeeping;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod rewrite;
pub mod store;
pub mod variant;

// Re-export main types for convenience
pub use config::{FindingPolicy, ReconcileConfig};
pub use dump::KnowledgeBaseDump;
pub use error::{ReconcileError, Result};
pub use model::{
    AaChange, Alias, Characterization, Effect, EffectId, Evidence, ProteinRegion, Structure,
    Variant, VariantId,
};
pub use persistence::{PersistentOpenOptions, PersistentStore};
pub use pipeline::{PassReport, PassState, Pipeline};
pub use rewrite::{EliminationMapping, ReferenceRewriter};
pub use store::{Collection, Document, DocumentStore, MemoryStore, Snapshot, Version};

/// Main API for reconciling a knowledge base
pub struct Reconciler {
    store: Box<dyn DocumentStore>,
    pipeline: Pipeline,
}

impl Reconciler {
    /// Create a new reconciler over an empty in-memory store
    pub fn new(config: ReconcileConfig) -> Self {
        Self::with_store(config, MemoryStore::new())
    }

    /// Create a new reconciler with a custom store implementation.
    pub fn with_store<S>(config: ReconcileConfig, store: S) -> Self
    where
        S: DocumentStore + 'static,
    {
        Self {
            store: Box::new(store),
            pipeline: Pipeline::new(config),
        }
    }

    /// Open the store named by `storage.data_dir`, or an in-memory store when
    /// no data directory is configured.
    pub fn open(config: ReconcileConfig) -> Result<Self> {
        match config.storage.data_dir.clone() {
            Some(path) => {
                let options = PersistentOpenOptions::from(&config.storage);
                let store = PersistentStore::open_with_options(path, options)?;
                Ok(Self::with_store(config, store))
            }
            None => Ok(Self::new(config)),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        self.pipeline.config()
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn DocumentStore {
        self.store.as_mut()
    }

    /// Upsert documents into their collection
    pub fn ingest<D: Document>(&mut self, documents: Vec<D>) -> Result<Version> {
        store::ingest(self.store.as_mut(), documents)
    }

    /// Seed the store from a document dump
    pub fn import(&mut self, dump: KnowledgeBaseDump) -> Result<Vec<(Collection, Version)>> {
        dump.ingest_into(self.store.as_mut())
    }

    /// Export every collection
    pub fn export(&self) -> Result<KnowledgeBaseDump> {
        KnowledgeBaseDump::from_store(self.store.as_ref())
    }

    /// Run a full reconciliation pass and commit it
    pub fn run_pass(&mut self) -> Result<PassReport> {
        self.pipeline.run(self.store.as_mut())
    }

    /// Compute a reconciliation pass without committing it
    pub fn plan_pass(&self) -> Result<PassState> {
        self.pipeline.plan(self.store.as_ref())
    }

    /// Elimination mapping derivable from the stored effect collection.
    /// Empty once a pass has been finalized.
    pub fn elimination_mapping(&self) -> Result<EliminationMapping> {
        EliminationMapping::derive(&self.effects()?)
    }

    /// Typed snapshot of any collection
    pub fn collection<D: Document>(&self) -> Result<Snapshot<D>> {
        store::load::<D>(self.store.as_ref())
    }

    pub fn effects(&self) -> Result<Snapshot<Effect>> {
        self.collection::<Effect>()
    }

    pub fn evidence(&self) -> Result<Snapshot<Evidence>> {
        self.collection::<Evidence>()
    }

    pub fn variants(&self) -> Result<Snapshot<Variant>> {
        self.collection::<Variant>()
    }

    /// Look up an effect by id
    pub fn effect(&self, id: &EffectId) -> Result<Option<Effect>> {
        store::lookup::<Effect>(self.store.as_ref(), id.as_str())
    }

    /// Look up a variant cluster by id
    pub fn variant(&self, id: &VariantId) -> Result<Option<Variant>> {
        store::lookup::<Variant>(self.store.as_ref(), id.as_str())
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(ReconcileConfig::default())
    }
}
