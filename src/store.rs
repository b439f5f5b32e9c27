//! # Store Module
//!
//! The document store collaborator. Collections are read as full versioned
//! snapshots and replaced as a whole; partial updates are never exposed.
//!
//! The [`DocumentStore`] trait is byte-oriented so it stays object safe. Typed
//! access goes through [`load`], [`lookup`] and [`encode`], which decode and
//! validate documents at the boundary.

use crate::error::{ReconcileError, Result};
use crate::model::{AaChange, Effect, Evidence, ProteinRegion, Structure, Variant};
use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Named collections of the knowledge base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Effect,
    Evidence,
    Variant,
    AaChange,
    Structure,
    ProteinRegion,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Effect,
        Collection::Evidence,
        Collection::Variant,
        Collection::AaChange,
        Collection::Structure,
        Collection::ProteinRegion,
    ];

    /// Storage name of the collection
    pub fn name(self) -> &'static str {
        match self {
            Collection::Effect => "effect",
            Collection::Evidence => "evidence",
            Collection::Variant => "variant",
            Collection::AaChange => "aa_change",
            Collection::Structure => "structure",
            Collection::ProteinRegion => "protein_region",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Monotonic version of a collection, bumped by every replace
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub struct Version(pub u64);

impl Version {
    pub const INITIAL: Version = Version(0);

    pub fn next(self) -> Self {
        Version(self.0 + 1)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A typed record stored in one of the collections.
pub trait Document: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    /// Primary key of the document within its collection
    fn document_key(&self) -> String;

    /// Structural checks applied when a document crosses the store boundary
    fn validate(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Resolve an ingested document against the one already stored under the
    /// same key. The incoming document wins by default.
    fn upsert(self, _existing: Self) -> Self {
        self
    }
}

impl Document for Effect {
    const COLLECTION: Collection = Collection::Effect;

    fn document_key(&self) -> String {
        self.id.0.clone()
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.0.is_empty() {
            return Err("empty effect id".to_string());
        }
        if self.eliminated_ids.contains(&self.id) {
            return Err(format!("effect {} lists itself as eliminated", self.id));
        }
        Ok(())
    }
}

impl Document for Evidence {
    const COLLECTION: Collection = Collection::Evidence;

    fn document_key(&self) -> String {
        match &self.id {
            Some(id) => id.clone(),
            None => self.key().encode(),
        }
    }

    /// Id-less evidence is keyed by its natural key, so a repeated delivery
    /// accumulates references instead of replacing them.
    fn upsert(mut self, existing: Self) -> Self {
        if self.id.is_none() {
            self.effect_ids.extend(existing.effect_ids);
        }
        self
    }
}

impl Document for Variant {
    const COLLECTION: Collection = Collection::Variant;

    fn document_key(&self) -> String {
        self.id.0.clone()
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.0.is_empty() {
            return Err("empty variant id".to_string());
        }
        if let Some(alias) = self
            .aliases
            .iter()
            .find(|alias| alias.org.is_empty() || alias.name.is_empty())
        {
            return Err(format!("incomplete alias {:?}", alias));
        }
        Ok(())
    }
}

impl Document for AaChange {
    const COLLECTION: Collection = Collection::AaChange;

    fn document_key(&self) -> String {
        self.id.clone()
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.change_id.is_empty() {
            return Err("empty change_id".to_string());
        }
        Ok(())
    }
}

impl Document for Structure {
    const COLLECTION: Collection = Collection::Structure;

    fn document_key(&self) -> String {
        self.id.clone()
    }
}

impl Document for ProteinRegion {
    const COLLECTION: Collection = Collection::ProteinRegion;

    fn document_key(&self) -> String {
        self.id.clone()
    }
}

/// An encoded document as the store sees it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub key: String,
    pub body: Vec<u8>,
}

/// Full replacement of one collection, guarded by the version it was derived from
#[derive(Debug, Clone)]
pub struct CollectionWrite {
    pub collection: Collection,
    pub expected: Version,
    pub documents: Vec<RawDocument>,
}

/// Storage backend holding the knowledge base collections.
///
/// `commit` must be all-or-nothing over every write it receives: either each
/// collection is replaced and its version bumped, or nothing changes.
pub trait DocumentStore: Send {
    /// Current version of a collection
    fn version(&self, collection: Collection) -> Result<Version>;

    /// Full scan of a collection, in key order
    fn scan_raw(&self, collection: Collection) -> Result<(Version, Vec<RawDocument>)>;

    /// Indexed lookup of a single document by key
    fn lookup_raw(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically replace the listed collections, returning their new versions
    fn commit(&mut self, writes: Vec<CollectionWrite>) -> Result<Vec<(Collection, Version)>>;
}

/// A versioned, immutable-by-convention copy of a collection
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<D> {
    version: Version,
    documents: Vec<D>,
}

impl<D: Document> Snapshot<D> {
    pub fn new(version: Version, documents: Vec<D>) -> Self {
        Self { version, documents }
    }

    pub fn collection(&self) -> Collection {
        D::COLLECTION
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn documents(&self) -> &[D] {
        &self.documents
    }

    pub fn into_documents(self) -> Vec<D> {
        self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Swap in a freshly computed collection content and bump the version
    pub fn replace(&mut self, documents: Vec<D>) -> Version {
        self.documents = documents;
        self.version = self.version.next();
        self.version
    }
}

/// Decode and validate one document
pub fn decode<D: Document>(key: &str, body: &[u8]) -> Result<D> {
    let document: D = serde_json::from_slice(body).map_err(|source| ReconcileError::Decode {
        collection: D::COLLECTION,
        key: key.to_string(),
        source,
    })?;
    document
        .validate()
        .map_err(|reason| ReconcileError::InvalidDocument {
            collection: D::COLLECTION,
            key: key.to_string(),
            reason,
        })?;
    Ok(document)
}

/// Encode documents for a write. Duplicate keys are rejected instead of
/// letting one document silently overwrite another.
pub fn encode<D: Document>(documents: &[D]) -> Result<Vec<RawDocument>> {
    let mut seen = hashbrown::HashSet::with_capacity(documents.len());
    let mut encoded = Vec::with_capacity(documents.len());
    for document in documents {
        let raw = encode_one(document)?;
        if !seen.insert(raw.key.clone()) {
            return Err(ReconcileError::DuplicateKey {
                collection: D::COLLECTION,
                key: raw.key,
            });
        }
        encoded.push(raw);
    }
    Ok(encoded)
}

fn encode_one<D: Document>(document: &D) -> Result<RawDocument> {
    let key = document.document_key();
    document
        .validate()
        .map_err(|reason| ReconcileError::InvalidDocument {
            collection: D::COLLECTION,
            key: key.clone(),
            reason,
        })?;
    let body = serde_json::to_vec(document).map_err(|source| ReconcileError::Encode {
        collection: D::COLLECTION,
        source,
    })?;
    Ok(RawDocument { key, body })
}

/// Read a typed snapshot of a collection
pub fn load<D: Document>(store: &dyn DocumentStore) -> Result<Snapshot<D>> {
    let (version, raw) = store.scan_raw(D::COLLECTION)?;
    let documents = raw
        .iter()
        .map(|doc| decode::<D>(&doc.key, &doc.body))
        .collect::<Result<Vec<_>>>()?;
    Ok(Snapshot::new(version, documents))
}

/// Look up one typed document by key
pub fn lookup<D: Document>(store: &dyn DocumentStore, key: &str) -> Result<Option<D>> {
    store
        .lookup_raw(D::COLLECTION, key)?
        .map(|body| decode::<D>(key, &body))
        .transpose()
}

/// Build a guarded full-collection write
pub fn collection_write<D: Document>(expected: Version, documents: &[D]) -> Result<CollectionWrite> {
    Ok(CollectionWrite {
        collection: D::COLLECTION,
        expected,
        documents: encode(documents)?,
    })
}

/// Upsert documents into a collection, keeping the ones already stored under
/// other keys. A document meeting a stored one (or an earlier one of the same
/// batch) under the same key is resolved through [`Document::upsert`]. This is
/// the ingestion path used to seed a store.
pub fn ingest<D: Document>(store: &mut dyn DocumentStore, documents: Vec<D>) -> Result<Version> {
    let (version, existing) = store.scan_raw(D::COLLECTION)?;
    let mut merged: BTreeMap<String, Vec<u8>> = existing
        .into_iter()
        .map(|doc| (doc.key, doc.body))
        .collect();
    for document in documents {
        let key = document.document_key();
        let document = match merged.get(&key) {
            Some(body) => document.upsert(decode::<D>(&key, body)?),
            None => document,
        };
        let raw = encode_one(&document)?;
        merged.insert(raw.key, raw.body);
    }
    let write = CollectionWrite {
        collection: D::COLLECTION,
        expected: version,
        documents: merged
            .into_iter()
            .map(|(key, body)| RawDocument { key, body })
            .collect(),
    };
    let committed = store.commit(vec![write])?;
    Ok(committed
        .into_iter()
        .find(|(collection, _)| *collection == D::COLLECTION)
        .map(|(_, version)| version)
        .unwrap_or(version))
}

/// Reject commits that list the same collection twice
pub(crate) fn ensure_distinct(writes: &[CollectionWrite]) -> Result<()> {
    let mut seen = hashbrown::HashSet::with_capacity(writes.len());
    for write in writes {
        if !seen.insert(write.collection) {
            return Err(ReconcileError::PartialWrite {
                collection: write.collection,
                reason: "collection listed twice in one commit".to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
struct StoredCollection {
    version: Version,
    documents: BTreeMap<String, Vec<u8>>,
}

/// In-memory document store. Commits build every new collection first and
/// swap them in afterwards, so readers never see a mix.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    collections: HashMap<Collection, StoredCollection>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: Collection) -> usize {
        self.collections
            .get(&collection)
            .map(|stored| stored.documents.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.collections
            .values()
            .all(|stored| stored.documents.is_empty())
    }
}

impl DocumentStore for MemoryStore {
    fn version(&self, collection: Collection) -> Result<Version> {
        Ok(self
            .collections
            .get(&collection)
            .map(|stored| stored.version)
            .unwrap_or(Version::INITIAL))
    }

    fn scan_raw(&self, collection: Collection) -> Result<(Version, Vec<RawDocument>)> {
        let Some(stored) = self.collections.get(&collection) else {
            return Ok((Version::INITIAL, Vec::new()));
        };
        let documents = stored
            .documents
            .iter()
            .map(|(key, body)| RawDocument {
                key: key.clone(),
                body: body.clone(),
            })
            .collect();
        Ok((stored.version, documents))
    }

    fn lookup_raw(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self
            .collections
            .get(&collection)
            .and_then(|stored| stored.documents.get(key).cloned()))
    }

    fn commit(&mut self, writes: Vec<CollectionWrite>) -> Result<Vec<(Collection, Version)>> {
        ensure_distinct(&writes)?;
        for write in &writes {
            let found = self.version(write.collection)?;
            if found != write.expected {
                return Err(ReconcileError::VersionConflict {
                    collection: write.collection,
                    expected: write.expected,
                    found,
                });
            }
        }

        let mut staged = Vec::with_capacity(writes.len());
        for write in writes {
            let mut documents = BTreeMap::new();
            for doc in write.documents {
                if documents.insert(doc.key.clone(), doc.body).is_some() {
                    return Err(ReconcileError::DuplicateKey {
                        collection: write.collection,
                        key: doc.key,
                    });
                }
            }
            staged.push((
                write.collection,
                StoredCollection {
                    version: write.expected.next(),
                    documents,
                },
            ));
        }

        let mut committed = Vec::with_capacity(staged.len());
        for (collection, stored) in staged {
            committed.push((collection, stored.version));
            self.collections.insert(collection, stored);
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EffectId;

    fn effect(id: &str) -> Effect {
        Effect::new(id, Some("infectivity"), Some("higher"), None, vec![])
    }

    #[test]
    fn test_store_creation() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_eq!(store.version(Collection::Effect).unwrap(), Version::INITIAL);
    }

    #[test]
    fn test_ingest_and_load() {
        let mut store = MemoryStore::new();
        let version = ingest(&mut store, vec![effect("e2"), effect("e1")]).unwrap();
        assert_eq!(version, Version(1));

        let snapshot = load::<Effect>(&store).unwrap();
        assert_eq!(snapshot.version(), Version(1));
        let ids: Vec<_> = snapshot.documents().iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids, vec![EffectId::from("e1"), EffectId::from("e2")]);
    }

    #[test]
    fn test_lookup() {
        let mut store = MemoryStore::new();
        ingest(&mut store, vec![effect("e1")]).unwrap();
        assert!(lookup::<Effect>(&store, "e1").unwrap().is_some());
        assert!(lookup::<Effect>(&store, "missing").unwrap().is_none());
    }

    #[test]
    fn test_commit_rejects_stale_version() {
        let mut store = MemoryStore::new();
        ingest(&mut store, vec![effect("e1")]).unwrap();

        let write = collection_write(Version::INITIAL, &[effect("e9")]).unwrap();
        let err = store.commit(vec![write]).unwrap_err();
        assert!(matches!(err, ReconcileError::VersionConflict { .. }));
        assert_eq!(store.len(Collection::Effect), 1);
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let mut store = MemoryStore::new();
        ingest(&mut store, vec![effect("e1")]).unwrap();

        let good = collection_write(Version::INITIAL, &[Variant::new("v1")]).unwrap();
        let stale = collection_write(Version::INITIAL, &[effect("e7")]).unwrap();
        assert!(store.commit(vec![good, stale]).is_err());

        assert_eq!(store.len(Collection::Variant), 0);
        assert_eq!(store.version(Collection::Variant).unwrap(), Version::INITIAL);
        assert!(lookup::<Effect>(&store, "e1").unwrap().is_some());
    }

    #[test]
    fn test_ingest_accumulates_idless_evidence() {
        let mut store = MemoryStore::new();
        let first = Evidence::new(Some("c"), Some("t"), None, None, vec![EffectId::from("E1")]);
        let second = Evidence::new(Some("c"), Some("t"), None, None, vec![EffectId::from("E3")]);
        ingest(&mut store, vec![first]).unwrap();
        ingest(&mut store, vec![second]).unwrap();

        let snapshot = load::<Evidence>(&store).unwrap();
        assert_eq!(snapshot.len(), 1);
        let ids: Vec<&str> = snapshot.documents()[0]
            .effect_ids
            .iter()
            .map(EffectId::as_str)
            .collect();
        assert_eq!(ids, vec!["E1", "E3"]);
    }

    #[test]
    fn test_ingest_replaces_evidence_with_storage_id() {
        let mut store = MemoryStore::new();
        let first = Evidence::new(Some("c"), None, None, None, vec![EffectId::from("E1")]);
        let second = Evidence::new(Some("c"), None, None, None, vec![EffectId::from("E3")]);
        ingest(&mut store, vec![first.with_id("ev-1")]).unwrap();
        ingest(&mut store, vec![second.clone().with_id("ev-1")]).unwrap();

        let stored = lookup::<Evidence>(&store, "ev-1").unwrap().unwrap();
        assert_eq!(stored, second.with_id("ev-1"));
    }

    #[test]
    fn test_encode_rejects_duplicate_keys() {
        let err = encode(&[effect("e1"), effect("e1")]).unwrap_err();
        assert!(matches!(err, ReconcileError::DuplicateKey { .. }));
    }

    #[test]
    fn test_decode_validates_documents() {
        let err = decode::<Effect>("e1", br#"{"id":"e1","eliminated_ids":["e1"]}"#).unwrap_err();
        assert!(matches!(err, ReconcileError::InvalidDocument { .. }));

        let err = decode::<Effect>("x", b"not json").unwrap_err();
        assert!(matches!(err, ReconcileError::Decode { .. }));
    }

    #[test]
    fn test_snapshot_replace_bumps_version() {
        let mut snapshot = Snapshot::new(Version(3), vec![effect("e1")]);
        let version = snapshot.replace(vec![]);
        assert_eq!(version, Version(4));
        assert!(snapshot.is_empty());
        assert_eq!(snapshot.collection(), Collection::Effect);
    }
}
