//! # Persistent Store
//!
//! RocksDB-backed [`DocumentStore`]. Every collection lives in its own column
//! family keyed by document key; collection versions and the storage manifest
//! live in the metadata column family. A commit is a single `WriteBatch` holding
//! the deletes, the puts and the new version counters of every collection it
//! replaces, so a crash leaves either the old or the new state.

use crate::config::StorageConfig;
use crate::error::{ReconcileError, Result};
use crate::store::{ensure_distinct, Collection, CollectionWrite, DocumentStore, RawDocument, Version};
use rocksdb::{
    checkpoint::Checkpoint, ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options,
    WriteBatch, DB,
};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

const CF_METADATA: &str = "metadata";

const KEY_MANIFEST: &[u8] = b"manifest";
const VERSION_KEY_PREFIX: &str = "version:";

const STORAGE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StorageManifest {
    format_version: u32,
    app_version: String,
}

pub struct PersistentStore {
    db: DB,
}

#[derive(Debug, Clone, Copy)]
pub struct PersistentOpenOptions {
    pub repair: bool,
    pub write_buffer_mb: usize,
    pub max_background_jobs: i32,
}

impl Default for PersistentOpenOptions {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for PersistentOpenOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            repair: config.repair,
            write_buffer_mb: config.write_buffer_mb,
            max_background_jobs: config.max_background_jobs,
        }
    }
}

impl PersistentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: PersistentOpenOptions,
    ) -> Result<Self> {
        let path = path.as_ref();
        if options.repair {
            info!(path = %path.display(), "repairing document store");
            repair_db(path)?;
        }
        let db = open_db(path, &options)?;
        validate_or_init_manifest(&db)?;
        debug!(path = %path.display(), "opened document store");
        Ok(Self { db })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        for collection in Collection::ALL {
            self.db.flush_cf(self.cf(collection.name())?)?;
        }
        Ok(())
    }

    /// Create a consistent on-disk copy of the store
    pub fn checkpoint(&self, path: impl AsRef<Path>) -> Result<()> {
        let checkpoint = Checkpoint::new(&self.db)?;
        checkpoint.create_checkpoint(path)?;
        Ok(())
    }

    /// Number of documents in a collection
    pub fn len(&self, collection: Collection) -> Result<usize> {
        let cf = self.cf(collection.name())?;
        let mut count = 0;
        for entry in self.db.iterator_cf(cf, IteratorMode::Start) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| ReconcileError::Storage {
            reason: format!("missing column family {name}"),
        })
    }

    fn stored_keys(&self, collection: Collection) -> Result<Vec<Vec<u8>>> {
        let cf = self.cf(collection.name())?;
        self.db
            .iterator_cf(cf, IteratorMode::Start)
            .map(|entry| entry.map(|(key, _)| key.to_vec()).map_err(ReconcileError::from))
            .collect()
    }
}

impl DocumentStore for PersistentStore {
    fn version(&self, collection: Collection) -> Result<Version> {
        let metadata_cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(metadata_cf, version_key(collection))? {
            Some(bytes) => decode_version(collection, &bytes),
            None => Ok(Version::INITIAL),
        }
    }

    fn scan_raw(&self, collection: Collection) -> Result<(Version, Vec<RawDocument>)> {
        // Reads go through one snapshot so the version and documents agree.
        let snapshot = self.db.snapshot();
        let metadata_cf = self.cf(CF_METADATA)?;
        let version = match snapshot.get_cf(metadata_cf, version_key(collection))? {
            Some(bytes) => decode_version(collection, &bytes)?,
            None => Version::INITIAL,
        };

        let cf = self.cf(collection.name())?;
        let mut documents = Vec::new();
        for entry in snapshot.iterator_cf(cf, IteratorMode::Start) {
            let (key, body) = entry?;
            let key = String::from_utf8(key.to_vec()).map_err(|e| ReconcileError::Storage {
                reason: format!("non utf-8 key in {collection}: {e}"),
            })?;
            documents.push(RawDocument {
                key,
                body: body.to_vec(),
            });
        }
        Ok((version, documents))
    }

    fn lookup_raw(&self, collection: Collection, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.cf(collection.name())?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
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

        let metadata_cf = self.cf(CF_METADATA)?;
        let mut batch = WriteBatch::default();
        let mut committed = Vec::with_capacity(writes.len());
        for write in writes {
            let cf = self.cf(write.collection.name())?;
            for key in self.stored_keys(write.collection)? {
                batch.delete_cf(cf, key);
            }

            let mut seen = HashSet::with_capacity(write.documents.len());
            for doc in &write.documents {
                if !seen.insert(doc.key.as_str()) {
                    return Err(ReconcileError::DuplicateKey {
                        collection: write.collection,
                        key: doc.key.clone(),
                    });
                }
                batch.put_cf(cf, doc.key.as_bytes(), &doc.body);
            }

            let version = write.expected.next();
            batch.put_cf(metadata_cf, version_key(write.collection), encode_version(version)?);
            committed.push((write.collection, version));
        }

        self.db
            .write(batch)
            .map_err(|e| ReconcileError::PartialWrite {
                collection: committed
                    .first()
                    .map(|(collection, _)| *collection)
                    .unwrap_or(Collection::Effect),
                reason: e.to_string(),
            })?;
        debug!(collections = committed.len(), "committed collection replacement");
        Ok(committed)
    }
}

impl Drop for PersistentStore {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

fn open_db(path: &Path, open_options: &PersistentOpenOptions) -> Result<DB> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_paranoid_checks(true);
    options.set_write_buffer_size(open_options.write_buffer_mb.saturating_mul(1024 * 1024));
    options.set_max_background_jobs(open_options.max_background_jobs);

    let mut cfs = vec![ColumnFamilyDescriptor::new(CF_METADATA, Options::default())];
    for collection in Collection::ALL {
        cfs.push(ColumnFamilyDescriptor::new(collection.name(), Options::default()));
    }
    Ok(DB::open_cf_descriptors(&options, path, cfs)?)
}

fn repair_db(path: &Path) -> Result<()> {
    let mut options = Options::default();
    options.create_if_missing(true);
    DB::repair(&options, path)?;
    Ok(())
}

fn validate_or_init_manifest(db: &DB) -> Result<()> {
    let metadata_cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| ReconcileError::Storage {
            reason: "missing metadata column family".to_string(),
        })?;
    if let Some(bytes) = db.get_cf(metadata_cf, KEY_MANIFEST)? {
        let manifest: StorageManifest =
            serde_json::from_slice(&bytes).map_err(|e| ReconcileError::Storage {
                reason: format!("unreadable storage manifest: {e}"),
            })?;
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(ReconcileError::Storage {
                reason: format!(
                    "storage format version mismatch: expected {}, found {}",
                    STORAGE_FORMAT_VERSION, manifest.format_version
                ),
            });
        }
        return Ok(());
    }

    let manifest = StorageManifest {
        format_version: STORAGE_FORMAT_VERSION,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let bytes = serde_json::to_vec(&manifest).map_err(|e| ReconcileError::Storage {
        reason: format!("cannot encode storage manifest: {e}"),
    })?;
    db.put_cf(metadata_cf, KEY_MANIFEST, bytes)?;
    Ok(())
}

fn version_key(collection: Collection) -> Vec<u8> {
    format!("{VERSION_KEY_PREFIX}{}", collection.name()).into_bytes()
}

fn encode_version(version: Version) -> Result<Vec<u8>> {
    serde_json::to_vec(&version).map_err(|e| ReconcileError::Storage {
        reason: format!("cannot encode version: {e}"),
    })
}

fn decode_version(collection: Collection, bytes: &[u8]) -> Result<Version> {
    serde_json::from_slice(bytes).map_err(|e| ReconcileError::Storage {
        reason: format!("unreadable version of {collection}: {e}"),
    })
}
